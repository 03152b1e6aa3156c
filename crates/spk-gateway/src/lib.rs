//! Speaker Gateway
//!
//! The gateway sits between a command source and one speaker server:
//! - Validates action keys (`SPK_<zone>`)
//! - Tracks active actions and releases AUTO actions after the release time
//! - Sends start/stop commands through the configured adapter
//! - Publishes every state change to an outward hook
//!
//! # Example
//!
//! ```no_run
//! use spk_gateway::{GatewayConfig, SpeakerDriver};
//! use spk_core::ActionStatus;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = SpeakerDriver::from_config(&GatewayConfig::default()).await?;
//!     driver.set_publish(|change| println!("{:?}", change));
//!     driver.start().await?;
//!
//!     driver.dispatch("SPK_3", None, ActionStatus::Auto).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod registry;
pub mod scheduler;

pub use config::{GatewayConfig, ServerType};
pub use driver::{build_server, Publisher, SpeakerDriver};
pub use error::{GatewayError, Result};
pub use registry::{Action, ActionRegistry};
pub use scheduler::{Scheduler, TimerHandle, TokioScheduler};
