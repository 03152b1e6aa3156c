//! Speaker driver
//!
//! Turns abstract commands into adapter calls:
//!
//! ```text
//! Command ──► validate key ──► ActionRegistry::register ──► send_start / send_stop
//!                                      │                           │
//!                                timer expiry                 publish StateChange
//!                                      ▼
//!                         send_stop ──► publish OFF
//! ```

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use spk_bridge::{SendOutcome, SpeakerServer};
use spk_core::{ActionKey, ActionStatus, Command, StateChange};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{GatewayConfig, ServerType};
use crate::registry::ActionRegistry;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::{GatewayError, Result};

/// Outward state change hook
pub type Publisher = Arc<dyn Fn(StateChange) + Send + Sync>;

struct Inner {
    server: Arc<dyn SpeakerServer>,
    registry: ActionRegistry,
    publish: RwLock<Option<Publisher>>,
}

impl Inner {
    fn publish(&self, change: StateChange) {
        let publish = self.publish.read().clone();
        match publish {
            Some(publish) => publish(change),
            None => debug!("No publisher for {:?}", change),
        }
    }

    /// Stop an expired action.
    ///
    /// The expired entry is already gone from the registry, so any entry
    /// present now belongs to a newer registration and owns the zone.
    async fn release(&self, key: ActionKey) {
        if self.registry.contains(&key) {
            debug!("Release of {} superseded before stop", key);
            return;
        }

        let outcome = self.server.send_stop(key.zone()).await;
        log_outcome(self.server.name(), &key, ActionStatus::Off, &outcome);

        if self.registry.contains(&key) {
            debug!("{} re-activated during release, OFF not published", key);
            return;
        }
        self.publish(StateChange::new(&key, ActionStatus::Off));
    }
}

/// Drives one speaker server adapter
pub struct SpeakerDriver {
    inner: Arc<Inner>,
    release_task: Mutex<Option<JoinHandle<()>>>,
}

impl SpeakerDriver {
    /// Driver with timers on the ambient tokio runtime
    pub fn new(server: Arc<dyn SpeakerServer>) -> Self {
        Self::with_scheduler(server, Arc::new(TokioScheduler))
    }

    pub fn with_scheduler(server: Arc<dyn SpeakerServer>, scheduler: Arc<dyn Scheduler>) -> Self {
        let (release_tx, mut release_rx) = mpsc::unbounded_channel::<ActionKey>();
        let registry = ActionRegistry::new(scheduler, move |key, _status| {
            let _ = release_tx.send(key);
        });

        let inner = Arc::new(Inner {
            server,
            registry,
            publish: RwLock::new(None),
        });

        // ends once the driver (and with it the registry) is dropped
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let release_task = tokio::spawn(async move {
            while let Some(key) = release_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.release(key).await;
            }
        });

        Self {
            inner,
            release_task: Mutex::new(Some(release_task)),
        }
    }

    /// Build the adapter named by `config` and a driver for it
    pub async fn from_config(config: &GatewayConfig) -> Result<Self> {
        let server = build_server(config).await?;
        info!(
            "Speaker driver using {} server at {}",
            server.name(),
            config.server_address()?
        );
        Ok(Self::new(server))
    }

    pub fn server(&self) -> &Arc<dyn SpeakerServer> {
        &self.inner.server
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.inner.registry
    }

    /// Install the outward state change hook, replacing any previous one
    pub fn set_publish<F>(&self, publish: F)
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        *self.inner.publish.write() = Some(Arc::new(publish));
    }

    /// Apply one command.
    ///
    /// Only a malformed key is an error; adapter failures are logged and the
    /// state change is published regardless.
    pub async fn dispatch(
        &self,
        action: &str,
        args: Option<&Value>,
        status: ActionStatus,
    ) -> Result<()> {
        let key = ActionKey::parse(action).map_err(|e| {
            warn!("Rejected command for {:?}: {}", action, e);
            GatewayError::InvalidCommand(e.to_string())
        })?;
        if let Some(args) = args {
            debug!("Command {} args: {}", key, args);
        }

        let server = &self.inner.server;
        let zone = key.zone();
        self.inner
            .registry
            .register(key.clone(), status, server.register_timeout(status));

        let outcome = match status {
            ActionStatus::Off => server.send_stop(zone).await,
            ActionStatus::On | ActionStatus::Auto => server.send_start(zone).await,
        };
        log_outcome(server.name(), &key, status, &outcome);

        self.inner.publish(StateChange::new(&key, status));
        Ok(())
    }

    /// Entry point for commands arriving from the bus
    pub async fn handle_command(&self, command: Command) -> Result<()> {
        self.dispatch(&command.action, command.args.as_ref(), command.status)
            .await
    }

    pub async fn start(&self) -> Result<()> {
        info!("Starting speaker driver ({})", self.inner.server.name());
        self.inner.server.start().await?;
        Ok(())
    }

    /// Stop the adapter and drop every pending release
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping speaker driver ({})", self.inner.server.name());
        self.inner.registry.clear();
        self.inner.server.stop().await?;
        Ok(())
    }
}

impl Drop for SpeakerDriver {
    fn drop(&mut self) {
        self.inner.registry.clear();
        if let Some(task) = self.release_task.lock().take() {
            task.abort();
        }
    }
}

fn log_outcome(server: &str, key: &ActionKey, status: ActionStatus, outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Failed(reason) => {
            error!("{} {} -> {} failed: {}", server, key, status, reason)
        }
        other => info!("{} {} -> {}: {}", server, key, status, other),
    }
}

/// Build the adapter for the configured server type
pub async fn build_server(config: &GatewayConfig) -> Result<Arc<dyn SpeakerServer>> {
    let server: Arc<dyn SpeakerServer> = match config.server_type {
        #[cfg(feature = "spon")]
        ServerType::Spon => Arc::new(spk_bridge::SponServer::bind(config.spon_config()?).await?),
        #[cfg(feature = "bosch")]
        ServerType::Bosch => Arc::new(spk_bridge::BoschServer::new(config.bosch_config()?)),
        #[cfg(feature = "adam")]
        ServerType::Adam => Arc::new(spk_bridge::AdamServer::new(config.adam_config()?)),
        #[allow(unreachable_patterns)]
        other => {
            return Err(GatewayError::Config(format!(
                "server type {} not compiled in",
                other
            )))
        }
    };
    Ok(server)
}
