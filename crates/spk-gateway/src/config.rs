//! Gateway configuration

use serde::{Deserialize, Serialize};
use spk_core::{DEFAULT_RELEASE_TIME, DEFAULT_SERVER_PORT};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::{GatewayError, Result};

/// Speaker server protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServerType {
    #[default]
    Spon,
    Bosch,
    Adam,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerType::Spon => "spon",
            ServerType::Bosch => "bosch",
            ServerType::Adam => "adam",
        }
    }

    /// Parse a configured name, falling back to Spon for unknown names
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            warn!("Unknown server type {:?}, using spon", name);
            ServerType::Spon
        })
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spon" => Ok(ServerType::Spon),
            "bosch" => Ok(ServerType::Bosch),
            "adam" => Ok(ServerType::Adam),
            _ => Err(GatewayError::Config(format!("unknown server type: {}", s))),
        }
    }
}

impl From<String> for ServerType {
    fn from(name: String) -> Self {
        ServerType::from_name(&name)
    }
}

impl From<ServerType> for String {
    fn from(server_type: ServerType) -> Self {
        server_type.as_str().to_string()
    }
}

/// Gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server_type: ServerType,
    /// Speaker server URL; the scheme is ignored
    pub server_url: String,
    /// Seconds an AUTO action stays active
    pub release_time: u64,
    pub user: String,
    pub passwd: String,
    /// Service queue id
    pub qid: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_type: ServerType::Spon,
            server_url: format!("tcp://localhost:{}", DEFAULT_SERVER_PORT),
            release_time: DEFAULT_RELEASE_TIME,
            user: "admin".to_string(),
            passwd: "admin".to_string(),
            qid: 0,
        }
    }
}

impl GatewayConfig {
    /// `host:port` of the speaker server.
    ///
    /// Host defaults to `localhost` and port to 2048. A bare `host:port`
    /// without a scheme is accepted.
    pub fn server_address(&self) -> Result<String> {
        let raw = self.server_url.trim();
        let raw = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("tcp://{}", raw)
        };

        let url = Url::parse(&raw).map_err(|e| {
            GatewayError::Config(format!("invalid server url {:?}: {}", self.server_url, e))
        })?;

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .unwrap_or("localhost");
        let port = url.port().unwrap_or(DEFAULT_SERVER_PORT);
        Ok(format!("{}:{}", host, port))
    }

    pub fn release_time(&self) -> Duration {
        Duration::from_secs(self.release_time)
    }

    /// Name of the inbound command queue
    pub fn queue_name(&self) -> String {
        format!("speaker_{}", self.qid)
    }

    #[cfg(feature = "spon")]
    pub fn spon_config(&self) -> Result<spk_bridge::spon::SponConfig> {
        Ok(spk_bridge::spon::SponConfig {
            server_addr: self.server_address()?,
            release_time: self.release_time(),
            ..Default::default()
        })
    }

    #[cfg(feature = "bosch")]
    pub fn bosch_config(&self) -> Result<spk_bridge::bosch::BoschConfig> {
        Ok(spk_bridge::bosch::BoschConfig {
            server_addr: self.server_address()?,
            user: self.user.clone(),
            passwd: self.passwd.clone(),
            release_time: self.release_time(),
            ..Default::default()
        })
    }

    #[cfg(feature = "adam")]
    pub fn adam_config(&self) -> Result<spk_bridge::adam::AdamConfig> {
        Ok(spk_bridge::adam::AdamConfig {
            server_addr: self.server_address()?,
            release_time: self.release_time(),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_url(url: &str) -> GatewayConfig {
        GatewayConfig {
            server_url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_server_type_parsing() {
        assert_eq!("BOSCH".parse::<ServerType>().unwrap(), ServerType::Bosch);
        assert_eq!("Spon".parse::<ServerType>().unwrap(), ServerType::Spon);
        assert_eq!(" adam ".parse::<ServerType>().unwrap(), ServerType::Adam);
        assert!("honeywell".parse::<ServerType>().is_err());
        assert_eq!(ServerType::from_name("honeywell"), ServerType::Spon);
    }

    #[test]
    fn test_server_address_defaults() {
        assert_eq!(GatewayConfig::default().server_address().unwrap(), "localhost:2048");
        assert_eq!(with_url("tcp://10.0.0.5").server_address().unwrap(), "10.0.0.5:2048");
        assert_eq!(with_url("udp://pa.local:5000").server_address().unwrap(), "pa.local:5000");
        assert_eq!(with_url("10.0.0.5:6000").server_address().unwrap(), "10.0.0.5:6000");
        assert!(with_url("tcp://host:notaport").server_address().is_err());
    }

    #[test]
    fn test_queue_name_and_release_time() {
        let config = GatewayConfig {
            qid: 3,
            release_time: 45,
            ..Default::default()
        };
        assert_eq!(config.queue_name(), "speaker_3");
        assert_eq!(config.release_time(), Duration::from_secs(45));
        assert_eq!(GatewayConfig::default().queue_name(), "speaker_0");
    }

    #[test]
    fn test_deserialize_partial() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"server_type": "Bosch", "release_time": 5}"#).unwrap();
        assert_eq!(config.server_type, ServerType::Bosch);
        assert_eq!(config.release_time, 5);
        assert_eq!(config.user, "admin");

        let config: GatewayConfig = serde_json::from_str(r#"{"server_type": "x"}"#).unwrap();
        assert_eq!(config.server_type, ServerType::Spon);
    }
}
