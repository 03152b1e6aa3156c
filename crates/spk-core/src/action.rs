//! Abstract speaker actions
//!
//! Commands arrive as `(action, args, status)` where `action` names a speaker
//! zone as `SPK_<id>`. The gateway never trusts the key: [`ActionKey::parse`]
//! is the only way to obtain a zone id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Speaker zone / destination identifier
pub type ZoneId = u16;

/// Prefix every speaker action key must carry
pub const ACTION_KEY_PREFIX: &str = "SPK";

/// Requested state of a speaker zone.
///
/// Serialized upper-case; parsed case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionStatus {
    /// Latched on until an explicit OFF
    On,
    /// Off / release
    Off,
    /// On, released automatically after the configured release time
    Auto,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::On => "ON",
            ActionStatus::Off => "OFF",
            ActionStatus::Auto => "AUTO",
        }
    }

    /// Whether this status turns the zone on
    pub fn is_active(&self) -> bool {
        !matches!(self, ActionStatus::Off)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" => Ok(ActionStatus::On),
            "OFF" => Ok(ActionStatus::Off),
            "AUTO" => Ok(ActionStatus::Auto),
            _ => Err(Error::UnknownStatus(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for ActionStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A validated `SPK_<id>` action key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    raw: String,
    zone: ZoneId,
}

impl ActionKey {
    /// Parse and validate an action key.
    ///
    /// The prefix is compared case-insensitively and anything after the id
    /// segment is ignored, so `spk_12` and `SPK_12_lobby` both name zone 12.
    pub fn parse(key: &str) -> Result<Self> {
        let mut parts = key.split('_');
        let prefix = parts.next().unwrap_or_default();
        let id = parts
            .next()
            .ok_or_else(|| Error::InvalidActionKey(key.to_string()))?;

        if !prefix.eq_ignore_ascii_case(ACTION_KEY_PREFIX) {
            return Err(Error::InvalidActionKey(key.to_string()));
        }

        let zone: ZoneId = id.trim().parse().map_err(|e| Error::InvalidZone {
            key: key.to_string(),
            reason: format!("{}", e),
        })?;

        if zone == 0 {
            return Err(Error::InvalidZone {
                key: key.to_string(),
                reason: "zone ids start at 1".to_string(),
            });
        }

        Ok(Self {
            raw: key.to_string(),
            zone,
        })
    }

    /// Canonical key for a zone (`SPK_<zone>`)
    pub fn for_zone(zone: ZoneId) -> Self {
        Self {
            raw: format!("{}_{}", ACTION_KEY_PREFIX, zone),
            zone,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn zone(&self) -> ZoneId {
        self.zone
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ActionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ActionKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ActionKey> for String {
    fn from(key: ActionKey) -> Self {
        key.raw
    }
}

impl Serialize for ActionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for ActionKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ActionKey::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Inbound command as delivered by the message source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unvalidated action key
    pub action: String,
    /// Free-form arguments (unused by the speaker adapters)
    #[serde(default)]
    pub args: Option<serde_json::Value>,
    pub status: ActionStatus,
}

/// Outbound state report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub action: String,
    pub status: ActionStatus,
    pub zone: ZoneId,
}

impl StateChange {
    pub fn new(key: &ActionKey, status: ActionStatus) -> Self {
        Self {
            action: key.as_str().to_string(),
            status,
            zone: key.zone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_keys() {
        assert_eq!(ActionKey::parse("SPK_3").unwrap().zone(), 3);
        assert_eq!(ActionKey::parse("spk_128").unwrap().zone(), 128);
        assert_eq!(ActionKey::parse("Spk_7_lobby").unwrap().zone(), 7);
    }

    #[test]
    fn test_parse_keeps_raw_key() {
        let key = ActionKey::parse("spk_12").unwrap();
        assert_eq!(key.as_str(), "spk_12");
        assert_eq!(key.to_string(), "spk_12");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            ActionKey::parse("SPK"),
            Err(Error::InvalidActionKey(_))
        ));
        assert!(matches!(
            ActionKey::parse("LIGHT_3"),
            Err(Error::InvalidActionKey(_))
        ));
        assert!(matches!(
            ActionKey::parse("SPK_abc"),
            Err(Error::InvalidZone { .. })
        ));
        assert!(matches!(
            ActionKey::parse("SPK_0"),
            Err(Error::InvalidZone { .. })
        ));
        assert!(matches!(
            ActionKey::parse("SPK_70000"),
            Err(Error::InvalidZone { .. })
        ));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("auto".parse::<ActionStatus>().unwrap(), ActionStatus::Auto);
        assert_eq!("ON".parse::<ActionStatus>().unwrap(), ActionStatus::On);
        assert_eq!(" off ".parse::<ActionStatus>().unwrap(), ActionStatus::Off);
        assert!("blink".parse::<ActionStatus>().is_err());
    }

    #[test]
    fn test_command_json() {
        let cmd: Command =
            serde_json::from_str(r#"{"action":"SPK_4","status":"AUTO"}"#).unwrap();
        assert_eq!(cmd.action, "SPK_4");
        assert_eq!(cmd.status, ActionStatus::Auto);
        assert!(cmd.args.is_none());

        let change = StateChange::new(&ActionKey::for_zone(4), ActionStatus::Off);
        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(json, r#"{"action":"SPK_4","status":"OFF","zone":4}"#);
    }
}
