use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::BanditError;
use crate::frame::Dot11Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    Fingerprint,
    Ssid,
    SignalStrength,
    PwnagotchiIdentity,
}

impl IdentifierType {
    /// Accepts `signal_strength` as well as `SIGNAL_STRENGTH`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "fingerprint" => Some(IdentifierType::Fingerprint),
            "ssid" => Some(IdentifierType::Ssid),
            "signal_strength" => Some(IdentifierType::SignalStrength),
            "pwnagotchi_identity" => Some(IdentifierType::PwnagotchiIdentity),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FingerprintConfig {
    fingerprint: String,
}

#[derive(Debug, Deserialize)]
struct SsidConfig {
    ssids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SignalStrengthConfig {
    from: i32,
    to: i32,
}

#[derive(Debug, Deserialize)]
struct PwnagotchiIdentityConfig {
    identity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentifierKind {
    Fingerprint { fingerprint: String },
    Ssid { ssids: Vec<String> },
    /// Inclusive dBm range, bounds in either order.
    SignalStrength { from: i32, to: i32 },
    PwnagotchiIdentity { identity: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BanditIdentifier {
    pub uuid: Uuid,
    pub database_id: Option<i64>,
    pub kind: IdentifierKind,
}

impl BanditIdentifier {
    pub fn new(kind: IdentifierKind, database_id: Option<i64>, uuid: Uuid) -> Self {
        Self {
            uuid,
            database_id,
            kind,
        }
    }

    /// Builds an identifier from its stored type name and raw configuration.
    /// The configuration is parsed into the typed form of that variant right
    /// here; a missing or malformed key is a [`BanditError::Mapping`].
    pub fn create(
        type_name: &str,
        config: &Map<String, Value>,
        database_id: Option<i64>,
        uuid: Uuid,
    ) -> Result<Self, BanditError> {
        let identifier_type = IdentifierType::from_name(type_name)
            .ok_or_else(|| BanditError::NoSerializer(type_name.to_string()))?;

        let kind = match identifier_type {
            IdentifierType::Fingerprint => {
                let c: FingerprintConfig = map_config(config)?;
                IdentifierKind::Fingerprint {
                    fingerprint: c.fingerprint,
                }
            }
            IdentifierType::Ssid => {
                let c: SsidConfig = map_config(config)?;
                IdentifierKind::Ssid { ssids: c.ssids }
            }
            IdentifierType::SignalStrength => {
                let c: SignalStrengthConfig = map_config(config)?;
                IdentifierKind::SignalStrength { from: c.from, to: c.to }
            }
            IdentifierType::PwnagotchiIdentity => {
                let c: PwnagotchiIdentityConfig = map_config(config)?;
                IdentifierKind::PwnagotchiIdentity { identity: c.identity }
            }
        };

        Ok(Self::new(kind, database_id, uuid))
    }

    pub fn identifier_type(&self) -> IdentifierType {
        match self.kind {
            IdentifierKind::Fingerprint { .. } => IdentifierType::Fingerprint,
            IdentifierKind::Ssid { .. } => IdentifierType::Ssid,
            IdentifierKind::SignalStrength { .. } => IdentifierType::SignalStrength,
            IdentifierKind::PwnagotchiIdentity { .. } => IdentifierType::PwnagotchiIdentity,
        }
    }

    pub fn matches(&self, frame: &Dot11Frame) -> bool {
        match &self.kind {
            IdentifierKind::Fingerprint { fingerprint } => {
                frame.transmitter_fingerprint() == Some(fingerprint.as_str())
            }
            IdentifierKind::Ssid { ssids } => match frame.ssid() {
                Some(ssid) => ssids.iter().any(|s| s == ssid),
                None => false,
            },
            IdentifierKind::SignalStrength { from, to } => {
                let signal = frame.antenna_signal();
                signal >= *from.min(to) && signal <= *from.max(to)
            }
            IdentifierKind::PwnagotchiIdentity { identity } => frame
                .advertisement()
                .and_then(|a| a.tagged.pwnagotchi.as_ref())
                .map_or(false, |p| &p.identity == identity),
        }
    }
}

impl fmt::Display for BanditIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            IdentifierKind::Fingerprint { fingerprint } => {
                write!(f, "Fingerprint is \"{}\"", fingerprint)
            }
            IdentifierKind::Ssid { ssids } => write!(f, "SSID is one of [{}]", ssids.join(", ")),
            IdentifierKind::SignalStrength { from, to } => {
                write!(f, "Signal strength between {} dBm and {} dBm", from, to)
            }
            IdentifierKind::PwnagotchiIdentity { identity } => {
                write!(f, "Pwnagotchi identity is \"{}\"", identity)
            }
        }
    }
}

fn map_config<T: DeserializeOwned>(config: &Map<String, Value>) -> Result<T, BanditError> {
    serde_json::from_value(Value::Object(config.clone())).map_err(|e| BanditError::Mapping {
        config: Value::Object(config.clone()).to_string(),
        reason: e.to_string(),
    })
}
