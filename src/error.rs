use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::frame::FrameSubtype;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Raised while turning a stored or configured identifier definition into a
/// typed [`BanditIdentifier`](crate::bandits::BanditIdentifier).
#[derive(Debug, Error)]
pub enum BanditError {
    #[error("could not map identifier configuration {config}: {reason}")]
    Mapping { config: String, reason: String },

    #[error("no serializer for bandit identifier type [{0}]")]
    NoSerializer(String),
}

/// Raised while building a trap from its sender probe definition.
#[derive(Debug, Error)]
pub enum TrapError {
    #[error("no such trap type [{0}]")]
    NoSuchType(String),

    #[error("invalid configuration for trap [{trap_type}]: {reason}")]
    Mapping { trap_type: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("interface {interface}: {message}")]
    Interface { interface: String, message: String },

    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("device closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("no SSID [{ssid}] recorded for BSSID [{bssid}]")]
    NoSuchNetwork { bssid: String, ssid: String },

    #[error("no channel {channel} recorded for SSID [{ssid}] on BSSID [{bssid}]")]
    NoSuchChannel { bssid: String, ssid: String, channel: u16 },
}

#[derive(Debug, Error)]
pub enum InterceptorError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("frame of subtype {0:?} is missing its {1}")]
    MissingField(FrameSubtype, &'static str),

    #[error("contact event queue is closed")]
    QueueClosed,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum OuiError {
    #[error("failed to read OUI file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("OUI file {0} contained no entries")]
    Empty(PathBuf),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("engine already started")]
    AlreadyStarted,

    #[error("failed to spawn probe thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}
