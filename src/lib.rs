//! Passive 802.11 intrusion detection: frame interception, network state
//! tracking, anomaly detection and bandit contact tracking.

pub mod alerts;
pub mod bandits;
pub mod config;
pub mod deauth;
pub mod engine;
pub mod error;
pub mod frame;
pub mod health;
pub mod interceptors;
pub mod networks;
pub mod oui;
pub mod parser;
pub mod periodicals;
pub mod persistence;
pub mod probes;
pub mod processor;

pub use config::Config;
pub use engine::{Engine, EngineParts};
