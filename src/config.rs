use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::alerts::AlertType;
use crate::error::ConfigError;
use crate::frame::MacAddr;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/wifi-ids.toml";
pub const DEFAULT_HOP_COMMAND: &str = "iw dev {interface} set channel {channel}";

/// Upper bound for every configured window, about a hundred years.
pub const MAX_WINDOW_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Converts configured seconds into a chrono window. `None` when the value
/// does not fit, which callers treat as a window that never closes.
pub fn window(seconds: u64) -> Option<chrono::Duration> {
    i64::try_from(seconds).ok().and_then(chrono::Duration::try_seconds)
}

/// `true` once `last_seen + window` lies before `now`. A window that does
/// not fit, or overflows the calendar, never expires.
pub fn expired(last_seen: DateTime<Utc>, window: Option<chrono::Duration>, now: DateTime<Utc>) -> bool {
    window
        .and_then(|w| last_seen.checked_add_signed(w))
        .map_or(false, |end| end < now)
}

/// Oldest timestamp still inside `window` before `now`, or `None` when
/// nothing is old enough to fall out of it.
pub fn window_start(now: DateTime<Utc>, window: Option<chrono::Duration>) -> Option<DateTime<Utc>> {
    window.and_then(|w| now.checked_sub_signed(w))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub probes: Vec<ProbeConfig>,
    pub sender_probes: Vec<SenderProbeConfig>,
    pub alerting: AlertingConfig,
    pub signal_tracks: SignalTrackConfig,
    pub sentry: SentryConfig,
    pub deauth: DeauthConfig,
    pub beacon_rate: BeaconRateConfig,
    pub networks: Vec<NetworkDefinition>,
    pub bandits: Vec<BanditDefinition>,
    pub ignored_fingerprints: Vec<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for name in self
            .probes
            .iter()
            .map(|p| &p.name)
            .chain(self.sender_probes.iter().map(|p| &p.name))
        {
            if !names.insert(name) {
                return Err(ConfigError::Invalid(format!("duplicate probe name [{}]", name)));
            }
        }

        for probe in &self.probes {
            if probe.channels.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "probe [{}] has no channels configured",
                    probe.name
                )));
            }
            if probe.hop_interval_seconds == 0 {
                return Err(ConfigError::Invalid(format!(
                    "probe [{}] must have a hop interval of at least one second",
                    probe.name
                )));
            }
        }

        for network in &self.networks {
            if network.ssid.is_empty() {
                return Err(ConfigError::Invalid("expected network with empty SSID".to_string()));
            }
        }

        if self.signal_tracks.recency_seconds > self.signal_tracks.retention_seconds {
            return Err(ConfigError::Invalid(
                "signal_tracks.recency_seconds must not exceed retention_seconds".to_string(),
            ));
        }

        for (name, seconds) in [
            ("general.retention_seconds", self.general.retention_seconds),
            ("signal_tracks.recency_seconds", self.signal_tracks.recency_seconds),
            ("signal_tracks.retention_seconds", self.signal_tracks.retention_seconds),
            ("sentry.ttl_seconds", self.sentry.ttl_seconds),
            ("deauth.interval_seconds", self.deauth.interval_seconds),
            ("deauth.pair_idle_seconds", self.deauth.pair_idle_seconds),
            ("beacon_rate.write_interval_seconds", self.beacon_rate.write_interval_seconds),
        ] {
            if seconds > MAX_WINDOW_SECONDS {
                return Err(ConfigError::Invalid(format!(
                    "{} must not exceed {} seconds",
                    name, MAX_WINDOW_SECONDS
                )));
            }
        }

        if self.beacon_rate.write_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "beacon_rate.write_interval_seconds must be at least one second".to_string(),
            ));
        }
        if self.beacon_rate.history_size == 0 {
            return Err(ConfigError::Invalid(
                "beacon_rate.history_size must be at least one".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Where the JSON lines store keeps its files. Nothing is persisted
    /// when unset.
    pub data_directory: Option<PathBuf>,
    pub oui_file: Option<PathBuf>,
    pub oui_refresh_hours: u64,
    /// BSSIDs idle for longer than this are dropped from the network state.
    pub retention_seconds: u64,
    pub retention_interval_seconds: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_directory: None,
            oui_file: None,
            oui_refresh_hours: 12,
            retention_seconds: 600,
            retention_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    pub name: String,
    pub interface: String,
    pub channels: Vec<u16>,
    #[serde(default = "default_hop_interval")]
    pub hop_interval_seconds: u64,
    #[serde(default = "default_hop_command")]
    pub hop_command: String,
    /// Leave the interface mode alone, e.g. when it is already in monitor
    /// mode or managed by something else.
    #[serde(default)]
    pub skip_enable_monitor: bool,
    #[serde(default = "default_retry_seconds")]
    pub retry_seconds: u64,
}

impl ProbeConfig {
    pub fn hop_interval(&self) -> Duration {
        Duration::from_secs(self.hop_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SenderProbeConfig {
    pub name: String,
    pub interface: String,
    pub channel: u16,
    #[serde(default)]
    pub skip_enable_monitor: bool,
    #[serde(default = "default_retry_seconds")]
    pub retry_seconds: u64,
    pub trap: TrapDefinition,
}

impl SenderProbeConfig {
    /// Sender probes stay on their channel.
    pub fn as_probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            name: self.name.clone(),
            interface: self.interface.clone(),
            channels: vec![self.channel],
            hop_interval_seconds: default_hop_interval(),
            hop_command: default_hop_command(),
            skip_enable_monitor: self.skip_enable_monitor,
            retry_seconds: self.retry_seconds,
        }
    }
}

/// Raw trap table. Typed validation happens when the trap is built so a bad
/// definition only disables its own sender probe.
#[derive(Debug, Clone, Deserialize)]
pub struct TrapDefinition {
    #[serde(rename = "type")]
    pub trap_type: String,
    #[serde(flatten)]
    pub configuration: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub enabled: Vec<AlertType>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: AlertType::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalTrackConfig {
    /// Samples within this many dBm of their neighbour belong to one track.
    pub cluster_tolerance_dbm: i32,
    /// Tracks count as concurrent when both have samples this recent.
    pub recency_seconds: u64,
    pub retention_seconds: u64,
    pub min_track_samples: usize,
    pub max_samples: usize,
    pub monitor_interval_seconds: u64,
}

impl Default for SignalTrackConfig {
    fn default() -> Self {
        Self {
            cluster_tolerance_dbm: 8,
            recency_seconds: 60,
            retention_seconds: 300,
            min_track_samples: 1,
            max_samples: 4096,
            monitor_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SentryConfig {
    pub ttl_seconds: u64,
    pub sync_interval_seconds: u64,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            sync_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeauthConfig {
    /// Frames per (transmitter, receiver) pair per interval.
    pub threshold: u64,
    pub interval_seconds: u64,
    pub pair_idle_seconds: u64,
}

impl Default for DeauthConfig {
    fn default() -> Self {
        Self {
            threshold: 50,
            interval_seconds: 60,
            pair_idle_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BeaconRateConfig {
    pub write_interval_seconds: u64,
    /// Number of write intervals averaged by the anomaly monitor.
    pub history_size: usize,
}

impl Default for BeaconRateConfig {
    fn default() -> Self {
        Self {
            write_interval_seconds: 60,
            history_size: 5,
        }
    }
}

/// A network that is expected to exist, used by the unexpected-* and
/// crypto-change interceptors and the anomaly monitors.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkDefinition {
    pub ssid: String,
    #[serde(default)]
    pub channels: Vec<u16>,
    /// Canonical security strings such as `WPA2-PSK-CCMP`.
    #[serde(default)]
    pub security: Vec<String>,
    /// Beacons per second above which a beacon-rate anomaly is raised.
    #[serde(default)]
    pub beacon_rate: Option<f64>,
    #[serde(default)]
    pub bssids: Vec<BssidDefinition>,
}

impl NetworkDefinition {
    pub fn bssid(&self, address: &MacAddr) -> Option<&BssidDefinition> {
        self.bssids.iter().find(|b| &b.address == address)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BssidDefinition {
    pub address: MacAddr,
    #[serde(default)]
    pub fingerprints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanditDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub identifiers: Vec<IdentifierDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentifierDefinition {
    #[serde(rename = "type")]
    pub identifier_type: String,
    #[serde(flatten)]
    pub configuration: serde_json::Map<String, serde_json::Value>,
}

fn default_hop_interval() -> u64 {
    1
}

fn default_hop_command() -> String {
    DEFAULT_HOP_COMMAND.to_string()
}

fn default_retry_seconds() -> u64 {
    5
}
