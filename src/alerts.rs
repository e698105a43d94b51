//! Alert conditions raised by interceptors and periodical monitors.
//!
//! Rendering and delivery are not handled here. An [`AlertSink`] receives
//! typed alerts and is free to forward them anywhere.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::MacAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    BeaconRateAnomaly,
    MultipleSignalTracks,
    DeauthFlood,
    UnexpectedBssid,
    UnexpectedSsid,
    UnexpectedChannel,
    UnexpectedFingerprint,
    CryptoChange,
    UnknownSsid,
    PwnagotchiAdvertisement,
    ProbeResponseTrap,
    BanditContact,
}

impl AlertType {
    pub const ALL: [AlertType; 12] = [
        AlertType::BeaconRateAnomaly,
        AlertType::MultipleSignalTracks,
        AlertType::DeauthFlood,
        AlertType::UnexpectedBssid,
        AlertType::UnexpectedSsid,
        AlertType::UnexpectedChannel,
        AlertType::UnexpectedFingerprint,
        AlertType::CryptoChange,
        AlertType::UnknownSsid,
        AlertType::PwnagotchiAdvertisement,
        AlertType::ProbeResponseTrap,
        AlertType::BanditContact,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Alert {
    BeaconRateAnomaly {
        bssid: MacAddr,
        ssid: String,
        beacon_rate: f64,
        threshold: f64,
    },
    MultipleSignalTracks {
        bssid: MacAddr,
        ssid: String,
        channel: u16,
        track_count: usize,
    },
    DeauthFlood {
        transmitter: MacAddr,
        receiver: MacAddr,
        frame_count: u64,
        threshold: u64,
        interval_seconds: u64,
    },
    UnexpectedBssid {
        bssid: MacAddr,
        ssid: String,
        channel: u16,
        antenna_signal: i32,
    },
    UnexpectedSsid {
        bssid: MacAddr,
        ssid: String,
        channel: u16,
        antenna_signal: i32,
    },
    UnexpectedChannel {
        bssid: MacAddr,
        ssid: String,
        channel: u16,
        antenna_signal: i32,
    },
    UnexpectedFingerprint {
        bssid: MacAddr,
        ssid: String,
        fingerprint: String,
        channel: u16,
    },
    CryptoChange {
        bssid: MacAddr,
        ssid: String,
        encountered: String,
        channel: u16,
    },
    UnknownSsid {
        bssid: MacAddr,
        ssid: String,
        channel: u16,
        antenna_signal: i32,
    },
    PwnagotchiAdvertisement {
        identity: String,
        name: String,
        version: String,
        channel: u16,
        antenna_signal: i32,
    },
    ProbeResponseTrap {
        bssid: MacAddr,
        ssid: String,
        channel: u16,
        antenna_signal: i32,
    },
    BanditContact {
        bandit_uuid: Uuid,
        bandit_name: String,
        contact_uuid: Uuid,
        identifier: String,
    },
}

impl Alert {
    pub fn alert_type(&self) -> AlertType {
        match self {
            Alert::BeaconRateAnomaly { .. } => AlertType::BeaconRateAnomaly,
            Alert::MultipleSignalTracks { .. } => AlertType::MultipleSignalTracks,
            Alert::DeauthFlood { .. } => AlertType::DeauthFlood,
            Alert::UnexpectedBssid { .. } => AlertType::UnexpectedBssid,
            Alert::UnexpectedSsid { .. } => AlertType::UnexpectedSsid,
            Alert::UnexpectedChannel { .. } => AlertType::UnexpectedChannel,
            Alert::UnexpectedFingerprint { .. } => AlertType::UnexpectedFingerprint,
            Alert::CryptoChange { .. } => AlertType::CryptoChange,
            Alert::UnknownSsid { .. } => AlertType::UnknownSsid,
            Alert::PwnagotchiAdvertisement { .. } => AlertType::PwnagotchiAdvertisement,
            Alert::ProbeResponseTrap { .. } => AlertType::ProbeResponseTrap,
            Alert::BanditContact { .. } => AlertType::BanditContact,
        }
    }
}

/// Receiver of raised alerts. Called inline on probe threads, so
/// implementations must not block.
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert, timestamp: DateTime<Utc>);
}

/// Writes alerts to the log as JSON.
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn raise(&self, alert: Alert, timestamp: DateTime<Utc>) {
        match serde_json::to_string(&alert) {
            Ok(json) => warn!("ALERT at {}: {}", timestamp.to_rfc3339(), json),
            Err(e) => warn!("ALERT at {}: {:?} (unserializable: {})", timestamp.to_rfc3339(), alert, e),
        }
    }
}

/// Keeps raised alerts in memory.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<(Alert, DateTime<Utc>)>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().iter().map(|(a, _)| a.clone()).collect()
    }

    pub fn count(&self, alert_type: AlertType) -> usize {
        self.alerts
            .lock()
            .iter()
            .filter(|(a, _)| a.alert_type() == alert_type)
            .count()
    }

    pub fn clear(&self) {
        self.alerts.lock().clear();
    }
}

impl AlertSink for MemoryAlertSink {
    fn raise(&self, alert: Alert, timestamp: DateTime<Utc>) {
        self.alerts.lock().push((alert, timestamp));
    }
}

/// Filters alerts by the configured enabled types before forwarding.
pub struct AlertsService {
    enabled: HashSet<AlertType>,
    sink: Arc<dyn AlertSink>,
}

impl AlertsService {
    pub fn new(enabled: impl IntoIterator<Item = AlertType>, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            enabled: enabled.into_iter().collect(),
            sink,
        }
    }

    pub fn all_enabled(sink: Arc<dyn AlertSink>) -> Self {
        Self::new(AlertType::ALL, sink)
    }

    pub fn is_enabled(&self, alert_type: AlertType) -> bool {
        self.enabled.contains(&alert_type)
    }

    pub fn handle(&self, alert: Alert) {
        self.handle_at(alert, Utc::now());
    }

    pub fn handle_at(&self, alert: Alert, timestamp: DateTime<Utc>) {
        if !self.is_enabled(alert.alert_type()) {
            debug!("Dropping disabled alert {:?}", alert.alert_type());
            return;
        }
        self.sink.raise(alert, timestamp);
    }
}
