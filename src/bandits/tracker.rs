//! Ground-station tracker state, fed by typed events from the tracker
//! protocol layer.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::contact::ContactManager;

/// Seconds without a ping after which a tracker counts as dark.
pub const DARK_TIMEOUT_SECONDS: i64 = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub tracker: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Clock drift against the leader, in milliseconds.
    pub drift: i64,
    pub bandit_hash: String,
    pub bandit_count: u32,
    pub tracking_mode: Option<String>,
    pub rssi: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactStatus {
    pub tracker: String,
    pub bandit_uuid: Uuid,
    pub rssi: i32,
    pub frame_count: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackerEvent {
    Ping(Ping),
    ContactStatus(ContactStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Online,
    Dark,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tracker {
    pub name: String,
    pub version: String,
    pub drift: i64,
    pub bandit_hash: String,
    pub bandit_count: u32,
    pub tracking_mode: Option<String>,
    pub rssi: i32,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TrackerManager {
    trackers: DashMap<String, Tracker>,
}

impl TrackerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_ping(&self, ping: Ping) {
        let mut entry = self.trackers.entry(ping.tracker.clone()).or_insert_with(|| {
            info!("New tracker [{}] version {}", ping.tracker, ping.version);
            Tracker {
                name: ping.tracker.clone(),
                version: ping.version.clone(),
                drift: ping.drift,
                bandit_hash: ping.bandit_hash.clone(),
                bandit_count: ping.bandit_count,
                tracking_mode: ping.tracking_mode.clone(),
                rssi: ping.rssi,
                last_seen: ping.timestamp,
            }
        });

        let tracker = entry.value_mut();
        tracker.version = ping.version;
        tracker.drift = ping.drift;
        tracker.bandit_hash = ping.bandit_hash;
        tracker.bandit_count = ping.bandit_count;
        tracker.tracking_mode = ping.tracking_mode;
        tracker.rssi = ping.rssi;
        tracker.last_seen = tracker.last_seen.max(ping.timestamp);
    }

    pub fn trackers(&self) -> Vec<Tracker> {
        let mut trackers: Vec<Tracker> = self.trackers.iter().map(|t| t.value().clone()).collect();
        trackers.sort_by(|a, b| a.name.cmp(&b.name));
        trackers
    }

    pub fn state_at(&self, name: &str, now: DateTime<Utc>) -> Option<TrackerState> {
        self.trackers.get(name).map(|t| {
            if t.last_seen + Duration::seconds(DARK_TIMEOUT_SECONDS) < now {
                TrackerState::Dark
            } else {
                TrackerState::Online
            }
        })
    }
}

/// Applies tracker events until the sender side closes or shutdown is
/// signalled.
pub async fn run_tracker_events(
    mut events: mpsc::Receiver<TrackerEvent>,
    trackers: Arc<TrackerManager>,
    contacts: Arc<ContactManager>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TrackerEvent::Ping(ping)) => {
                    debug!("Ping from tracker [{}]", ping.tracker);
                    trackers.register_ping(ping);
                }
                Some(TrackerEvent::ContactStatus(status)) => {
                    contacts.register_tracker_status(status);
                }
                None => {
                    warn!("Tracker event channel closed");
                    break;
                }
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping(tracker: &str, timestamp: DateTime<Utc>) -> Ping {
        Ping {
            tracker: tracker.to_string(),
            version: "1.0.0".to_string(),
            timestamp,
            drift: 12,
            bandit_hash: "abc".to_string(),
            bandit_count: 2,
            tracking_mode: None,
            rssi: -60,
        }
    }

    #[test]
    fn tracker_goes_dark_without_pings() {
        let manager = TrackerManager::new();
        let now = Utc::now();
        manager.register_ping(ping("trk1", now));

        assert_eq!(manager.state_at("trk1", now), Some(TrackerState::Online));
        assert_eq!(
            manager.state_at("trk1", now + Duration::seconds(DARK_TIMEOUT_SECONDS + 1)),
            Some(TrackerState::Dark)
        );
        assert_eq!(manager.state_at("trk2", now), None);
    }

    #[test]
    fn pings_update_existing_tracker() {
        let manager = TrackerManager::new();
        let now = Utc::now();
        manager.register_ping(ping("trk1", now));

        let mut later = ping("trk1", now + Duration::seconds(5));
        later.rssi = -30;
        manager.register_ping(later);

        let trackers = manager.trackers();
        assert_eq!(trackers.len(), 1);
        assert_eq!(trackers[0].rssi, -30);
        assert_eq!(trackers[0].last_seen, now + Duration::seconds(5));
    }
}
