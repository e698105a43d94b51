use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, error};

use super::Networks;
use crate::frame::MacAddr;
use crate::persistence::{BeaconRateSample, PersistenceSink};

/// Drains the per-SSID beacon counters once per write interval, persists the
/// samples and keeps a short history used by the anomaly monitor.
pub struct BeaconRateManager {
    persistence: Arc<dyn PersistenceSink>,
    history: DashMap<(MacAddr, String), VecDeque<BeaconRateSample>>,
    interval_seconds: u64,
    history_size: usize,
}

impl BeaconRateManager {
    /// `interval_seconds` is clamped to one second, the shortest period the
    /// writer is scheduled at.
    pub fn new(persistence: Arc<dyn PersistenceSink>, interval_seconds: u64, history_size: usize) -> Self {
        Self {
            persistence,
            history: DashMap::new(),
            interval_seconds: interval_seconds.max(1),
            history_size: history_size.max(1),
        }
    }

    pub fn write(&self, networks: &Networks) -> usize {
        self.write_at(networks, Utc::now())
    }

    /// Returns the number of samples taken. Non human-readable SSIDs are
    /// left alone.
    pub fn write_at(&self, networks: &Networks, now: DateTime<Utc>) -> usize {
        let mut written = 0;

        for bssid in networks.bssids() {
            for ssid in bssid.ssids() {
                if !ssid.is_human_readable() {
                    continue;
                }

                let sample = BeaconRateSample {
                    bssid: bssid.address(),
                    ssid: ssid.name().to_string(),
                    beacon_count: ssid.take_beacon_count(),
                    interval_seconds: self.interval_seconds,
                    created_at: now,
                };

                if let Err(e) = self.persistence.write_beacon_rate(&sample) {
                    error!(
                        "Could not write beacon rate of [{}] on [{}]: {}",
                        sample.ssid, sample.bssid, e
                    );
                }

                let mut history = self
                    .history
                    .entry((sample.bssid, sample.ssid.clone()))
                    .or_default();
                history.push_back(sample);
                while history.len() > self.history_size {
                    history.pop_front();
                }
                written += 1;
            }
        }

        // Networks dropped by retention take their history with them.
        self.history.retain(|(address, name), _| {
            networks.bssid(address).and_then(|b| b.ssid(name)).is_some()
        });

        debug!("Wrote {} beacon rate samples", written);
        written
    }

    /// Average beacons per second over the retained history.
    pub fn average_rate(&self, bssid: &MacAddr, ssid: &str) -> Option<f64> {
        let history = self.history.get(&(*bssid, ssid.to_string()))?;
        if history.is_empty() {
            return None;
        }
        let total: f64 = history.iter().map(BeaconRateSample::rate).sum();
        Some(total / history.len() as f64)
    }

    pub fn history(&self, bssid: &MacAddr, ssid: &str) -> Vec<BeaconRateSample> {
        self.history
            .get(&(*bssid, ssid.to_string()))
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{AdvertisementFrame, FrameMeta, TaggedParameters};
    use crate::networks::{IgnoredFingerprints, SignalTrackSettings};
    use crate::oui::StaticOuiLookup;
    use crate::persistence::MemoryStore;

    fn beacon(ssid: &str) -> AdvertisementFrame {
        AdvertisementFrame {
            transmitter: "aa:bb:cc:dd:ee:ff".parse().unwrap(),
            destination: MacAddr::BROADCAST,
            ssid: Some(ssid.to_string()),
            tagged: TaggedParameters::default(),
            meta: FrameMeta::new(6, -40, Utc::now()),
        }
    }

    #[test]
    fn write_drains_counter_and_keeps_bounded_history() {
        let networks = Networks::new(
            Arc::new(StaticOuiLookup::new()),
            Arc::new(IgnoredFingerprints::new()),
            SignalTrackSettings::default(),
        );
        let store = Arc::new(MemoryStore::new());
        let manager = BeaconRateManager::new(store.clone(), 10, 2);
        let bssid: MacAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();

        for round in 1..=3u64 {
            for _ in 0..(round * 10) {
                networks.register_beacon(&beacon("CorpNet"));
            }
            assert_eq!(manager.write(&networks), 1);
        }

        assert_eq!(store.beacon_rates().len(), 3);
        assert_eq!(store.beacon_rates()[2].beacon_count, 30);
        assert_eq!(manager.history(&bssid, "CorpNet").len(), 2);
        // (20 / 10 + 30 / 10) / 2
        assert_eq!(manager.average_rate(&bssid, "CorpNet"), Some(2.5));
        assert_eq!(networks.bssid(&bssid).unwrap().ssid("CorpNet").unwrap().beacon_count(), 0);
    }

    #[test]
    fn zero_interval_still_yields_a_rate() {
        let networks = Networks::new(
            Arc::new(StaticOuiLookup::new()),
            Arc::new(IgnoredFingerprints::new()),
            SignalTrackSettings::default(),
        );
        let store = Arc::new(MemoryStore::new());
        let manager = BeaconRateManager::new(store.clone(), 0, 2);
        let bssid: MacAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();

        for _ in 0..25 {
            networks.register_beacon(&beacon("CorpNet"));
        }
        manager.write(&networks);

        assert_eq!(store.beacon_rates()[0].interval_seconds, 1);
        assert_eq!(manager.average_rate(&bssid, "CorpNet"), Some(25.0));
    }
}
