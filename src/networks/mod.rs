//! Live BSSID → SSID → channel hierarchy built from beacons and probe
//! responses.
//!
//! [`Networks`] is the only owner of this state. Readers get either
//! snapshots or `Arc` handles whose mutators are crate-private.

pub mod beacon_rate;
pub mod model;
pub mod sentry;
pub mod signal;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use log::{debug, trace};

pub use model::{Bssid, BssidSnapshot, Channel, ChannelSnapshot, Ssid, SsidSnapshot};
pub use signal::{SignalStrength, SignalStrengthTable, SignalTrack, SignalTrackSettings};

use crate::config::{window, window_start};
use crate::error::NetworkError;
use crate::frame::{AdvertisementFrame, MacAddr};
use crate::oui::OuiLookup;

pub const UNKNOWN_VENDOR: &str = "unknown";

/// Fingerprints excluded from network tracking by administrative action.
#[derive(Debug, Default)]
pub struct IgnoredFingerprints {
    fingerprints: DashSet<String>,
}

impl IgnoredFingerprints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_list(fingerprints: impl IntoIterator<Item = String>) -> Self {
        let ignored = Self::new();
        for fingerprint in fingerprints {
            ignored.register(&fingerprint);
        }
        ignored
    }

    pub fn register(&self, fingerprint: &str) {
        self.fingerprints.insert(fingerprint.to_string());
    }

    pub fn is_ignored(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    pub fn list(&self) -> Vec<String> {
        let mut list: Vec<String> = self.fingerprints.iter().map(|f| f.key().clone()).collect();
        list.sort();
        list
    }
}

pub struct Networks {
    bssids: DashMap<MacAddr, Arc<Bssid>>,
    oui: Arc<dyn OuiLookup>,
    ignored: Arc<IgnoredFingerprints>,
    signal_settings: SignalTrackSettings,
}

impl Networks {
    pub fn new(
        oui: Arc<dyn OuiLookup>,
        ignored: Arc<IgnoredFingerprints>,
        signal_settings: SignalTrackSettings,
    ) -> Self {
        Self {
            bssids: DashMap::new(),
            oui,
            ignored,
            signal_settings,
        }
    }

    pub fn register_beacon(&self, frame: &AdvertisementFrame) {
        self.register(frame, true);
    }

    pub fn register_probe_response(&self, frame: &AdvertisementFrame) {
        self.register(frame, false);
    }

    fn register(&self, frame: &AdvertisementFrame, is_beacon: bool) {
        let fingerprint = frame.tagged.fingerprint.as_deref();
        if let Some(fp) = fingerprint {
            if self.ignored.is_ignored(fp) {
                trace!("Not registering ignored fingerprint [{}]", fp);
                return;
            }
        }

        // Broadcast and hidden SSIDs.
        let ssid_name = match frame.ssid.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return,
        };

        let seen = frame.meta.timestamp;

        // The shard stays write-locked for the whole update. First sight is
        // decided by the entry API, and the retention sweep cannot remove
        // this BSSID halfway through the update.
        let entry = self.bssids.entry(frame.transmitter).or_insert_with(|| {
            let oui = self
                .oui
                .lookup(&frame.transmitter)
                .unwrap_or_else(|| UNKNOWN_VENDOR.to_string());
            debug!("First sighting of BSSID [{}] ({})", frame.transmitter, oui);
            Arc::new(Bssid::new(frame.transmitter, oui, seen))
        });
        let bssid = entry.value();

        bssid.update_last_seen(seen);
        bssid.update_is_wps(frame.tagged.wps);

        let ssid = bssid
            .ssids
            .entry(ssid_name.to_string())
            .or_insert_with(|| {
                debug!("New SSID [{}] on BSSID [{}]", ssid_name, frame.transmitter);
                Arc::new(Ssid::new(ssid_name.to_string(), frame.transmitter))
            })
            .clone();

        ssid.update_security(frame.tagged.security_configuration());

        if is_beacon {
            ssid.increment_beacon_count();
        }

        let channel = ssid
            .channels
            .entry(frame.meta.channel)
            .or_insert_with(|| {
                Arc::new(Channel::new(
                    frame.meta.channel,
                    frame.transmitter,
                    ssid_name.to_string(),
                    self.signal_settings,
                ))
            })
            .clone();

        channel.record_frame(fingerprint, seen, frame.meta.antenna_signal);
    }

    pub fn bssid(&self, address: &MacAddr) -> Option<Arc<Bssid>> {
        self.bssids.get(address).map(|b| Arc::clone(b.value()))
    }

    pub fn bssids(&self) -> Vec<Arc<Bssid>> {
        self.bssids.iter().map(|b| Arc::clone(b.value())).collect()
    }

    pub fn bssid_count(&self) -> usize {
        self.bssids.len()
    }

    /// Distinct SSID names across all BSSIDs.
    pub fn ssids(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for bssid in self.bssids.iter() {
            for ssid in bssid.ssids.iter() {
                names.insert(ssid.key().clone());
            }
        }
        names
    }

    pub fn channel(
        &self,
        bssid: &MacAddr,
        ssid_name: &str,
        channel_number: u16,
    ) -> Result<Arc<Channel>, NetworkError> {
        let ssid = self
            .bssid(bssid)
            .and_then(|b| b.ssid(ssid_name))
            .ok_or_else(|| NetworkError::NoSuchNetwork {
                bssid: bssid.to_string(),
                ssid: ssid_name.to_string(),
            })?;

        ssid.channel(channel_number)
            .ok_or_else(|| NetworkError::NoSuchChannel {
                bssid: bssid.to_string(),
                ssid: ssid_name.to_string(),
                channel: channel_number,
            })
    }

    pub fn find_channel(&self, bssid: &MacAddr, ssid_name: &str, channel_number: u16) -> Option<Arc<Channel>> {
        self.channel(bssid, ssid_name, channel_number).ok()
    }

    pub fn snapshot(&self) -> Vec<BssidSnapshot> {
        let mut snapshot: Vec<BssidSnapshot> = self.bssids.iter().map(|b| b.snapshot()).collect();
        snapshot.sort_by_key(|b| b.bssid);
        snapshot
    }

    pub fn retention_clean(&self, max_idle_seconds: u64) -> usize {
        self.retention_clean_at(Utc::now(), max_idle_seconds)
    }

    /// Drops every BSSID whose last sighting is strictly older than
    /// `max_idle_seconds` before `now`. The idle check and the removal
    /// happen under the same shard lock.
    pub fn retention_clean_at(&self, now: DateTime<Utc>, max_idle_seconds: u64) -> usize {
        let Some(cutoff) = window_start(now, window(max_idle_seconds)) else {
            return 0;
        };
        // Last-seen is kept at millisecond precision.
        let cutoff = cutoff.timestamp_millis();
        let idle = |b: &Arc<Bssid>| b.last_seen().timestamp_millis() < cutoff;

        let candidates: Vec<MacAddr> = self
            .bssids
            .iter()
            .filter(|b| idle(b.value()))
            .map(|b| *b.key())
            .collect();

        let mut removed = 0;
        for address in candidates {
            if self
                .bssids
                .remove_if(&address, |_, b| idle(b))
                .is_some()
            {
                debug!("Retention cleaning expired BSSID [{}] from networks", address);
                removed += 1;
            }
        }
        removed
    }

    /// Resets the per-channel "recent" frame counters.
    pub fn reset_recent_frames(&self) {
        for bssid in self.bssids() {
            for ssid in bssid.ssids() {
                for channel in ssid.channels() {
                    channel.take_recent_frames();
                }
            }
        }
    }

    pub fn reset(&self) {
        self.bssids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameMeta, TaggedParameters};
    use crate::oui::StaticOuiLookup;

    fn networks() -> Networks {
        let oui = StaticOuiLookup::new().with_vendor([0xaa, 0xbb, 0xcc], "Acme");
        Networks::new(
            Arc::new(oui),
            Arc::new(IgnoredFingerprints::new()),
            SignalTrackSettings::default(),
        )
    }

    fn advertisement(ssid: Option<&str>, channel: u16, timestamp: DateTime<Utc>) -> AdvertisementFrame {
        AdvertisementFrame {
            transmitter: "aa:bb:cc:dd:ee:ff".parse().unwrap(),
            destination: MacAddr::BROADCAST,
            ssid: ssid.map(str::to_string),
            tagged: TaggedParameters {
                fingerprint: Some("abc123".to_string()),
                ..Default::default()
            },
            meta: FrameMeta::new(channel, -40, timestamp),
        }
    }

    #[test]
    fn hidden_ssids_are_not_registered() {
        let networks = networks();
        networks.register_beacon(&advertisement(None, 6, Utc::now()));
        networks.register_beacon(&advertisement(Some(""), 6, Utc::now()));
        assert_eq!(networks.bssid_count(), 0);
    }

    #[test]
    fn resolves_vendor_on_first_sight() {
        let networks = networks();
        networks.register_beacon(&advertisement(Some("CorpNet"), 6, Utc::now()));
        let bssid = networks.bssid(&"aa:bb:cc:dd:ee:ff".parse().unwrap()).unwrap();
        assert_eq!(bssid.oui(), "Acme");
    }

    #[test]
    fn strict_channel_lookup_reports_missing_level() {
        let networks = networks();
        networks.register_beacon(&advertisement(Some("CorpNet"), 6, Utc::now()));
        let bssid: MacAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();

        assert!(networks.channel(&bssid, "CorpNet", 6).is_ok());
        assert!(matches!(
            networks.channel(&bssid, "CorpNet", 11),
            Err(NetworkError::NoSuchChannel { channel: 11, .. })
        ));
        assert!(matches!(
            networks.channel(&bssid, "Other", 6),
            Err(NetworkError::NoSuchNetwork { .. })
        ));
    }

    #[test]
    fn recent_frames_reset_keeps_totals() {
        let networks = networks();
        for _ in 0..3 {
            networks.register_probe_response(&advertisement(Some("CorpNet"), 1, Utc::now()));
        }
        networks.reset_recent_frames();
        let channel = networks
            .find_channel(&"aa:bb:cc:dd:ee:ff".parse().unwrap(), "CorpNet", 1)
            .unwrap();
        assert_eq!(channel.total_frames(), 3);
        assert_eq!(channel.total_frames_recent(), 0);
    }
}
