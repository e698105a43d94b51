use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::signal::{SignalStrengthTable, SignalTrackSettings};
use crate::frame::{MacAddr, SecurityConfiguration};

/// One radio transmitter. Owned by [`Networks`](super::Networks); all
/// mutation goes through crate-private methods.
#[derive(Debug)]
pub struct Bssid {
    address: MacAddr,
    oui: String,
    last_seen_millis: AtomicI64,
    is_wps: AtomicBool,
    pub(crate) ssids: DashMap<String, Arc<Ssid>>,
}

impl Bssid {
    pub(crate) fn new(address: MacAddr, oui: String, first_seen: DateTime<Utc>) -> Self {
        Self {
            address,
            oui,
            last_seen_millis: AtomicI64::new(first_seen.timestamp_millis()),
            is_wps: AtomicBool::new(false),
            ssids: DashMap::new(),
        }
    }

    pub fn address(&self) -> MacAddr {
        self.address
    }

    pub fn oui(&self) -> &str {
        &self.oui
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.last_seen_millis.load(Ordering::Acquire))
            .unwrap_or_default()
    }

    /// Never moves backwards, frames from several probes can arrive out of
    /// capture order.
    pub(crate) fn update_last_seen(&self, seen: DateTime<Utc>) {
        self.last_seen_millis
            .fetch_max(seen.timestamp_millis(), Ordering::AcqRel);
    }

    pub fn is_wps(&self) -> bool {
        self.is_wps.load(Ordering::Acquire)
    }

    /// Sticky: once a BSSID advertised WPS it stays flagged.
    pub(crate) fn update_is_wps(&self, wps: bool) {
        if wps {
            self.is_wps.store(true, Ordering::Release);
        }
    }

    pub fn ssid(&self, name: &str) -> Option<Arc<Ssid>> {
        self.ssids.get(name).map(|s| Arc::clone(s.value()))
    }

    pub fn ssids(&self) -> Vec<Arc<Ssid>> {
        self.ssids.iter().map(|s| Arc::clone(s.value())).collect()
    }

    pub fn snapshot(&self) -> BssidSnapshot {
        let mut ssids: Vec<SsidSnapshot> = self.ssids.iter().map(|s| s.snapshot()).collect();
        ssids.sort_by(|a, b| a.name.cmp(&b.name));

        BssidSnapshot {
            bssid: self.address,
            oui: self.oui.clone(),
            last_seen: self.last_seen(),
            is_wps: self.is_wps(),
            ssids,
        }
    }
}

#[derive(Debug)]
pub struct Ssid {
    name: String,
    bssid: MacAddr,
    human_readable: bool,
    security: RwLock<Vec<SecurityConfiguration>>,
    beacon_count: AtomicU64,
    pub(crate) channels: DashMap<u16, Arc<Channel>>,
}

impl Ssid {
    pub(crate) fn new(name: String, bssid: MacAddr) -> Self {
        Self {
            human_readable: is_human_readable(&name),
            name,
            bssid,
            security: RwLock::new(Vec::new()),
            beacon_count: AtomicU64::new(0),
            channels: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bssid(&self) -> MacAddr {
        self.bssid
    }

    pub fn is_human_readable(&self) -> bool {
        self.human_readable
    }

    pub fn security(&self) -> Vec<SecurityConfiguration> {
        self.security.read().clone()
    }

    /// Replaces, never merges. The most recent frame wins.
    pub(crate) fn update_security(&self, security: Vec<SecurityConfiguration>) {
        *self.security.write() = security;
    }

    pub fn beacon_count(&self) -> u64 {
        self.beacon_count.load(Ordering::Acquire)
    }

    pub(crate) fn increment_beacon_count(&self) {
        self.beacon_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Reads and zeroes the counter in one step so increments racing with a
    /// reset are carried into the next interval instead of lost.
    pub(crate) fn take_beacon_count(&self) -> u64 {
        self.beacon_count.swap(0, Ordering::AcqRel)
    }

    pub fn channel(&self, number: u16) -> Option<Arc<Channel>> {
        self.channels.get(&number).map(|c| Arc::clone(c.value()))
    }

    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|c| Arc::clone(c.value())).collect()
    }

    pub fn snapshot(&self) -> SsidSnapshot {
        let mut channels: Vec<ChannelSnapshot> =
            self.channels.iter().map(|c| c.snapshot()).collect();
        channels.sort_by_key(|c| c.channel);

        SsidSnapshot {
            name: self.name.clone(),
            bssid: self.bssid,
            security: self.security().iter().map(|s| s.to_string()).collect(),
            human_readable: self.human_readable,
            beacon_count: self.beacon_count(),
            channels,
        }
    }
}

#[derive(Debug)]
pub struct Channel {
    number: u16,
    bssid: MacAddr,
    ssid: String,
    total_frames: AtomicU64,
    total_frames_recent: AtomicU64,
    fingerprints: Mutex<HashSet<String>>,
    signal_strength: SignalStrengthTable,
}

impl Channel {
    pub(crate) fn new(number: u16, bssid: MacAddr, ssid: String, settings: SignalTrackSettings) -> Self {
        Self {
            number,
            bssid,
            ssid,
            total_frames: AtomicU64::new(0),
            total_frames_recent: AtomicU64::new(0),
            fingerprints: Mutex::new(HashSet::new()),
            signal_strength: SignalStrengthTable::new(settings),
        }
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn bssid(&self) -> MacAddr {
        self.bssid
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Acquire)
    }

    pub fn total_frames_recent(&self) -> u64 {
        self.total_frames_recent.load(Ordering::Acquire)
    }

    pub(crate) fn record_frame(&self, fingerprint: Option<&str>, timestamp: DateTime<Utc>, signal: i32) {
        self.total_frames.fetch_add(1, Ordering::AcqRel);
        self.total_frames_recent.fetch_add(1, Ordering::AcqRel);

        if let Some(fingerprint) = fingerprint {
            let mut fingerprints = self.fingerprints.lock();
            if !fingerprints.contains(fingerprint) {
                fingerprints.insert(fingerprint.to_string());
            }
        }

        self.signal_strength.record_signal_strength(timestamp, signal);
    }

    pub(crate) fn take_recent_frames(&self) -> u64 {
        self.total_frames_recent.swap(0, Ordering::AcqRel)
    }

    pub fn fingerprints(&self) -> Vec<String> {
        let mut fingerprints: Vec<String> = self.fingerprints.lock().iter().cloned().collect();
        fingerprints.sort();
        fingerprints
    }

    pub fn signal_strength_table(&self) -> &SignalStrengthTable {
        &self.signal_strength
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            channel: self.number,
            total_frames: self.total_frames(),
            total_frames_recent: self.total_frames_recent(),
            fingerprints: self.fingerprints(),
            signal_samples: self.signal_strength.len(),
        }
    }
}

/// Non-empty and free of control characters or decoding artifacts.
pub fn is_human_readable(name: &str) -> bool {
    !name.trim().is_empty()
        && name
            .chars()
            .all(|c| !c.is_control() && c != char::REPLACEMENT_CHARACTER)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BssidSnapshot {
    pub bssid: MacAddr,
    pub oui: String,
    pub last_seen: DateTime<Utc>,
    pub is_wps: bool,
    pub ssids: Vec<SsidSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SsidSnapshot {
    pub name: String,
    pub bssid: MacAddr,
    pub security: Vec<String>,
    pub human_readable: bool,
    pub beacon_count: u64,
    pub channels: Vec<ChannelSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub channel: u16,
    pub total_frames: u64,
    pub total_frames_recent: u64,
    pub fingerprints: Vec<String>,
    pub signal_samples: usize,
}
