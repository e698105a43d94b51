//! Sliding window of signal strength samples for one channel and the
//! "multiple tracks" check built on top of it.
//!
//! A single physical transmitter produces samples that cluster around one
//! level. Two clusters that are both active inside the recency window mean
//! two radios are using the same BSSID/SSID/channel, which is what a spoofed
//! or relayed access point looks like from the outside.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{window, window_start, SignalTrackConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalStrength {
    pub timestamp: DateTime<Utc>,
    pub level: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalTrackSettings {
    pub cluster_tolerance: i32,
    /// `None` for windows too large to represent; nothing ages out of them.
    pub recency: Option<Duration>,
    pub retention: Option<Duration>,
    pub min_track_samples: usize,
    pub max_samples: usize,
}

impl From<&SignalTrackConfig> for SignalTrackSettings {
    fn from(config: &SignalTrackConfig) -> Self {
        Self {
            cluster_tolerance: config.cluster_tolerance_dbm,
            recency: window(config.recency_seconds),
            retention: window(config.retention_seconds),
            min_track_samples: config.min_track_samples.max(1),
            max_samples: config.max_samples.max(1),
        }
    }
}

impl Default for SignalTrackSettings {
    fn default() -> Self {
        Self::from(&SignalTrackConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalTrack {
    pub min_level: i32,
    pub max_level: i32,
    pub sample_count: usize,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SignalStrengthTable {
    settings: SignalTrackSettings,
    samples: Mutex<VecDeque<SignalStrength>>,
}

impl SignalStrengthTable {
    pub fn new(settings: SignalTrackSettings) -> Self {
        Self {
            settings,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a sample and drops everything older than the retention
    /// window relative to it.
    pub fn record_signal_strength(&self, timestamp: DateTime<Utc>, level: i32) {
        let mut samples = self.samples.lock();
        samples.push_back(SignalStrength { timestamp, level });

        let cutoff = window_start(timestamp, self.settings.retention);
        while let Some(front) = samples.front() {
            let too_old = cutoff.map_or(false, |cutoff| front.timestamp < cutoff);
            if too_old || samples.len() > self.settings.max_samples {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn samples(&self) -> Vec<SignalStrength> {
        self.samples.lock().iter().copied().collect()
    }

    /// Clusters the samples of the recency window by level. Neighbouring
    /// levels further apart than the tolerance start a new track.
    pub fn tracks_at(&self, now: DateTime<Utc>) -> Vec<SignalTrack> {
        let since = window_start(now, self.settings.recency);
        let mut recent: Vec<SignalStrength> = self
            .samples
            .lock()
            .iter()
            .filter(|s| since.map_or(true, |since| s.timestamp >= since) && s.timestamp <= now)
            .copied()
            .collect();

        if recent.is_empty() {
            return Vec::new();
        }

        recent.sort_by_key(|s| s.level);

        let mut tracks: Vec<SignalTrack> = Vec::new();
        let mut previous_level: Option<i32> = None;

        for sample in recent {
            let joins_current = previous_level
                .map_or(false, |prev| sample.level - prev <= self.settings.cluster_tolerance);

            match tracks.last_mut() {
                Some(track) if joins_current => {
                    track.max_level = sample.level;
                    track.sample_count += 1;
                    track.last_seen = track.last_seen.max(sample.timestamp);
                }
                _ => tracks.push(SignalTrack {
                    min_level: sample.level,
                    max_level: sample.level,
                    sample_count: 1,
                    last_seen: sample.timestamp,
                }),
            }
            previous_level = Some(sample.level);
        }

        tracks.retain(|t| t.sample_count >= self.settings.min_track_samples);
        tracks
    }

    pub fn has_multiple_tracks_at(&self, now: DateTime<Utc>) -> bool {
        self.tracks_at(now).len() > 1
    }

    pub fn has_multiple_tracks(&self) -> bool {
        self.has_multiple_tracks_at(Utc::now())
    }
}
