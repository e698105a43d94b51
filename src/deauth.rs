//! Deauthentication / disassociation flood detection.

use std::sync::atomic::{AtomicI64, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info};
use serde::Serialize;

use crate::alerts::{Alert, AlertsService};
use crate::config::{window, window_start, DeauthConfig};
use crate::frame::{DisconnectFrame, MacAddr};

#[derive(Debug)]
struct PairCounter {
    count: AtomicU64,
    last_seen_millis: AtomicI64,
    last_reason: AtomicU16,
}

impl PairCounter {
    fn new(seen: DateTime<Utc>) -> Self {
        Self {
            count: AtomicU64::new(0),
            last_seen_millis: AtomicI64::new(seen.timestamp_millis()),
            last_reason: AtomicU16::new(0),
        }
    }

    fn last_seen(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.last_seen_millis.load(Ordering::Acquire))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairActivity {
    pub transmitter: MacAddr,
    pub receiver: MacAddr,
    pub frames_in_bucket: u64,
    pub last_reason: u16,
    pub last_seen: DateTime<Utc>,
}

/// Counts deauth/disassoc frames per (transmitter, receiver) pair in the
/// current bucket. `evaluate` closes the bucket, raises a flood alert for
/// every pair above the threshold and evicts idle pairs.
pub struct DeauthenticationMonitor {
    pairs: DashMap<(MacAddr, MacAddr), PairCounter>,
    total_frames: AtomicU64,
    config: DeauthConfig,
    alerts: Arc<AlertsService>,
}

impl DeauthenticationMonitor {
    pub fn new(config: DeauthConfig, alerts: Arc<AlertsService>) -> Self {
        Self {
            pairs: DashMap::new(),
            total_frames: AtomicU64::new(0),
            config,
            alerts,
        }
    }

    pub fn record_frame(&self, frame: &DisconnectFrame) {
        let seen = frame.meta.timestamp;
        let pair = self
            .pairs
            .entry((frame.transmitter, frame.destination))
            .or_insert_with(|| PairCounter::new(seen));

        pair.count.fetch_add(1, Ordering::AcqRel);
        pair.last_seen_millis
            .fetch_max(seen.timestamp_millis(), Ordering::AcqRel);
        pair.last_reason.store(frame.reason_code, Ordering::Release);
        self.total_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Relaxed)
    }

    pub fn tracked_pairs(&self) -> usize {
        self.pairs.len()
    }

    pub fn activity(&self) -> Vec<PairActivity> {
        let mut activity: Vec<PairActivity> = self
            .pairs
            .iter()
            .map(|p| PairActivity {
                transmitter: p.key().0,
                receiver: p.key().1,
                frames_in_bucket: p.count.load(Ordering::Acquire),
                last_reason: p.last_reason.load(Ordering::Acquire),
                last_seen: p.last_seen(),
            })
            .collect();
        activity.sort_by(|a, b| b.frames_in_bucket.cmp(&a.frames_in_bucket));
        activity
    }

    pub fn evaluate(&self) -> usize {
        self.evaluate_at(Utc::now())
    }

    /// Returns the number of flood alerts raised.
    pub fn evaluate_at(&self, now: DateTime<Utc>) -> usize {
        // Alerts are raised after the sweep so the sink never runs under a
        // shard lock that probe threads need.
        let flooded: Vec<((MacAddr, MacAddr), u64)> = self
            .pairs
            .iter()
            .filter_map(|pair| {
                // Frames arriving during evaluation land in the next bucket.
                let count = pair.count.swap(0, Ordering::AcqRel);
                (count > self.config.threshold).then(|| (*pair.key(), count))
            })
            .collect();

        for &((transmitter, receiver), count) in &flooded {
            info!(
                "Deauth flood from [{}] to [{}]: {} frames in {}s",
                transmitter, receiver, count, self.config.interval_seconds
            );
            self.alerts.handle_at(
                Alert::DeauthFlood {
                    transmitter,
                    receiver,
                    frame_count: count,
                    threshold: self.config.threshold,
                    interval_seconds: self.config.interval_seconds,
                },
                now,
            );
        }

        if let Some(cutoff) = window_start(now, window(self.config.pair_idle_seconds)) {
            let before = self.pairs.len();
            self.pairs
                .retain(|_, pair| pair.last_seen() >= cutoff || pair.count.load(Ordering::Acquire) > 0);
            let evicted = before.saturating_sub(self.pairs.len());
            if evicted > 0 {
                debug!("Evicted {} idle deauth pairs", evicted);
            }
        }

        flooded.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parking_lot::Mutex;

    use crate::alerts::{AlertSink, AlertType, MemoryAlertSink};
    use crate::frame::FrameMeta;

    fn deauth(transmitter: &str, destination: &str, ts: DateTime<Utc>) -> DisconnectFrame {
        DisconnectFrame {
            transmitter: transmitter.parse().unwrap(),
            destination: destination.parse().unwrap(),
            bssid: transmitter.parse().unwrap(),
            reason_code: 7,
            meta: FrameMeta::new(6, -50, ts),
        }
    }

    fn monitor(sink: Arc<MemoryAlertSink>) -> DeauthenticationMonitor {
        DeauthenticationMonitor::new(
            DeauthConfig {
                threshold: 10,
                interval_seconds: 60,
                pair_idle_seconds: 300,
            },
            Arc::new(AlertsService::all_enabled(sink)),
        )
    }

    #[test]
    fn flood_above_threshold_alerts_once_per_bucket() {
        let sink = Arc::new(MemoryAlertSink::new());
        let monitor = monitor(sink.clone());
        let now = Utc::now();

        for _ in 0..11 {
            monitor.record_frame(&deauth("00:11:22:33:44:55", "ff:ff:ff:ff:ff:ff", now));
        }
        for _ in 0..10 {
            monitor.record_frame(&deauth("00:11:22:33:44:66", "ff:ff:ff:ff:ff:ff", now));
        }

        assert_eq!(monitor.evaluate_at(now), 1);
        assert_eq!(sink.count(AlertType::DeauthFlood), 1);
        assert_eq!(monitor.total_frames(), 21);

        // Counters start over after the bucket closes.
        assert_eq!(monitor.evaluate_at(now), 0);
    }

    #[test]
    fn idle_pairs_are_evicted() {
        let sink = Arc::new(MemoryAlertSink::new());
        let monitor = monitor(sink);
        let now = Utc::now();

        monitor.record_frame(&deauth("00:11:22:33:44:55", "aa:bb:cc:dd:ee:ff", now - Duration::seconds(600)));
        monitor.record_frame(&deauth("00:11:22:33:44:66", "aa:bb:cc:dd:ee:ff", now));
        monitor.evaluate_at(now);

        assert_eq!(monitor.tracked_pairs(), 1);
        assert_eq!(monitor.activity()[0].transmitter.to_string(), "00:11:22:33:44:66");
    }

    /// Feeds another frame into the monitor from inside `raise`.
    struct Reentrant {
        monitor: Mutex<Option<Arc<DeauthenticationMonitor>>>,
        raised: AtomicU64,
    }

    impl AlertSink for Reentrant {
        fn raise(&self, _alert: Alert, timestamp: DateTime<Utc>) {
            self.raised.fetch_add(1, Ordering::SeqCst);
            if let Some(monitor) = self.monitor.lock().as_ref() {
                monitor.record_frame(&deauth("00:11:22:33:44:55", "ff:ff:ff:ff:ff:ff", timestamp));
            }
        }
    }

    #[test]
    fn sink_can_record_frames_while_alerts_are_raised() {
        let sink = Arc::new(Reentrant {
            monitor: Mutex::new(None),
            raised: AtomicU64::new(0),
        });
        let monitor = Arc::new(DeauthenticationMonitor::new(
            DeauthConfig {
                threshold: 2,
                interval_seconds: 60,
                pair_idle_seconds: 300,
            },
            Arc::new(AlertsService::all_enabled(sink.clone())),
        ));
        *sink.monitor.lock() = Some(Arc::clone(&monitor));

        let now = Utc::now();
        for _ in 0..3 {
            monitor.record_frame(&deauth("00:11:22:33:44:55", "ff:ff:ff:ff:ff:ff", now));
        }

        assert_eq!(monitor.evaluate_at(now), 1);
        assert_eq!(sink.raised.load(Ordering::SeqCst), 1);
        // The frame recorded from the sink belongs to the next bucket.
        assert_eq!(monitor.activity()[0].frames_in_bucket, 1);
        assert_eq!(monitor.total_frames(), 4);

        *sink.monitor.lock() = None;
    }

    #[test]
    fn unbounded_idle_window_keeps_pairs() {
        let sink = Arc::new(MemoryAlertSink::new());
        let monitor = DeauthenticationMonitor::new(
            DeauthConfig {
                threshold: 10,
                interval_seconds: 60,
                pair_idle_seconds: u64::MAX,
            },
            Arc::new(AlertsService::all_enabled(sink)),
        );
        let now = Utc::now();
        monitor.record_frame(&deauth("00:11:22:33:44:55", "aa:bb:cc:dd:ee:ff", now - Duration::days(3650)));
        assert_eq!(monitor.evaluate_at(now), 0);
        assert_eq!(monitor.tracked_pairs(), 1);
    }
}
