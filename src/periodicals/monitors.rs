use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};

use super::Periodical;
use crate::alerts::{Alert, AlertsService};
use crate::interceptors::ExpectedNetworks;
use crate::networks::beacon_rate::BeaconRateManager;
use crate::networks::Networks;

pub struct RetentionCleaner {
    networks: Arc<Networks>,
    max_idle_seconds: u64,
}

impl RetentionCleaner {
    pub fn new(networks: Arc<Networks>, max_idle_seconds: u64) -> Self {
        Self {
            networks,
            max_idle_seconds,
        }
    }
}

impl Periodical for RetentionCleaner {
    fn name(&self) -> &str {
        "RetentionCleaner"
    }

    fn execute(&self) {
        let removed = self.networks.retention_clean(self.max_idle_seconds);
        if removed > 0 {
            info!("Retention cleaned {} BSSIDs", removed);
        }
    }
}

pub struct BeaconRateWriter {
    manager: Arc<BeaconRateManager>,
    networks: Arc<Networks>,
}

impl BeaconRateWriter {
    pub fn new(manager: Arc<BeaconRateManager>, networks: Arc<Networks>) -> Self {
        Self { manager, networks }
    }
}

impl Periodical for BeaconRateWriter {
    fn name(&self) -> &str {
        "BeaconRateWriter"
    }

    fn execute(&self) {
        self.manager.write(&self.networks);
    }
}

/// Compares the averaged beacon rate of every expected BSSID with the
/// threshold of its network.
pub struct BeaconRateAnomalyMonitor {
    expected: Arc<ExpectedNetworks>,
    manager: Arc<BeaconRateManager>,
    alerts: Arc<AlertsService>,
}

impl BeaconRateAnomalyMonitor {
    pub fn new(expected: Arc<ExpectedNetworks>, manager: Arc<BeaconRateManager>, alerts: Arc<AlertsService>) -> Self {
        Self {
            expected,
            manager,
            alerts,
        }
    }

    pub fn evaluate_at(&self, now: DateTime<Utc>) -> usize {
        let mut raised = 0;
        for network in self.expected.definitions() {
            let Some(threshold) = network.beacon_rate else {
                continue;
            };
            for bssid in &network.bssids {
                let Some(rate) = self.manager.average_rate(&bssid.address, &network.ssid) else {
                    continue;
                };
                if rate > threshold {
                    self.alerts.handle_at(
                        Alert::BeaconRateAnomaly {
                            bssid: bssid.address,
                            ssid: network.ssid.clone(),
                            beacon_rate: rate,
                            threshold,
                        },
                        now,
                    );
                    raised += 1;
                }
            }
        }
        raised
    }
}

impl Periodical for BeaconRateAnomalyMonitor {
    fn name(&self) -> &str {
        "BeaconRateAnomalyMonitor"
    }

    fn execute(&self) {
        self.evaluate_at(Utc::now());
    }
}

/// Looks for more than one concurrent signal track on the channels of every
/// expected network.
pub struct SignalTrackMonitor {
    expected: Arc<ExpectedNetworks>,
    networks: Arc<Networks>,
    alerts: Arc<AlertsService>,
}

impl SignalTrackMonitor {
    pub fn new(expected: Arc<ExpectedNetworks>, networks: Arc<Networks>, alerts: Arc<AlertsService>) -> Self {
        Self {
            expected,
            networks,
            alerts,
        }
    }

    pub fn evaluate_at(&self, now: DateTime<Utc>) -> usize {
        let mut raised = 0;
        for network in self.expected.definitions() {
            for bssid in &network.bssids {
                for &channel_number in &network.channels {
                    let Some(channel) = self.networks.find_channel(&bssid.address, &network.ssid, channel_number) else {
                        continue;
                    };

                    let tracks = channel.signal_strength_table().tracks_at(now);
                    if tracks.len() > 1 {
                        debug!(
                            "{} signal tracks for [{}] on [{}] channel {}",
                            tracks.len(),
                            network.ssid,
                            bssid.address,
                            channel_number
                        );
                        self.alerts.handle_at(
                            Alert::MultipleSignalTracks {
                                bssid: bssid.address,
                                ssid: network.ssid.clone(),
                                channel: channel_number,
                                track_count: tracks.len(),
                            },
                            now,
                        );
                        raised += 1;
                    }
                }
            }
        }
        raised
    }
}

impl Periodical for SignalTrackMonitor {
    fn name(&self) -> &str {
        "SignalTrackMonitor"
    }

    fn execute(&self) {
        self.evaluate_at(Utc::now());
    }
}

pub struct RecentFramesReset {
    networks: Arc<Networks>,
}

impl RecentFramesReset {
    pub fn new(networks: Arc<Networks>) -> Self {
        Self { networks }
    }
}

impl Periodical for RecentFramesReset {
    fn name(&self) -> &str {
        "RecentFramesReset"
    }

    fn execute(&self) {
        self.networks.reset_recent_frames();
    }
}
