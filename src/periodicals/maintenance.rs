use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};

use super::Periodical;
use crate::bandits::ContactManager;
use crate::deauth::DeauthenticationMonitor;
use crate::health::{HealthMonitor, IndicatorLevel};
use crate::networks::sentry::Sentry;
use crate::oui::OuiManager;
use crate::persistence::PersistenceSink;
use crate::probes::ProbeStatus;

pub const PROBES_INDICATOR: &str = "probes";

pub struct DeauthEvaluator {
    monitor: Arc<DeauthenticationMonitor>,
}

impl DeauthEvaluator {
    pub fn new(monitor: Arc<DeauthenticationMonitor>) -> Self {
        Self { monitor }
    }
}

impl Periodical for DeauthEvaluator {
    fn name(&self) -> &str {
        "DeauthEvaluator"
    }

    fn execute(&self) {
        self.monitor.evaluate();
    }
}

/// Drops expired sentry entries and writes the rest out, so a restart
/// doesn't re-alert on every SSID in range.
pub struct SentrySync {
    sentry: Arc<Sentry>,
    persistence: Arc<dyn PersistenceSink>,
}

impl SentrySync {
    pub fn new(sentry: Arc<Sentry>, persistence: Arc<dyn PersistenceSink>) -> Self {
        Self { sentry, persistence }
    }

    pub fn sync_at(&self, now: DateTime<Utc>) -> usize {
        let expired = self.sentry.expire(now);
        if expired > 0 {
            info!("Expired {} sentry SSIDs", expired);
        }

        let entries = self.sentry.entries();
        if let Err(e) = self.persistence.write_sentry(&entries) {
            error!("Could not write sentry table: {}", e);
        }
        entries.len()
    }
}

impl Periodical for SentrySync {
    fn name(&self) -> &str {
        "SentrySync"
    }

    fn execute(&self) {
        self.sync_at(Utc::now());
    }
}

pub struct OuiUpdater {
    oui: Arc<OuiManager>,
}

impl OuiUpdater {
    pub fn new(oui: Arc<OuiManager>) -> Self {
        Self { oui }
    }
}

impl Periodical for OuiUpdater {
    fn name(&self) -> &str {
        "OuiUpdater"
    }

    fn execute(&self) {
        self.oui.reload();
    }
}

pub struct ContactRecorder {
    contacts: Arc<ContactManager>,
    persistence: Arc<dyn PersistenceSink>,
}

impl ContactRecorder {
    pub fn new(contacts: Arc<ContactManager>, persistence: Arc<dyn PersistenceSink>) -> Self {
        Self { contacts, persistence }
    }
}

impl Periodical for ContactRecorder {
    fn name(&self) -> &str {
        "ContactRecorder"
    }

    fn execute(&self) {
        self.contacts.record_snapshots(self.persistence.as_ref(), Utc::now());
    }
}

pub struct ProbeHealthCheck {
    statuses: Vec<Arc<ProbeStatus>>,
    health: Arc<HealthMonitor>,
}

impl ProbeHealthCheck {
    pub fn new(statuses: Vec<Arc<ProbeStatus>>, health: Arc<HealthMonitor>) -> Self {
        Self { statuses, health }
    }

    pub fn check(&self) -> IndicatorLevel {
        let inactive: Vec<&str> = self
            .statuses
            .iter()
            .filter(|s| !s.is_active())
            .map(|s| s.name())
            .collect();

        if inactive.is_empty() {
            self.health.set(
                PROBES_INDICATOR,
                IndicatorLevel::Green,
                format!("{} probes active", self.statuses.len()),
            );
            IndicatorLevel::Green
        } else {
            warn!("Inactive probes: {}", inactive.join(", "));
            self.health.set(
                PROBES_INDICATOR,
                IndicatorLevel::Red,
                format!("inactive probes: {}", inactive.join(", ")),
            );
            IndicatorLevel::Red
        }
    }
}

impl Periodical for ProbeHealthCheck {
    fn name(&self) -> &str {
        "ProbeHealthCheck"
    }

    fn execute(&self) {
        self.check();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networks::sentry::SentryEntry;
    use crate::persistence::MemoryStore;
    use chrono::Duration;

    #[test]
    fn sentry_sync_persists_live_entries() {
        let sentry = Arc::new(Sentry::new(60));
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        sentry.tick_ssid("old", now - Duration::seconds(120));
        sentry.tick_ssid("fresh", now);

        let sync = SentrySync::new(sentry.clone(), store.clone());
        assert_eq!(sync.sync_at(now), 1);

        let persisted: Vec<SentryEntry> = store.load_sentry().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].ssid, "fresh");
    }

    #[test]
    fn probe_health_turns_red_for_inactive_probe() {
        let health = Arc::new(HealthMonitor::new());
        let up = Arc::new(ProbeStatus::new("probe-1", "wlan0"));
        let down = Arc::new(ProbeStatus::new("probe-2", "wlan1"));
        up.set_active(true);

        let check = ProbeHealthCheck::new(vec![up, down.clone()], health.clone());
        assert_eq!(check.check(), IndicatorLevel::Red);
        assert_eq!(health.level(PROBES_INDICATOR), Some(IndicatorLevel::Red));

        down.set_active(true);
        assert_eq!(check.check(), IndicatorLevel::Green);
    }
}
