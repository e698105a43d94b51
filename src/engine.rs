//! Builds every component from a [`Config`] and owns their lifecycle.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::alerts::{AlertSink, AlertsService, LogAlertSink};
use crate::bandits::contact::run_contact_writer;
use crate::bandits::tracker::{run_tracker_events, Tracker};
use crate::bandits::{Bandit, BanditRegistry, Contact, ContactManager, TrackerEvent, TrackerManager};
use crate::config::Config;
use crate::deauth::DeauthenticationMonitor;
use crate::error::EngineError;
use crate::health::{HealthMonitor, IndicatorStatus};
use crate::interceptors::{
    BanditInterceptor, CryptoChangeInterceptor, DeauthInterceptor, ExpectedNetworks, NetworksInterceptor,
    PwnagotchiInterceptor, SentryInterceptor, UnexpectedBssidInterceptor, UnexpectedChannelInterceptor,
    UnexpectedFingerprintInterceptor, UnexpectedSsidInterceptor,
};
use crate::networks::beacon_rate::BeaconRateManager;
use crate::networks::sentry::Sentry;
use crate::networks::{BssidSnapshot, IgnoredFingerprints, Networks, SignalTrackSettings};
use crate::oui::{OuiLookup, OuiManager, StaticOuiLookup};
use crate::periodicals::{
    BeaconRateAnomalyMonitor, BeaconRateWriter, ContactRecorder, DeauthEvaluator, OuiUpdater, PeriodicalManager,
    ProbeHealthCheck, RecentFramesReset, RetentionCleaner, SentrySync, SignalTrackMonitor,
};
use crate::persistence::{JsonlStore, MemoryStore, PersistenceSink};
use crate::probes::monitor::MonitorProbe;
use crate::probes::sender::SenderProbe;
use crate::probes::trap::build_trap;
use crate::probes::{DeviceFactory, PcapDeviceFactory, ProbeStatusSnapshot, TrapDescription};
use crate::processor::{FrameProcessor, FrameProcessorBuilder};

const TRACKER_EVENT_BUFFER: usize = 1024;
const RECENT_FRAMES_RESET_SECONDS: u64 = 60;
const CONTACT_RECORD_SECONDS: u64 = 60;
const CONTACT_FLUSH_SECONDS: u64 = 5;
const PROBE_HEALTH_SECONDS: u64 = 10;

/// Collaborators that can be swapped out, mostly for tests.
pub struct EngineParts {
    pub devices: Arc<dyn DeviceFactory>,
    pub alert_sink: Arc<dyn AlertSink>,
    /// Overrides the store derived from `general.data_directory`.
    pub persistence: Option<Arc<dyn PersistenceSink>>,
    /// Overrides the OUI file from `general.oui_file`.
    pub oui: Option<Arc<dyn OuiLookup>>,
}

impl Default for EngineParts {
    fn default() -> Self {
        Self {
            devices: Arc::new(PcapDeviceFactory),
            alert_sink: Arc::new(LogAlertSink),
            persistence: None,
            oui: None,
        }
    }
}

pub struct Engine {
    config: Config,
    alerts: Arc<AlertsService>,
    health: Arc<HealthMonitor>,
    persistence: Arc<dyn PersistenceSink>,
    oui_manager: Option<Arc<OuiManager>>,
    ignored: Arc<IgnoredFingerprints>,
    networks: Arc<Networks>,
    expected: Arc<ExpectedNetworks>,
    sentry: Arc<Sentry>,
    deauth: Arc<DeauthenticationMonitor>,
    beacon_rates: Arc<BeaconRateManager>,
    bandits: Arc<BanditRegistry>,
    contacts: Arc<ContactManager>,
    trackers: Arc<TrackerManager>,
    processor: Arc<FrameProcessor>,
    monitor_probes: Vec<Arc<MonitorProbe>>,
    sender_probes: Vec<Arc<SenderProbe>>,

    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    periodicals: PeriodicalManager,
    probe_threads: Mutex<Vec<JoinHandle<()>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    contact_writes: Mutex<Option<mpsc::UnboundedReceiver<crate::persistence::ContactRecord>>>,
    tracker_events: Mutex<Option<mpsc::Receiver<TrackerEvent>>>,
    tracker_sender: mpsc::Sender<TrackerEvent>,
}

impl Engine {
    /// Builds against real interfaces, logging alerts.
    pub fn from_config(config: Config) -> Result<Self, EngineError> {
        Self::new(config, EngineParts::default())
    }

    pub fn new(config: Config, parts: EngineParts) -> Result<Self, EngineError> {
        let health = Arc::new(HealthMonitor::new());
        let alerts = Arc::new(AlertsService::new(
            config.alerting.enabled.iter().copied(),
            parts.alert_sink,
        ));

        let persistence: Arc<dyn PersistenceSink> = match (parts.persistence, &config.general.data_directory) {
            (Some(persistence), _) => persistence,
            (None, Some(directory)) => {
                info!("Persisting to {}", directory.display());
                Arc::new(JsonlStore::open(directory)?)
            }
            (None, None) => {
                warn!("No data directory configured. Nothing will be persisted across restarts.");
                Arc::new(MemoryStore::new())
            }
        };

        let mut oui_manager = None;
        let oui: Arc<dyn OuiLookup> = match (parts.oui, &config.general.oui_file) {
            (Some(oui), _) => oui,
            (None, Some(path)) => {
                let manager = Arc::new(OuiManager::new(path.clone(), Arc::clone(&health)));
                manager.reload();
                oui_manager = Some(Arc::clone(&manager));
                manager
            }
            (None, None) => Arc::new(StaticOuiLookup::new()),
        };

        let ignored = Arc::new(IgnoredFingerprints::from_list(config.ignored_fingerprints.iter().cloned()));
        let networks = Arc::new(Networks::new(
            oui,
            Arc::clone(&ignored),
            SignalTrackSettings::from(&config.signal_tracks),
        ));
        let expected = Arc::new(ExpectedNetworks::new(config.networks.clone()));

        let sentry = Arc::new(Sentry::new(config.sentry.ttl_seconds));
        match persistence.load_sentry() {
            Ok(entries) => sentry.bootstrap(entries, Utc::now()),
            Err(e) => error!("Could not load sentry table, starting empty: {}", e),
        }

        let deauth = Arc::new(DeauthenticationMonitor::new(config.deauth.clone(), Arc::clone(&alerts)));
        let beacon_rates = Arc::new(BeaconRateManager::new(
            Arc::clone(&persistence),
            config.beacon_rate.write_interval_seconds,
            config.beacon_rate.history_size,
        ));

        let (bandits, rejected) = BanditRegistry::from_definitions(&config.bandits);
        if !rejected.is_empty() {
            warn!("{} bandit definitions were rejected", rejected.len());
        }
        let bandits = Arc::new(bandits);

        let (contacts, contact_writes) = ContactManager::new(Arc::clone(&alerts));
        match persistence.load_contacts() {
            Ok(records) => contacts.restore(records),
            Err(e) => error!("Could not load contacts: {}", e),
        }
        let contacts = Arc::new(contacts);
        let trackers = Arc::new(TrackerManager::new());

        let mut builder = FrameProcessorBuilder::new();
        builder
            .register(Arc::new(NetworksInterceptor::new(Arc::clone(&networks))))
            .register(Arc::new(SentryInterceptor::new(
                Arc::clone(&sentry),
                Arc::new(config.networks.clone()),
                Arc::clone(&alerts),
            )))
            .register(Arc::new(UnexpectedBssidInterceptor::new(Arc::clone(&expected), Arc::clone(&alerts))))
            .register(Arc::new(UnexpectedSsidInterceptor::new(Arc::clone(&expected), Arc::clone(&alerts))))
            .register(Arc::new(UnexpectedChannelInterceptor::new(Arc::clone(&expected), Arc::clone(&alerts))))
            .register(Arc::new(UnexpectedFingerprintInterceptor::new(
                Arc::clone(&expected),
                Arc::clone(&alerts),
            )))
            .register(Arc::new(CryptoChangeInterceptor::new(Arc::clone(&expected), Arc::clone(&alerts))))
            .register(Arc::new(DeauthInterceptor::new(Arc::clone(&deauth))))
            .register(Arc::new(PwnagotchiInterceptor::new(Arc::clone(&alerts))))
            .register(Arc::new(BanditInterceptor::new(Arc::clone(&bandits), Arc::clone(&contacts))));

        // Traps are built before the processor so their interceptors can be
        // registered with it.
        let mut traps = Vec::new();
        for sender in &config.sender_probes {
            match build_trap(&sender.trap, Arc::clone(&alerts)) {
                Ok(trap) => {
                    for interceptor in trap.interceptors() {
                        builder.register(interceptor);
                    }
                    traps.push((sender, trap));
                }
                Err(e) => error!("Not starting sender probe [{}]: {}", sender.name, e),
            }
        }

        let processor = Arc::new(builder.build());

        let monitor_probes = config
            .probes
            .iter()
            .map(|probe| {
                Arc::new(MonitorProbe::new(
                    probe.clone(),
                    Arc::clone(&parts.devices),
                    Arc::clone(&processor),
                ))
            })
            .collect();

        let sender_probes = traps
            .into_iter()
            .map(|(sender, trap)| Arc::new(SenderProbe::new(sender, trap, Arc::clone(&parts.devices))))
            .collect();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (tracker_sender, tracker_events) = mpsc::channel(TRACKER_EVENT_BUFFER);

        Ok(Self {
            config,
            alerts,
            health,
            persistence,
            oui_manager,
            ignored,
            networks,
            expected,
            sentry,
            deauth,
            beacon_rates,
            bandits,
            contacts,
            trackers,
            processor,
            monitor_probes,
            sender_probes,
            running: Arc::new(AtomicBool::new(false)),
            shutdown,
            periodicals: PeriodicalManager::new(shutdown_rx),
            probe_threads: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            contact_writes: Mutex::new(Some(contact_writes)),
            tracker_events: Mutex::new(Some(tracker_events)),
            tracker_sender,
        })
    }

    /// Starts probe threads, periodicals and background writers. Must be
    /// called from within a tokio runtime, and only once.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyStarted);
        }

        let (Some(contact_writes), Some(tracker_events)) =
            (self.contact_writes.lock().take(), self.tracker_events.lock().take())
        else {
            return Err(EngineError::AlreadyStarted);
        };

        {
            let mut tasks = self.tasks.lock();
            tasks.push(tokio::spawn(run_contact_writer(
                contact_writes,
                Arc::clone(&self.persistence),
                seconds(CONTACT_FLUSH_SECONDS),
                self.shutdown.subscribe(),
            )));
            tasks.push(tokio::spawn(run_tracker_events(
                tracker_events,
                Arc::clone(&self.trackers),
                Arc::clone(&self.contacts),
                self.shutdown.subscribe(),
            )));
        }

        self.schedule_periodicals();

        let mut threads = self.probe_threads.lock();
        for probe in &self.monitor_probes {
            let name = probe.status().name().to_string();
            let handle = Arc::clone(probe)
                .spawn(Arc::clone(&self.running))
                .map_err(|source| EngineError::Spawn { name, source })?;
            threads.push(handle);
        }
        for probe in &self.sender_probes {
            let name = probe.status().name().to_string();
            let handle = Arc::clone(probe)
                .spawn(Arc::clone(&self.running))
                .map_err(|source| EngineError::Spawn { name, source })?;
            threads.push(handle);
        }

        info!(
            "Started {} monitor probes, {} sender probes and {} periodicals",
            self.monitor_probes.len(),
            self.sender_probes.len(),
            self.periodicals.scheduled()
        );
        Ok(())
    }

    fn schedule_periodicals(&self) {
        let config = &self.config;
        let schedule = |periodical: Arc<dyn crate::periodicals::Periodical>, initial: u64, period: u64| {
            self.periodicals
                .schedule_at_fixed_rate(periodical, seconds(initial), seconds(period));
        };

        let retention = config.general.retention_interval_seconds;
        schedule(
            Arc::new(RetentionCleaner::new(Arc::clone(&self.networks), config.general.retention_seconds)),
            retention,
            retention,
        );

        let beacon_interval = config.beacon_rate.write_interval_seconds;
        schedule(
            Arc::new(BeaconRateWriter::new(Arc::clone(&self.beacon_rates), Arc::clone(&self.networks))),
            beacon_interval,
            beacon_interval,
        );
        // Offset so each evaluation sees the sample written just before.
        schedule(
            Arc::new(BeaconRateAnomalyMonitor::new(
                Arc::clone(&self.expected),
                Arc::clone(&self.beacon_rates),
                Arc::clone(&self.alerts),
            )),
            beacon_interval + 5,
            beacon_interval,
        );

        let signal_interval = config.signal_tracks.monitor_interval_seconds;
        schedule(
            Arc::new(SignalTrackMonitor::new(
                Arc::clone(&self.expected),
                Arc::clone(&self.networks),
                Arc::clone(&self.alerts),
            )),
            signal_interval,
            signal_interval,
        );

        schedule(
            Arc::new(RecentFramesReset::new(Arc::clone(&self.networks))),
            RECENT_FRAMES_RESET_SECONDS,
            RECENT_FRAMES_RESET_SECONDS,
        );

        schedule(
            Arc::new(DeauthEvaluator::new(Arc::clone(&self.deauth))),
            config.deauth.interval_seconds,
            config.deauth.interval_seconds,
        );

        schedule(
            Arc::new(SentrySync::new(Arc::clone(&self.sentry), Arc::clone(&self.persistence))),
            config.sentry.sync_interval_seconds,
            config.sentry.sync_interval_seconds,
        );

        if let Some(oui) = &self.oui_manager {
            let refresh = config.general.oui_refresh_hours * 3600;
            schedule(Arc::new(OuiUpdater::new(Arc::clone(oui))), refresh, refresh);
        }

        schedule(
            Arc::new(ContactRecorder::new(Arc::clone(&self.contacts), Arc::clone(&self.persistence))),
            CONTACT_RECORD_SECONDS,
            CONTACT_RECORD_SECONDS,
        );

        let statuses = self
            .monitor_probes
            .iter()
            .map(|p| p.status())
            .chain(self.sender_probes.iter().map(|p| p.status()))
            .collect();
        schedule(
            Arc::new(ProbeHealthCheck::new(statuses, Arc::clone(&self.health))),
            PROBE_HEALTH_SECONDS,
            PROBE_HEALTH_SECONDS,
        );
    }

    /// Signals every probe and periodical to stop, then waits for them.
    /// Probe threads close their devices on the way out.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.running.store(false, Ordering::Release);
        self.shutdown.send_replace(true);

        let threads: Vec<JoinHandle<()>> = self.probe_threads.lock().drain(..).collect();
        let joined = tokio::task::spawn_blocking(move || {
            for thread in threads {
                if thread.join().is_err() {
                    error!("Probe thread panicked");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            error!("Could not join probe threads: {}", e);
        }

        self.periodicals.join().await;

        let tasks: Vec<tokio::task::JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Background task ended abnormally: {}", e);
            }
        }

        let entries = self.sentry.entries();
        if let Err(e) = self.persistence.write_sentry(&entries) {
            error!("Could not write sentry table on shutdown: {}", e);
        }
        info!("Shutdown complete");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn processor(&self) -> Arc<FrameProcessor> {
        Arc::clone(&self.processor)
    }

    pub fn networks(&self) -> Arc<Networks> {
        Arc::clone(&self.networks)
    }

    pub fn networks_snapshot(&self) -> Vec<BssidSnapshot> {
        self.networks.snapshot()
    }

    pub fn ssids(&self) -> BTreeSet<String> {
        self.networks.ssids()
    }

    pub fn probe_statuses(&self) -> Vec<ProbeStatusSnapshot> {
        self.monitor_probes
            .iter()
            .map(|p| p.status().snapshot(None))
            .chain(self.sender_probes.iter().map(|p| p.snapshot()))
            .collect()
    }

    pub fn traps(&self) -> Vec<TrapDescription> {
        self.sender_probes.iter().map(|p| p.trap().describe()).collect()
    }

    pub fn bandits(&self) -> Vec<Arc<Bandit>> {
        self.bandits.all()
    }

    pub fn bandit_hash(&self) -> String {
        self.bandits.hash()
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts.contacts()
    }

    pub fn contacts_of_bandit(&self, bandit_uuid: &Uuid) -> Vec<Contact> {
        self.contacts.contacts_of_bandit(bandit_uuid)
    }

    pub fn trackers(&self) -> Vec<Tracker> {
        self.trackers.trackers()
    }

    pub fn tracker_sender(&self) -> mpsc::Sender<TrackerEvent> {
        self.tracker_sender.clone()
    }

    pub fn ignore_fingerprint(&self, fingerprint: &str) {
        info!("Ignoring fingerprint [{}]", fingerprint);
        self.ignored.register(fingerprint);
    }

    pub fn ignored_fingerprints(&self) -> Vec<String> {
        self.ignored.list()
    }

    pub fn retention_clean(&self) -> usize {
        self.networks.retention_clean(self.config.general.retention_seconds)
    }

    pub fn reset_networks(&self) {
        info!("Resetting all network state");
        self.networks.reset();
    }

    pub fn health(&self) -> Vec<IndicatorStatus> {
        self.health.statuses()
    }
}

/// Periods of zero would make the tokio interval panic.
fn seconds(value: u64) -> Duration {
    Duration::from_secs(value.max(1))
}
