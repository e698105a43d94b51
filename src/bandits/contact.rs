use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::identifier::BanditIdentifier;
use super::tracker::ContactStatus;
use super::Bandit;
use crate::alerts::{Alert, AlertsService};
use crate::error::InterceptorError;
use crate::frame::Dot11Frame;
use crate::periodicals::wait_for_shutdown;
use crate::persistence::{ContactRecord, ContactSnapshot, PersistenceSink};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contact {
    pub uuid: Uuid,
    pub bandit_uuid: Uuid,
    pub bandit_id: Option<i64>,
    /// Transmitter fingerprint, or its MAC address for frames that carry
    /// no fingerprint.
    pub fingerprint: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub frame_count: u64,
    pub last_signal: Option<i32>,
    #[serde(skip)]
    recent_frames: u64,
    #[serde(skip)]
    recent_signal_sum: i64,
}

impl Contact {
    fn new(bandit: &Bandit, fingerprint: String, seen: DateTime<Utc>, signal: i32) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            bandit_uuid: bandit.uuid,
            bandit_id: bandit.database_id,
            fingerprint,
            first_seen: seen,
            last_seen: seen,
            frame_count: 1,
            last_signal: Some(signal),
            recent_frames: 1,
            recent_signal_sum: i64::from(signal),
        }
    }

    fn from_record(record: ContactRecord) -> Self {
        Self {
            uuid: record.uuid,
            bandit_uuid: record.bandit_uuid,
            bandit_id: record.bandit_id,
            fingerprint: record.fingerprint,
            first_seen: record.first_seen,
            last_seen: record.last_seen,
            frame_count: record.frame_count,
            last_signal: None,
            recent_frames: 0,
            recent_signal_sum: 0,
        }
    }

    fn record_frame(&mut self, seen: DateTime<Utc>, signal: i32) {
        self.last_seen = self.last_seen.max(seen);
        self.frame_count += 1;
        self.last_signal = Some(signal);
        self.recent_frames += 1;
        self.recent_signal_sum += i64::from(signal);
    }

    pub fn to_record(&self) -> ContactRecord {
        ContactRecord {
            uuid: self.uuid,
            bandit_uuid: self.bandit_uuid,
            bandit_id: self.bandit_id,
            fingerprint: self.fingerprint.clone(),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            frame_count: self.frame_count,
        }
    }
}

/// Sightings of bandit-matching transmitters, keyed by (bandit, fingerprint).
///
/// Called inline from the frame path. Persistence is handed to a queue that
/// [`run_contact_writer`] drains.
pub struct ContactManager {
    contacts: DashMap<(Uuid, String), Contact>,
    tracker_status: DashMap<Uuid, ContactStatus>,
    alerts: Arc<AlertsService>,
    writes: mpsc::UnboundedSender<ContactRecord>,
}

impl ContactManager {
    pub fn new(alerts: Arc<AlertsService>) -> (Self, mpsc::UnboundedReceiver<ContactRecord>) {
        let (writes, rx) = mpsc::unbounded_channel();
        let manager = Self {
            contacts: DashMap::new(),
            tracker_status: DashMap::new(),
            alerts,
            writes,
        };
        (manager, rx)
    }

    /// Re-attaches persisted contacts so their identity survives restarts.
    pub fn restore(&self, records: Vec<ContactRecord>) {
        let count = records.len();
        for record in records {
            let key = (record.bandit_uuid, record.fingerprint.clone());
            self.contacts.insert(key, Contact::from_record(record));
        }
        info!("Restored {} contacts", count);
    }

    /// Records a frame matched by `bandit`. Returns `true` when this created
    /// a new contact.
    pub fn register_match(
        &self,
        bandit: &Bandit,
        identifier: &BanditIdentifier,
        frame: &Dot11Frame,
    ) -> Result<bool, InterceptorError> {
        let key = contact_key(frame);
        let seen = frame.meta().timestamp;
        let signal = frame.antenna_signal();

        let (record, created) = match self.contacts.entry((bandit.uuid, key.clone())) {
            Entry::Occupied(mut occupied) => {
                let contact = occupied.get_mut();
                contact.record_frame(seen, signal);
                (contact.to_record(), false)
            }
            Entry::Vacant(vacant) => {
                let contact = Contact::new(bandit, key, seen, signal);
                let record = contact.to_record();
                vacant.insert(contact);
                (record, true)
            }
        };

        if created {
            info!(
                "New contact [{}] with bandit [{}] on [{}]",
                record.uuid, bandit.name, record.fingerprint
            );
            self.alerts.handle_at(
                Alert::BanditContact {
                    bandit_uuid: bandit.uuid,
                    bandit_name: bandit.name.clone(),
                    contact_uuid: record.uuid,
                    identifier: identifier.to_string(),
                },
                seen,
            );
        }

        self.writes
            .send(record)
            .map_err(|_| InterceptorError::QueueClosed)?;

        Ok(created)
    }

    pub fn find(&self, bandit_uuid: &Uuid, fingerprint: &str) -> Option<Contact> {
        self.contacts
            .get(&(*bandit_uuid, fingerprint.to_string()))
            .map(|c| c.value().clone())
    }

    pub fn contacts(&self) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = self.contacts.iter().map(|c| c.value().clone()).collect();
        contacts.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        contacts
    }

    pub fn contacts_of_bandit(&self, bandit_uuid: &Uuid) -> Vec<Contact> {
        self.contacts()
            .into_iter()
            .filter(|c| &c.bandit_uuid == bandit_uuid)
            .collect()
    }

    /// Closes the current interval for every contact that saw frames in it
    /// and persists one snapshot per such contact.
    pub fn record_snapshots(&self, persistence: &dyn PersistenceSink, now: DateTime<Utc>) -> usize {
        let mut snapshots = Vec::new();
        for mut contact in self.contacts.iter_mut() {
            if contact.recent_frames == 0 {
                continue;
            }
            let average_signal = (contact.recent_signal_sum / contact.recent_frames as i64) as i32;
            snapshots.push(ContactSnapshot {
                contact_uuid: contact.uuid,
                frame_count: contact.recent_frames,
                average_signal: Some(average_signal),
                created_at: now,
            });
            contact.recent_frames = 0;
            contact.recent_signal_sum = 0;
        }

        let mut written = 0;
        for snapshot in &snapshots {
            match persistence.write_contact_snapshot(snapshot) {
                Ok(()) => written += 1,
                Err(e) => error!("Could not write snapshot of contact [{}]: {}", snapshot.contact_uuid, e),
            }
        }
        written
    }

    pub fn register_tracker_status(&self, status: ContactStatus) {
        debug!(
            "Tracker [{}] reports bandit [{}] at {} dBm",
            status.tracker, status.bandit_uuid, status.rssi
        );
        match self.tracker_status.entry(status.bandit_uuid) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().timestamp <= status.timestamp {
                    occupied.insert(status);
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(status);
            }
        }
    }

    pub fn tracker_status(&self, bandit_uuid: &Uuid) -> Option<ContactStatus> {
        self.tracker_status.get(bandit_uuid).map(|s| s.value().clone())
    }
}

fn contact_key(frame: &Dot11Frame) -> String {
    match frame.transmitter_fingerprint() {
        Some(fingerprint) => fingerprint.to_string(),
        None => frame.transmitter().to_string(),
    }
}

/// Drains contact writes off the frame path. Updates are coalesced per
/// contact and written once per `flush_interval`, so a busy contact costs one
/// record per interval instead of one per frame. On shutdown whatever is
/// pending or still queued is written before returning.
pub async fn run_contact_writer(
    mut writes: mpsc::UnboundedReceiver<ContactRecord>,
    persistence: Arc<dyn PersistenceSink>,
    flush_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = flush_interval.max(Duration::from_millis(1));
    let mut flush = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut pending: HashMap<Uuid, ContactRecord> = HashMap::new();

    loop {
        tokio::select! {
            record = writes.recv() => match record {
                Some(record) => {
                    coalesce(&mut pending, record);
                    for next in drain_queued(&mut writes) {
                        coalesce(&mut pending, next);
                    }
                }
                None => break,
            },
            _ = flush.tick() => {
                if !pending.is_empty() {
                    write_batch(&persistence, std::mem::take(&mut pending)).await;
                }
            }
            _ = wait_for_shutdown(&mut shutdown) => {
                for next in drain_queued(&mut writes) {
                    coalesce(&mut pending, next);
                }
                break;
            }
        }
    }

    if !pending.is_empty() {
        write_batch(&persistence, pending).await;
    }
    debug!("Contact writer stopped");
}

/// Keeps the most advanced record per contact.
fn coalesce(pending: &mut HashMap<Uuid, ContactRecord>, record: ContactRecord) {
    match pending.get(&record.uuid) {
        Some(existing) if existing.frame_count > record.frame_count => {}
        _ => {
            pending.insert(record.uuid, record);
        }
    }
}

fn drain_queued(writes: &mut mpsc::UnboundedReceiver<ContactRecord>) -> Vec<ContactRecord> {
    let mut batch = Vec::new();
    while let Ok(next) = writes.try_recv() {
        batch.push(next);
    }
    batch
}

async fn write_batch(persistence: &Arc<dyn PersistenceSink>, batch: HashMap<Uuid, ContactRecord>) {
    let persistence = Arc::clone(persistence);
    let result = tokio::task::spawn_blocking(move || {
        for record in batch.values() {
            if let Err(e) = persistence.write_contact(record) {
                error!("Could not persist contact [{}]: {}", record.uuid, e);
            }
        }
    })
    .await;

    if let Err(e) = result {
        warn!("Contact writer batch failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::alerts::{AlertType, MemoryAlertSink};
    use crate::bandits::IdentifierKind;
    use crate::frame::{AdvertisementFrame, FrameMeta, MacAddr, TaggedParameters};

    fn bandit() -> Bandit {
        Bandit {
            uuid: Uuid::new_v4(),
            database_id: Some(1),
            name: "evil".to_string(),
            description: String::new(),
            identifiers: vec![BanditIdentifier::new(
                IdentifierKind::Fingerprint {
                    fingerprint: "abc123".to_string(),
                },
                None,
                Uuid::new_v4(),
            )],
        }
    }

    fn beacon(fingerprint: Option<&str>, signal: i32, ts: DateTime<Utc>) -> Dot11Frame {
        Dot11Frame::Beacon(AdvertisementFrame {
            transmitter: MacAddr([2, 0, 0, 0, 0, 1]),
            destination: MacAddr::BROADCAST,
            ssid: Some("x".to_string()),
            tagged: TaggedParameters {
                fingerprint: fingerprint.map(str::to_string),
                ..Default::default()
            },
            meta: FrameMeta::new(1, signal, ts),
        })
    }

    #[test]
    fn snapshots_average_recent_signal() {
        let sink = Arc::new(MemoryAlertSink::new());
        let (manager, _rx) = ContactManager::new(Arc::new(AlertsService::all_enabled(sink.clone())));
        let bandit = bandit();
        let now = Utc::now();

        manager
            .register_match(&bandit, &bandit.identifiers[0], &beacon(Some("abc123"), -40, now))
            .unwrap();
        manager
            .register_match(&bandit, &bandit.identifiers[0], &beacon(Some("abc123"), -60, now))
            .unwrap();

        let store = crate::persistence::MemoryStore::new();
        assert_eq!(manager.record_snapshots(&store, now), 1);
        assert_eq!(store.contact_snapshots()[0].average_signal, Some(-50));
        assert_eq!(store.contact_snapshots()[0].frame_count, 2);
        assert_eq!(manager.record_snapshots(&store, now), 0);
        assert_eq!(sink.count(AlertType::BanditContact), 1);
    }

    #[test]
    fn frames_without_fingerprint_key_on_transmitter() {
        let (manager, _rx) = ContactManager::new(Arc::new(AlertsService::all_enabled(Arc::new(
            MemoryAlertSink::new(),
        ))));
        let bandit = bandit();
        manager
            .register_match(&bandit, &bandit.identifiers[0], &beacon(None, -40, Utc::now()))
            .unwrap();
        assert!(manager.find(&bandit.uuid, "02:00:00:00:00:01").is_some());
    }

    #[test]
    fn closed_queue_is_reported_but_state_is_kept() {
        let (manager, rx) = ContactManager::new(Arc::new(AlertsService::all_enabled(Arc::new(
            MemoryAlertSink::new(),
        ))));
        drop(rx);
        let bandit = bandit();
        let result = manager.register_match(&bandit, &bandit.identifiers[0], &beacon(Some("abc123"), -40, Utc::now()));
        assert!(matches!(result, Err(InterceptorError::QueueClosed)));
        assert_eq!(manager.contacts().len(), 1);
    }

    #[test]
    fn restored_contacts_keep_identity() {
        let (manager, _rx) = ContactManager::new(Arc::new(AlertsService::all_enabled(Arc::new(
            MemoryAlertSink::new(),
        ))));
        let bandit = bandit();
        let earlier = Utc::now() - Duration::hours(1);
        let uuid = Uuid::new_v4();
        manager.restore(vec![ContactRecord {
            uuid,
            bandit_uuid: bandit.uuid,
            bandit_id: bandit.database_id,
            fingerprint: "abc123".to_string(),
            first_seen: earlier,
            last_seen: earlier,
            frame_count: 9,
        }]);

        let created = manager
            .register_match(&bandit, &bandit.identifiers[0], &beacon(Some("abc123"), -40, Utc::now()))
            .unwrap();
        assert!(!created);
        let contact = manager.find(&bandit.uuid, "abc123").unwrap();
        assert_eq!(contact.uuid, uuid);
        assert_eq!(contact.frame_count, 10);
        assert_eq!(contact.first_seen, earlier);
    }
}
