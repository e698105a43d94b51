//! Append-only persistence seam for beacon-rate history, contacts and the
//! sentry table.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::frame::MacAddr;
use crate::networks::sentry::SentryEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconRateSample {
    pub bssid: MacAddr,
    pub ssid: String,
    pub beacon_count: u64,
    pub interval_seconds: u64,
    pub created_at: DateTime<Utc>,
}

impl BeaconRateSample {
    /// Beacons per second over the sampled interval.
    pub fn rate(&self) -> f64 {
        if self.interval_seconds == 0 {
            return 0.0;
        }
        self.beacon_count as f64 / self.interval_seconds as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub uuid: Uuid,
    pub bandit_uuid: Uuid,
    pub bandit_id: Option<i64>,
    pub fingerprint: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub frame_count: u64,
}

/// Per-interval activity of one contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSnapshot {
    pub contact_uuid: Uuid,
    pub frame_count: u64,
    pub average_signal: Option<i32>,
    pub created_at: DateTime<Utc>,
}

pub trait PersistenceSink: Send + Sync {
    fn write_beacon_rate(&self, sample: &BeaconRateSample) -> Result<(), PersistenceError>;
    fn write_contact(&self, contact: &ContactRecord) -> Result<(), PersistenceError>;
    fn write_contact_snapshot(&self, snapshot: &ContactSnapshot) -> Result<(), PersistenceError>;
    fn write_sentry(&self, entries: &[SentryEntry]) -> Result<(), PersistenceError>;
    fn load_sentry(&self) -> Result<Vec<SentryEntry>, PersistenceError>;
    /// Latest record per contact.
    fn load_contacts(&self) -> Result<Vec<ContactRecord>, PersistenceError>;
}

const BEACON_RATES_FILE: &str = "beacon_rates.jsonl";
const CONTACTS_FILE: &str = "contacts.jsonl";
const CONTACT_SNAPSHOTS_FILE: &str = "contact_snapshots.jsonl";
const SENTRY_FILE: &str = "sentry.json";

/// JSON lines files in one directory. Contacts are appended on every
/// update; loading keeps the last line per contact UUID.
pub struct JsonlStore {
    directory: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn open(directory: &Path) -> Result<Self, PersistenceError> {
        fs::create_dir_all(directory).map_err(|source| PersistenceError::Io {
            path: directory.to_path_buf(),
            source,
        })?;
        Ok(Self {
            directory: directory.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    fn append<T: Serialize>(&self, file: &str, value: &T) -> Result<(), PersistenceError> {
        let path = self.directory.join(file);
        let line = serde_json::to_string(value)?;

        let _guard = self.write_lock.lock();
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| PersistenceError::Io { path: path.clone(), source })?;
        writeln!(handle, "{}", line).map_err(|source| PersistenceError::Io { path, source })?;
        Ok(())
    }

    /// Reads every decodable line. Torn or corrupt lines are logged and
    /// skipped; the second value is the number skipped.
    fn read_lines<T: DeserializeOwned>(&self, file: &str) -> Result<(Vec<T>, usize), PersistenceError> {
        let path = self.directory.join(file);
        if !path.exists() {
            return Ok((Vec::new(), 0));
        }
        let handle = fs::File::open(&path)
            .map_err(|source| PersistenceError::Io { path: path.clone(), source })?;

        let mut values = Vec::new();
        let mut skipped = 0;
        for (index, line) in BufReader::new(handle).lines().enumerate() {
            let line = line.map_err(|source| PersistenceError::Io { path: path.clone(), source })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(value) => values.push(value),
                Err(e) => {
                    warn!("Skipping undecodable line {} of {}: {}", index + 1, path.display(), e);
                    skipped += 1;
                }
            }
        }
        Ok((values, skipped))
    }

    /// Replaces `file` with one line per value.
    fn rewrite<T: Serialize>(&self, file: &str, values: &[T]) -> Result<(), PersistenceError> {
        let path = self.directory.join(file);
        let tmp = self.directory.join(format!("{}.tmp", file));
        let mut raw = Vec::new();
        for value in values {
            serde_json::to_writer(&mut raw, value)?;
            raw.push(b'\n');
        }

        let _guard = self.write_lock.lock();
        fs::write(&tmp, raw).map_err(|source| PersistenceError::Io { path: tmp.clone(), source })?;
        fs::rename(&tmp, &path).map_err(|source| PersistenceError::Io { path, source })?;
        Ok(())
    }
}

impl PersistenceSink for JsonlStore {
    fn write_beacon_rate(&self, sample: &BeaconRateSample) -> Result<(), PersistenceError> {
        self.append(BEACON_RATES_FILE, sample)
    }

    fn write_contact(&self, contact: &ContactRecord) -> Result<(), PersistenceError> {
        self.append(CONTACTS_FILE, contact)
    }

    fn write_contact_snapshot(&self, snapshot: &ContactSnapshot) -> Result<(), PersistenceError> {
        self.append(CONTACT_SNAPSHOTS_FILE, snapshot)
    }

    fn write_sentry(&self, entries: &[SentryEntry]) -> Result<(), PersistenceError> {
        let path = self.directory.join(SENTRY_FILE);
        let tmp = self.directory.join(format!("{}.tmp", SENTRY_FILE));
        let json = serde_json::to_vec(entries)?;

        let _guard = self.write_lock.lock();
        fs::write(&tmp, json).map_err(|source| PersistenceError::Io { path: tmp.clone(), source })?;
        fs::rename(&tmp, &path).map_err(|source| PersistenceError::Io { path, source })?;
        Ok(())
    }

    fn load_sentry(&self) -> Result<Vec<SentryEntry>, PersistenceError> {
        let path = self.directory.join(SENTRY_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read(&path).map_err(|source| PersistenceError::Io { path, source })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Also compacts the file down to the returned records when it held
    /// superseded or undecodable lines.
    fn load_contacts(&self) -> Result<Vec<ContactRecord>, PersistenceError> {
        let (records, skipped) = self.read_lines::<ContactRecord>(CONTACTS_FILE)?;
        let lines = records.len() + skipped;
        let latest = latest_per_contact(records);

        if lines > latest.len() {
            match self.rewrite(CONTACTS_FILE, &latest) {
                Ok(()) => info!("Compacted {} contact lines into {}", lines, latest.len()),
                Err(e) => warn!("Could not compact contacts: {}", e),
            }
        }
        Ok(latest)
    }
}

/// Last record per contact UUID, in order of first appearance.
fn latest_per_contact(records: Vec<ContactRecord>) -> Vec<ContactRecord> {
    let mut positions: HashMap<Uuid, usize> = HashMap::new();
    let mut latest: Vec<ContactRecord> = Vec::new();
    for record in records {
        match positions.get(&record.uuid) {
            Some(&position) => latest[position] = record,
            None => {
                positions.insert(record.uuid, latest.len());
                latest.push(record);
            }
        }
    }
    latest
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    beacon_rates: Mutex<Vec<BeaconRateSample>>,
    contacts: Mutex<Vec<ContactRecord>>,
    contact_snapshots: Mutex<Vec<ContactSnapshot>>,
    sentry: Mutex<Vec<SentryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn beacon_rates(&self) -> Vec<BeaconRateSample> {
        self.beacon_rates.lock().clone()
    }

    pub fn contact_writes(&self) -> Vec<ContactRecord> {
        self.contacts.lock().clone()
    }

    pub fn contact_snapshots(&self) -> Vec<ContactSnapshot> {
        self.contact_snapshots.lock().clone()
    }
}

impl PersistenceSink for MemoryStore {
    fn write_beacon_rate(&self, sample: &BeaconRateSample) -> Result<(), PersistenceError> {
        self.beacon_rates.lock().push(sample.clone());
        Ok(())
    }

    fn write_contact(&self, contact: &ContactRecord) -> Result<(), PersistenceError> {
        self.contacts.lock().push(contact.clone());
        Ok(())
    }

    fn write_contact_snapshot(&self, snapshot: &ContactSnapshot) -> Result<(), PersistenceError> {
        self.contact_snapshots.lock().push(snapshot.clone());
        Ok(())
    }

    fn write_sentry(&self, entries: &[SentryEntry]) -> Result<(), PersistenceError> {
        *self.sentry.lock() = entries.to_vec();
        Ok(())
    }

    fn load_sentry(&self) -> Result<Vec<SentryEntry>, PersistenceError> {
        Ok(self.sentry.lock().clone())
    }

    fn load_contacts(&self) -> Result<Vec<ContactRecord>, PersistenceError> {
        Ok(latest_per_contact(self.contacts.lock().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uuid: Uuid, frame_count: u64) -> ContactRecord {
        let now = Utc::now();
        ContactRecord {
            uuid,
            bandit_uuid: Uuid::nil(),
            bandit_id: None,
            fingerprint: "abc123".to_string(),
            first_seen: now,
            last_seen: now,
            frame_count,
        }
    }

    #[test]
    fn jsonl_store_keeps_latest_contact_record() {
        let dir = std::env::temp_dir().join(format!("wifi-ids-store-{}", Uuid::new_v4()));
        let store = JsonlStore::open(&dir).unwrap();

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        store.write_contact(&record(first, 1)).unwrap();
        store.write_contact(&record(second, 1)).unwrap();
        store.write_contact(&record(first, 7)).unwrap();

        let contacts = store.load_contacts().unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts.iter().find(|c| c.uuid == first).unwrap().frame_count, 7);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn torn_contact_line_does_not_lose_other_records() {
        let dir = std::env::temp_dir().join(format!("wifi-ids-store-{}", Uuid::new_v4()));
        let store = JsonlStore::open(&dir).unwrap();

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        store.write_contact(&record(first, 3)).unwrap();
        {
            let mut handle = OpenOptions::new().append(true).open(dir.join(CONTACTS_FILE)).unwrap();
            write!(handle, "{{\"uuid\":\"12").unwrap();
            writeln!(handle).unwrap();
        }
        store.write_contact(&record(second, 1)).unwrap();

        let contacts = store.load_contacts().unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].uuid, first);
        assert_eq!(contacts[0].frame_count, 3);
        assert_eq!(contacts[1].uuid, second);

        // The torn line was compacted away.
        let raw = fs::read_to_string(dir.join(CONTACTS_FILE)).unwrap();
        assert_eq!(raw.lines().count(), 2);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn loading_contacts_compacts_superseded_lines() {
        let dir = std::env::temp_dir().join(format!("wifi-ids-store-{}", Uuid::new_v4()));
        let store = JsonlStore::open(&dir).unwrap();

        let contact = Uuid::new_v4();
        for frame_count in 1..=20 {
            store.write_contact(&record(contact, frame_count)).unwrap();
        }

        let contacts = store.load_contacts().unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].frame_count, 20);

        let raw = fs::read_to_string(dir.join(CONTACTS_FILE)).unwrap();
        assert_eq!(raw.lines().count(), 1);
        assert_eq!(store.load_contacts().unwrap(), contacts);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn jsonl_store_round_trips_sentry_table() {
        let dir = std::env::temp_dir().join(format!("wifi-ids-store-{}", Uuid::new_v4()));
        let store = JsonlStore::open(&dir).unwrap();
        assert!(store.load_sentry().unwrap().is_empty());

        let now = Utc::now();
        let entries = vec![SentryEntry {
            ssid: "CorpNet".to_string(),
            first_seen: now,
            last_seen: now,
        }];
        store.write_sentry(&entries).unwrap();
        assert_eq!(store.load_sentry().unwrap(), entries);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn beacon_rate_is_per_second() {
        let sample = BeaconRateSample {
            bssid: MacAddr([0; 6]),
            ssid: "CorpNet".to_string(),
            beacon_count: 600,
            interval_seconds: 60,
            created_at: Utc::now(),
        };
        assert_eq!(sample.rate(), 10.0);
    }
}
