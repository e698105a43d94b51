//! TTL cache of SSIDs that have already been seen, used to raise the
//! unknown-SSID alert once per newly appearing network instead of once per
//! frame.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{expired, window};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentryEntry {
    pub ssid: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

pub struct Sentry {
    ssids: DashMap<String, SentryEntry>,
    /// `None` keeps entries forever.
    ttl: Option<Duration>,
}

impl Sentry {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ssids: DashMap::new(),
            ttl: window(ttl_seconds),
        }
    }

    /// Seeds the table from persisted entries. Entries that are already
    /// past their TTL are skipped.
    pub fn bootstrap(&self, entries: Vec<SentryEntry>, now: DateTime<Utc>) {
        let mut loaded = 0;
        for entry in entries {
            if self.is_live(&entry, now) {
                self.ssids.insert(entry.ssid.clone(), entry);
                loaded += 1;
            }
        }
        info!("Sentry bootstrapped with {} SSIDs", loaded);
    }

    /// Inserts or refreshes `name`. Returns `true` when this tick made the
    /// SSID known, i.e. it was absent or had expired. Concurrent ticks for
    /// the same name see `true` at most once.
    pub fn tick_ssid(&self, name: &str, timestamp: DateTime<Utc>) -> bool {
        match self.ssids.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if self.is_live(occupied.get(), timestamp) {
                    let entry = occupied.get_mut();
                    entry.last_seen = entry.last_seen.max(timestamp);
                    false
                } else {
                    debug!("Sentry SSID [{}] expired and reappeared", name);
                    occupied.insert(SentryEntry {
                        ssid: name.to_string(),
                        first_seen: timestamp,
                        last_seen: timestamp,
                    });
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(SentryEntry {
                    ssid: name.to_string(),
                    first_seen: timestamp,
                    last_seen: timestamp,
                });
                true
            }
        }
    }

    pub fn knows_ssid(&self, name: &str) -> bool {
        self.knows_ssid_at(name, Utc::now())
    }

    pub fn knows_ssid_at(&self, name: &str, now: DateTime<Utc>) -> bool {
        self.ssids
            .get(name)
            .map_or(false, |entry| self.is_live(&entry, now))
    }

    /// Drops entries whose TTL ran out. Returns the number removed.
    pub fn expire(&self, now: DateTime<Utc>) -> usize {
        let before = self.ssids.len();
        self.ssids.retain(|_, entry| self.is_live(entry, now));
        before.saturating_sub(self.ssids.len())
    }

    pub fn entries(&self) -> Vec<SentryEntry> {
        let mut entries: Vec<SentryEntry> = self.ssids.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.ssid.cmp(&b.ssid));
        entries
    }

    pub fn len(&self) -> usize {
        self.ssids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ssids.is_empty()
    }

    fn is_live(&self, entry: &SentryEntry, now: DateTime<Utc>) -> bool {
        !expired(entry.last_seen, self.ttl, now)
    }
}
