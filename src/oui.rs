//! Vendor lookups by MAC address prefix.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, error, info};
use parking_lot::RwLock;

use crate::error::OuiError;
use crate::frame::MacAddr;
use crate::health::{HealthMonitor, IndicatorLevel};

pub const HEALTH_INDICATOR: &str = "oui";

/// Consecutive reload failures after which the indicator goes unavailable.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

pub trait OuiLookup: Send + Sync {
    fn lookup(&self, mac: &MacAddr) -> Option<String>;
}

/// Fixed table, mostly for tests and setups without an OUI file.
#[derive(Debug, Default)]
pub struct StaticOuiLookup {
    vendors: HashMap<[u8; 3], String>,
}

impl StaticOuiLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vendor(mut self, prefix: [u8; 3], vendor: &str) -> Self {
        self.vendors.insert(prefix, vendor.to_string());
        self
    }
}

impl OuiLookup for StaticOuiLookup {
    fn lookup(&self, mac: &MacAddr) -> Option<String> {
        self.vendors.get(&mac.oui()).cloned()
    }
}

/// Loads a Wireshark `manuf`-style file and reloads it on demand. A failed
/// reload keeps serving the previous table.
pub struct OuiManager {
    path: PathBuf,
    table: RwLock<HashMap<[u8; 3], String>>,
    failures: AtomicU32,
    health: Arc<HealthMonitor>,
}

impl OuiManager {
    pub fn new(path: PathBuf, health: Arc<HealthMonitor>) -> Self {
        Self {
            path,
            table: RwLock::new(HashMap::new()),
            failures: AtomicU32::new(0),
            health,
        }
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn reload(&self) {
        match load_manuf(&self.path) {
            Ok(table) => {
                info!("Loaded {} OUI entries from {}", table.len(), self.path.display());
                *self.table.write() = table;
                self.failures.store(0, Ordering::Release);
                self.health.set(HEALTH_INDICATOR, IndicatorLevel::Green, "OUI table loaded");
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    debug!("OUI reload failed again ({} in a row): {}", failures, e);
                    self.health.set(
                        HEALTH_INDICATOR,
                        IndicatorLevel::Unavailable,
                        format!("{} consecutive reload failures: {}", failures, e),
                    );
                } else {
                    error!("Could not reload OUI table, keeping previous entries: {}", e);
                    self.health.set(HEALTH_INDICATOR, IndicatorLevel::Orange, e.to_string());
                }
            }
        }
    }
}

impl OuiLookup for OuiManager {
    fn lookup(&self, mac: &MacAddr) -> Option<String> {
        self.table.read().get(&mac.oui()).cloned()
    }
}

fn load_manuf(path: &Path) -> Result<HashMap<[u8; 3], String>, OuiError> {
    let raw = fs::read_to_string(path).map_err(|source| OuiError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let table = parse_manuf(&raw);
    if table.is_empty() {
        return Err(OuiError::Empty(path.to_path_buf()));
    }
    Ok(table)
}

/// `00:00:0C<TAB>Cisco<TAB>Cisco Systems, Inc`. The long name wins when
/// present. Prefixes longer than 24 bits are skipped.
pub fn parse_manuf(raw: &str) -> HashMap<[u8; 3], String> {
    let mut table = HashMap::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split('\t').filter(|f| !f.is_empty());
        let Some(prefix) = fields.next() else {
            continue;
        };
        let Some(short) = fields.next() else {
            continue;
        };
        let vendor = fields.next().unwrap_or(short).trim();

        let octets: Vec<&str> = prefix.split(|c| c == ':' || c == '-').collect();
        if octets.len() != 3 {
            continue;
        }

        let mut key = [0u8; 3];
        let mut valid = true;
        for (slot, octet) in key.iter_mut().zip(octets) {
            match u8::from_str_radix(octet, 16) {
                Ok(v) => *slot = v,
                Err(_) => valid = false,
            }
        }

        if valid {
            table.insert(key, vendor.to_string());
        }
    }

    table
}
