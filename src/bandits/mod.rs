//! Threat signatures ("bandits") and the sightings they produce.

pub mod contact;
pub mod identifier;
pub mod tracker;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use log::{error, info};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub use contact::{Contact, ContactManager};
pub use identifier::{BanditIdentifier, IdentifierKind, IdentifierType};
pub use tracker::{ContactStatus, Ping, TrackerEvent, TrackerManager};

use crate::config::BanditDefinition;
use crate::error::BanditError;
use crate::frame::Dot11Frame;

/// Namespace for UUIDs derived from bandit names when none is configured.
const BANDIT_NAMESPACE: Uuid = Uuid::from_u128(0x5d1c_7a3e_9b2f_4c8d_a6e1_0f3b_2c4d_8e7a);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bandit {
    pub uuid: Uuid,
    pub database_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub identifiers: Vec<BanditIdentifier>,
}

impl Bandit {
    /// A bandit matches when any of its identifiers does. Returns the first
    /// matching identifier.
    pub fn matching_identifier(&self, frame: &Dot11Frame) -> Option<&BanditIdentifier> {
        self.identifiers.iter().find(|i| i.matches(frame))
    }

    pub fn matches(&self, frame: &Dot11Frame) -> bool {
        self.matching_identifier(frame).is_some()
    }

    /// Builds a bandit from its definition. Identifier UUIDs are derived from
    /// the bandit UUID and their position, so they survive restarts.
    pub fn from_definition(definition: &BanditDefinition, database_id: Option<i64>) -> Result<Self, BanditError> {
        let uuid = definition
            .uuid
            .unwrap_or_else(|| Uuid::new_v5(&BANDIT_NAMESPACE, definition.name.as_bytes()));

        let mut identifiers = Vec::with_capacity(definition.identifiers.len());
        for (i, raw) in definition.identifiers.iter().enumerate() {
            let identifier_uuid = Uuid::new_v5(&uuid, i.to_string().as_bytes());
            identifiers.push(BanditIdentifier::create(
                &raw.identifier_type,
                &raw.configuration,
                None,
                identifier_uuid,
            )?);
        }

        Ok(Self {
            uuid,
            database_id,
            name: definition.name.clone(),
            description: definition.description.clone(),
            identifiers,
        })
    }
}

/// All loaded bandits. Read on every frame, written rarely.
#[derive(Debug)]
pub struct BanditRegistry {
    bandits: RwLock<Vec<Arc<Bandit>>>,
    next_id: AtomicI64,
}

impl BanditRegistry {
    pub fn new() -> Self {
        Self {
            bandits: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Loads every definition that builds. A broken definition is logged and
    /// skipped; the rest still load.
    pub fn from_definitions(definitions: &[BanditDefinition]) -> (Self, Vec<(String, BanditError)>) {
        let registry = Self::new();
        let mut rejected = Vec::new();

        for definition in definitions {
            let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
            match Bandit::from_definition(definition, Some(id)) {
                Ok(bandit) => {
                    info!(
                        "Loaded bandit [{}] with {} identifiers",
                        bandit.name,
                        bandit.identifiers.len()
                    );
                    registry.bandits.write().push(Arc::new(bandit));
                }
                Err(e) => {
                    error!("Skipping bandit [{}]: {}", definition.name, e);
                    rejected.push((definition.name.clone(), e));
                }
            }
        }

        (registry, rejected)
    }

    pub fn insert(&self, mut bandit: Bandit) -> Arc<Bandit> {
        if bandit.database_id.is_none() {
            bandit.database_id = Some(self.next_id.fetch_add(1, Ordering::Relaxed));
        }
        let bandit = Arc::new(bandit);
        let mut bandits = self.bandits.write();
        bandits.retain(|b| b.uuid != bandit.uuid);
        bandits.push(Arc::clone(&bandit));
        bandit
    }

    pub fn all(&self) -> Vec<Arc<Bandit>> {
        self.bandits.read().clone()
    }

    pub fn find(&self, uuid: &Uuid) -> Option<Arc<Bandit>> {
        self.bandits.read().iter().find(|b| &b.uuid == uuid).cloned()
    }

    pub fn len(&self) -> usize {
        self.bandits.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bandits.read().is_empty()
    }

    /// Stable digest of the loaded bandit set, reported back by trackers so
    /// stale ones can be spotted.
    pub fn hash(&self) -> String {
        let mut uuids: Vec<Uuid> = self.bandits.read().iter().map(|b| b.uuid).collect();
        uuids.sort();

        let mut hasher = Sha256::new();
        for uuid in uuids {
            hasher.update(uuid.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl Default for BanditRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentifierDefinition;
    use serde_json::{json, Value};

    fn definition(name: &str, identifiers: Vec<(&str, Value)>) -> BanditDefinition {
        BanditDefinition {
            name: name.to_string(),
            description: String::new(),
            uuid: None,
            identifiers: identifiers
                .into_iter()
                .map(|(t, c)| IdentifierDefinition {
                    identifier_type: t.to_string(),
                    configuration: c.as_object().cloned().unwrap_or_default(),
                })
                .collect(),
        }
    }

    #[test]
    fn broken_definitions_are_rejected_individually() {
        let (registry, rejected) = BanditRegistry::from_definitions(&[
            definition("good", vec![("fingerprint", json!({"fingerprint": "abc123"}))]),
            definition("missing key", vec![("ssid", json!({}))]),
            definition("unknown type", vec![("bogus", json!({}))]),
            definition("also good", vec![("ssid", json!({"ssids": ["x"]}))]),
        ]);

        assert_eq!(registry.len(), 2);
        assert_eq!(rejected.len(), 2);
        assert!(matches!(rejected[0].1, BanditError::Mapping { .. }));
        assert!(matches!(rejected[1].1, BanditError::NoSerializer(_)));
    }

    #[test]
    fn derived_uuids_are_stable() {
        let def = definition("stable", vec![("fingerprint", json!({"fingerprint": "abc123"}))]);
        let a = Bandit::from_definition(&def, None).unwrap();
        let b = Bandit::from_definition(&def, None).unwrap();
        assert_eq!(a.uuid, b.uuid);
        assert_eq!(a.identifiers[0].uuid, b.identifiers[0].uuid);
    }
}
