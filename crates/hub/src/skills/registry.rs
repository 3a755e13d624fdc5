//! In-memory registry of skill metadata per device.
//!
//! Entries are keyed `(device_id, class_name, function_name)`; registration
//! replaces, never duplicates. Entries are not expired when heartbeats
//! stop: a device whose skills have gone stale simply ranks as
//! disconnected in search results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use ax_protocol::SkillSpec;

/// One registered skill on one device.
#[derive(Debug, Clone, Serialize)]
pub struct SkillEntry {
    pub device_id: Uuid,
    pub class_name: String,
    pub function_name: String,
    pub signature: String,
    pub docstring: String,
    pub device_agnostic: bool,
    pub last_heartbeat: DateTime<Utc>,
}

impl SkillEntry {
    pub fn path(&self) -> String {
        format!("{}.{}", self.class_name, self.function_name)
    }

    /// Case-insensitive substring match against class name, function name,
    /// docstring, and the `Class.function` path.
    pub fn matches(&self, query_lower: &str) -> bool {
        self.class_name.to_lowercase().contains(query_lower)
            || self.function_name.to_lowercase().contains(query_lower)
            || self.docstring.to_lowercase().contains(query_lower)
            || self.path().to_lowercase().contains(query_lower)
    }
}

type SkillKey = (String, String);

/// Thread-safe skill metadata store.
#[derive(Default)]
pub struct SkillRegistry {
    entries: RwLock<HashMap<Uuid, HashMap<SkillKey, SkillEntry>>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a device's skills. Returns how many entries
    /// the call touched.
    pub fn register(&self, device_id: Uuid, skills: Vec<SkillSpec>) -> usize {
        let now = Utc::now();
        let count = skills.len();
        let mut entries = self.entries.write();
        let device_entries = entries.entry(device_id).or_default();
        for spec in skills {
            let key = (spec.class_name.clone(), spec.function_name.clone());
            device_entries.insert(
                key,
                SkillEntry {
                    device_id,
                    class_name: spec.class_name,
                    function_name: spec.function_name,
                    signature: spec.signature,
                    docstring: spec.docstring,
                    device_agnostic: spec.device_agnostic,
                    last_heartbeat: now,
                },
            );
        }
        drop(entries);
        tracing::info!(device_id = %device_id, skills = count, "skills registered");
        count
    }

    /// Refresh `last_heartbeat` on all of a device's entries. A device
    /// with no prior registration refreshes nothing; that is not an error.
    pub fn heartbeat(&self, device_id: Uuid) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write();
        match entries.get_mut(&device_id) {
            Some(device_entries) => {
                for entry in device_entries.values_mut() {
                    entry.last_heartbeat = now;
                }
                device_entries.len()
            }
            None => 0,
        }
    }

    pub fn list(&self, device_id: Option<Uuid>) -> Vec<SkillEntry> {
        let entries = self.entries.read();
        match device_id {
            Some(id) => entries
                .get(&id)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default(),
            None => entries
                .values()
                .flat_map(|m| m.values().cloned())
                .collect(),
        }
    }

    pub fn entries_for_devices(&self, device_ids: &[Uuid]) -> Vec<SkillEntry> {
        let entries = self.entries.read();
        device_ids
            .iter()
            .filter_map(|id| entries.get(id))
            .flat_map(|m| m.values().cloned())
            .collect()
    }
}
