//! Durable device identity registry.
//!
//! A device registers once and keeps its UUID across reconnects by sending
//! it back on subsequent registrations. A device that lost its local state
//! may send a bogus id; that silently falls back to minting a fresh
//! identity rather than erroring. Devices are never deleted here.
//!
//! The registry is an in-memory map with a JSON snapshot under the state
//! path, flushed after mutations and by a periodic background task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ax_domain::normalize::normalize_device_name;
use ax_domain::{Error, Result};

/// A registered device identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    /// Human-facing name, unique per owner at mint time. A device may
    /// later rename itself to any value without collision suffixing.
    pub display_name: String,
    /// Principal the device belongs to.
    pub owner: String,
    pub registered_at: DateTime<Utc>,
}

impl Device {
    pub fn normalized_name(&self) -> String {
        normalize_device_name(&self.display_name)
    }
}

const SNAPSHOT_FILE: &str = "devices.json";

/// Thread-safe registry of all known device identities.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<Uuid, Device>>,
    snapshot_path: PathBuf,
    dirty: AtomicBool,
}

impl DeviceRegistry {
    /// Load the registry from `state_dir/devices.json`; a missing snapshot
    /// yields an empty registry.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let snapshot_path = state_dir.join(SNAPSHOT_FILE);
        let devices = match std::fs::read_to_string(&snapshot_path) {
            Ok(raw) => {
                let list: Vec<Device> = serde_json::from_str(&raw)?;
                list.into_iter().map(|d| (d.id, d)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(Error::Io(e)),
        };
        tracing::info!(
            devices = devices.len(),
            path = %snapshot_path.display(),
            "device registry loaded"
        );
        Ok(Self {
            devices: RwLock::new(devices),
            snapshot_path,
            dirty: AtomicBool::new(false),
        })
    }

    /// Register a device for `owner`, returning `(id, display_name)`.
    ///
    /// - `device_id` known → rename to `display_name` (no suffixing) and
    ///   return the unchanged id.
    /// - `device_id` absent or unknown → mint a fresh identity; the display
    ///   name gets a numeric suffix (" 2", " 3", …) if it collides with
    ///   another device of the same owner.
    ///
    /// A known id presented by a *different* owner is treated as unknown,
    /// so one principal cannot rename another's device.
    pub fn register(
        &self,
        owner: &str,
        display_name: &str,
        device_id: Option<Uuid>,
    ) -> (Uuid, String) {
        let mut devices = self.devices.write();

        if let Some(id) = device_id {
            if let Some(device) = devices.get_mut(&id) {
                if device.owner == owner {
                    device.display_name = display_name.to_string();
                    let name = device.display_name.clone();
                    drop(devices);
                    self.mark_dirty();
                    tracing::info!(device_id = %id, display_name = %name, "device re-registered");
                    return (id, name);
                }
                tracing::warn!(
                    device_id = %id,
                    owner = %owner,
                    "registration with another owner's device id, minting fresh identity"
                );
            }
        }

        let id = Uuid::new_v4();
        let unique_name = Self::unique_display_name(&devices, owner, display_name);
        devices.insert(
            id,
            Device {
                id,
                display_name: unique_name.clone(),
                owner: owner.to_string(),
                registered_at: Utc::now(),
            },
        );
        drop(devices);
        self.mark_dirty();
        tracing::info!(device_id = %id, display_name = %unique_name, owner = %owner, "device registered");
        (id, unique_name)
    }

    /// First free name for this owner: `"X"`, then `"X 2"`, `"X 3"`, …
    fn unique_display_name(
        devices: &HashMap<Uuid, Device>,
        owner: &str,
        wanted: &str,
    ) -> String {
        let taken = |candidate: &str| {
            devices
                .values()
                .any(|d| d.owner == owner && d.display_name == candidate)
        };

        if !taken(wanted) {
            return wanted.to_string();
        }
        let mut n = 2u32;
        loop {
            let candidate = format!("{wanted} {n}");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Device> {
        self.devices.read().get(&id).cloned()
    }

    pub fn devices_for_owner(&self, owner: &str) -> Vec<Device> {
        let mut list: Vec<Device> = self
            .devices
            .read()
            .values()
            .filter(|d| d.owner == owner)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        list
    }

    /// Resolve a device by its *normalized* name for an owner.
    pub fn resolve_by_name(&self, owner: &str, name: &str) -> Option<Device> {
        let wanted = normalize_device_name(name);
        self.devices
            .read()
            .values()
            .find(|d| d.owner == owner && d.normalized_name() == wanted)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
        // Registrations are rare; persist them as they happen.
        if let Err(e) = self.flush_if_dirty() {
            tracing::warn!(error = %e, "device snapshot flush failed");
        }
    }

    /// Write the snapshot if anything changed since the last flush.
    /// Atomic: tmp file + rename.
    pub fn flush_if_dirty(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::Relaxed) {
            return Ok(());
        }
        let list: Vec<Device> = self.devices.read().values().cloned().collect();
        let json = serde_json::to_string_pretty(&list)?;
        let tmp = self.snapshot_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.snapshot_path)?;
        Ok(())
    }
}
