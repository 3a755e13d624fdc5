//! Skill routing: connectivity-aware search and routed execution.
//!
//! Search groups equivalent skills across a caller's devices and prefers
//! reachable devices; execute resolves a device by normalized name and
//! hands the call to the invoker only when the device has a live channel.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use ax_domain::normalize::normalize_device_name;

use crate::devices::registry::DeviceRegistry;
use crate::spokes::connections::Connectivity;
use crate::spokes::invoker::{CallOutcome, RemoteInvoker};

use super::registry::{SkillEntry, SkillRegistry};

/// One grouped search result: a skill identity and the devices hosting it,
/// ranked reachable-first.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// `Class.function`.
    pub path: String,
    pub signature: String,
    /// First line of the docstring.
    pub summary: String,
    /// Normalized device names, connected devices first, alphabetical
    /// within each group.
    pub devices: Vec<String>,
    pub preferred_device: String,
    pub device_count: usize,
    /// True when the skill is device-agnostic and need not run on its
    /// owning device.
    pub is_local: bool,
}

pub struct SkillRouter {
    devices: Arc<DeviceRegistry>,
    skills: Arc<SkillRegistry>,
    connectivity: Arc<dyn Connectivity>,
    invoker: Arc<RemoteInvoker>,
}

impl SkillRouter {
    pub fn new(
        devices: Arc<DeviceRegistry>,
        skills: Arc<SkillRegistry>,
        connectivity: Arc<dyn Connectivity>,
        invoker: Arc<RemoteInvoker>,
    ) -> Self {
        Self {
            devices,
            skills,
            connectivity,
            invoker,
        }
    }

    /// Search the owner's devices for skills matching `query`
    /// (case-insensitive substring; empty query matches everything).
    pub fn search(&self, owner: &str, query: &str) -> Vec<SearchHit> {
        let owned = self.devices.devices_for_owner(owner);
        let names: HashMap<Uuid, String> = owned
            .iter()
            .map(|d| (d.id, d.normalized_name()))
            .collect();
        let ids: Vec<Uuid> = owned.iter().map(|d| d.id).collect();

        let query_lower = query.trim().to_lowercase();
        let matching: Vec<SkillEntry> = self
            .skills
            .entries_for_devices(&ids)
            .into_iter()
            .filter(|e| query_lower.is_empty() || e.matches(&query_lower))
            .collect();

        // Group by skill identity across devices.
        let mut groups: HashMap<(String, String), Vec<SkillEntry>> = HashMap::new();
        for entry in matching {
            groups
                .entry((entry.path(), entry.signature.clone()))
                .or_default()
                .push(entry);
        }

        let connected = self.connectivity.connected_devices();

        let mut hits: Vec<SearchHit> = groups
            .into_iter()
            .map(|((path, signature), entries)| {
                let mut device_names: Vec<(bool, String)> = entries
                    .iter()
                    .filter_map(|e| {
                        names
                            .get(&e.device_id)
                            .map(|name| (connected.contains(&e.device_id), name.clone()))
                    })
                    .collect();
                // Connected before disconnected, then alphabetical.
                device_names.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

                let devices: Vec<String> =
                    device_names.into_iter().map(|(_, name)| name).collect();
                let preferred_device = devices.first().cloned().unwrap_or_default();
                let summary = entries[0]
                    .docstring
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                let is_local = entries.iter().any(|e| e.device_agnostic);

                SearchHit {
                    path,
                    signature,
                    summary,
                    device_count: devices.len(),
                    preferred_device,
                    devices,
                    is_local,
                }
            })
            .collect();

        hits.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.signature.cmp(&b.signature)));
        hits
    }

    /// Route a skill call to the named device. Unknown or disconnected
    /// devices produce a structured failure without any network attempt.
    pub async fn execute(
        &self,
        owner: &str,
        device_name: &str,
        skill_name: &str,
        method_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> CallOutcome {
        let device = match self.devices.resolve_by_name(owner, device_name) {
            Some(d) => d,
            None => {
                return CallOutcome {
                    success: false,
                    result: Value::Null,
                    error: Some(format!(
                        "unknown device: {}",
                        normalize_device_name(device_name)
                    )),
                }
            }
        };

        if !self.connectivity.is_connected(device.id) {
            return CallOutcome {
                success: false,
                result: Value::Null,
                error: Some("device not connected".to_string()),
            };
        }

        self.invoker
            .call(device.id, skill_name, method_name, args, kwargs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ax_domain::config::RpcConfig;
    use ax_protocol::SkillSpec;

    use crate::spokes::testing::FakeConnectivity;

    fn spec(class: &str, function: &str, doc: &str) -> SkillSpec {
        SkillSpec {
            class_name: class.into(),
            function_name: function.into(),
            signature: "(self)".into(),
            docstring: doc.into(),
            device_agnostic: false,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        devices: Arc<DeviceRegistry>,
        skills: Arc<SkillRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                devices: Arc::new(DeviceRegistry::load(dir.path()).unwrap()),
                skills: Arc::new(SkillRegistry::new()),
                _dir: dir,
            }
        }

        fn router(&self, connectivity: Arc<FakeConnectivity>) -> SkillRouter {
            let invoker = Arc::new(RemoteInvoker::new(
                connectivity.clone(),
                &RpcConfig::default(),
            ));
            SkillRouter::new(
                self.devices.clone(),
                self.skills.clone(),
                connectivity,
                invoker,
            )
        }
    }

    #[test]
    fn search_prefers_connected_device_over_alphabetical_order() {
        let fx = Fixture::new();
        // "spoke two" sorts before "strawberry spoke" alphabetically, but
        // only "strawberry spoke" is connected.
        let (spoke_two, _) = fx.devices.register("alice", "spoke two", None);
        let (strawberry, _) = fx.devices.register("alice", "strawberry spoke", None);
        fx.skills
            .register(spoke_two, vec![spec("TestSkill", "test", "A test skill")]);
        fx.skills
            .register(strawberry, vec![spec("TestSkill", "test", "A test skill")]);

        let router = fx.router(Arc::new(FakeConnectivity::with_connected(&[strawberry])));
        let hits = router.search("alice", "test");

        assert_eq!(hits.len(), 1, "equivalent skills group into one result");
        let hit = &hits[0];
        assert_eq!(hit.path, "TestSkill.test");
        assert_eq!(hit.preferred_device, "strawberry_spoke");
        assert_eq!(hit.devices, vec!["strawberry_spoke", "spoke_two"]);
        assert_eq!(hit.device_count, 2);
    }

    #[test]
    fn search_matches_case_insensitively_and_scopes_to_owner() {
        let fx = Fixture::new();
        let (alice_dev, _) = fx.devices.register("alice", "Laptop", None);
        let (bob_dev, _) = fx.devices.register("bob", "Laptop", None);
        fx.skills
            .register(alice_dev, vec![spec("WeatherSkill", "today", "weather")]);
        fx.skills
            .register(bob_dev, vec![spec("WeatherSkill", "today", "weather")]);

        let router = fx.router(Arc::new(FakeConnectivity::default()));

        let hits = router.search("alice", "WEATHER");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].device_count, 1, "bob's device is invisible to alice");
        assert!(router.search("alice", "nonexistent").is_empty());
    }

    #[test]
    fn search_summary_is_first_docstring_line() {
        let fx = Fixture::new();
        let (dev, _) = fx.devices.register("alice", "Laptop", None);
        fx.skills.register(
            dev,
            vec![spec("NewsSkill", "headlines", "Top headlines.\nLong tail.")],
        );

        let router = fx.router(Arc::new(FakeConnectivity::default()));
        let hits = router.search("alice", "headlines");
        assert_eq!(hits[0].summary, "Top headlines.");
    }

    #[tokio::test]
    async fn execute_on_disconnected_device_fails_without_network_attempt() {
        let fx = Fixture::new();
        let (dev, _) = fx.devices.register("alice", "Laptop", None);
        fx.skills.register(dev, vec![spec("TestSkill", "test", "")]);

        let connectivity = Arc::new(FakeConnectivity::default());
        let router = fx.router(connectivity.clone());

        let outcome = router
            .execute("alice", "laptop", "TestSkill", "test", vec![], Map::new())
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("device not connected"));
        assert!(connectivity.sent.lock().is_empty(), "nothing went out");
    }

    #[tokio::test]
    async fn execute_on_unknown_device_names_it() {
        let fx = Fixture::new();
        let router = fx.router(Arc::new(FakeConnectivity::default()));

        let outcome = router
            .execute("alice", "No Such Spoke", "S", "m", vec![], Map::new())
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("no_such_spoke"));
    }
}
