//! Skill set — maps `(skill, method)` pairs to handlers and carries the
//! metadata advertised to the Hub.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use ax_protocol::SkillSpec;

use crate::types::{SkillContext, SkillResult};

/// Implement this trait to handle skill calls from the Hub.
///
/// The SDK dispatches each `skill_request` to the handler registered for
/// the request's `(skill_name, method_name)` pair.  Handlers run on the
/// Tokio runtime and may perform async I/O.
///
/// # Example
///
/// ```rust,no_run
/// use ax_spoke_sdk::{SkillContext, SkillHandler, SkillResult};
/// use serde_json::{Map, Value};
///
/// struct WeatherToday;
///
/// #[async_trait::async_trait]
/// impl SkillHandler for WeatherToday {
///     async fn call(
///         &self,
///         _ctx: SkillContext,
///         args: Vec<Value>,
///         _kwargs: Map<String, Value>,
///     ) -> SkillResult {
///         Ok(serde_json::json!({ "forecast": "sunny", "args": args }))
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait SkillHandler: Send + Sync + 'static {
    /// Execute the skill method.
    ///
    /// * `ctx`    — request context (correlation ID, cancellation token)
    /// * `args`   — positional JSON arguments from the controller
    /// * `kwargs` — keyword JSON arguments from the controller
    async fn call(&self, ctx: SkillContext, args: Vec<Value>, kwargs: Map<String, Value>)
        -> SkillResult;
}

/// The skills a spoke exposes: handlers plus the [`SkillSpec`] metadata
/// sent to the Hub at registration.
///
/// ```rust,no_run
/// # use ax_spoke_sdk::{SkillSet, SkillSpec};
/// # struct WeatherToday;
/// # #[async_trait::async_trait]
/// # impl ax_spoke_sdk::SkillHandler for WeatherToday {
/// #     async fn call(&self, _: ax_spoke_sdk::SkillContext, _: Vec<serde_json::Value>, _: serde_json::Map<String, serde_json::Value>) -> ax_spoke_sdk::SkillResult { Ok(serde_json::Value::Null) }
/// # }
/// let mut skills = SkillSet::new();
/// skills.register(
///     SkillSpec {
///         class_name: "WeatherSkill".into(),
///         function_name: "today".into(),
///         signature: "(city: str)".into(),
///         docstring: "Current weather for a city.".into(),
///         device_agnostic: false,
///     },
///     WeatherToday,
/// );
/// ```
#[derive(Clone, Default)]
pub struct SkillSet {
    handlers: HashMap<(String, String), Arc<dyn SkillHandler>>,
    specs: Vec<SkillSpec>,
}

impl SkillSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its spec's `(class_name, function_name)`.
    /// Registering the same pair twice replaces the previous handler and
    /// its metadata.
    ///
    /// Returns `&mut Self` for method chaining.
    pub fn register<H: SkillHandler>(&mut self, spec: SkillSpec, handler: H) -> &mut Self {
        self.register_boxed(spec, Arc::new(handler))
    }

    /// Register a pre-wrapped handler.  Use this when handlers are stored
    /// in variables or constructed dynamically.
    pub fn register_boxed(
        &mut self,
        spec: SkillSpec,
        handler: Arc<dyn SkillHandler>,
    ) -> &mut Self {
        let key = (spec.class_name.clone(), spec.function_name.clone());
        self.specs
            .retain(|s| (s.class_name.as_str(), s.function_name.as_str()) != (key.0.as_str(), key.1.as_str()));
        self.specs.push(spec);
        self.handlers.insert(key, handler);
        self
    }

    /// The metadata advertised to the Hub, sorted by path for stable
    /// registration payloads.
    pub fn specs(&self) -> Vec<SkillSpec> {
        let mut specs = self.specs.clone();
        specs.sort_by_key(|s| s.path());
        specs
    }

    /// Look up a handler by skill and method name.
    pub fn get(&self, skill_name: &str, method_name: &str) -> Option<Arc<dyn SkillHandler>> {
        self.handlers
            .get(&(skill_name.to_string(), method_name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    struct Echo;

    #[async_trait::async_trait]
    impl SkillHandler for Echo {
        async fn call(
            &self,
            _ctx: SkillContext,
            args: Vec<Value>,
            _kwargs: Map<String, Value>,
        ) -> SkillResult {
            Ok(Value::Array(args))
        }
    }

    fn spec(class: &str, function: &str) -> SkillSpec {
        SkillSpec {
            class_name: class.into(),
            function_name: function.into(),
            signature: "(self)".into(),
            docstring: String::new(),
            device_agnostic: false,
        }
    }

    fn test_ctx() -> SkillContext {
        SkillContext {
            request_id: "req-1".into(),
            skill_name: "TestSkill".into(),
            method_name: "echo".into(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut skills = SkillSet::new();
        skills.register(spec("TestSkill", "echo"), Echo);
        assert!(skills.get("TestSkill", "echo").is_some());
        assert!(skills.get("TestSkill", "missing").is_none());
        assert!(skills.get("OtherSkill", "echo").is_none());
    }

    #[test]
    fn reregistering_replaces_spec_and_handler() {
        let mut skills = SkillSet::new();
        skills.register(spec("TestSkill", "echo"), Echo);
        let mut updated = spec("TestSkill", "echo");
        updated.docstring = "second".into();
        skills.register(updated, Echo);

        assert_eq!(skills.len(), 1);
        let specs = skills.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].docstring, "second");
    }

    #[test]
    fn specs_sorted_by_path() {
        let mut skills = SkillSet::new();
        skills.register(spec("Zebra", "run"), Echo);
        skills.register(spec("Alpha", "walk"), Echo);
        let paths: Vec<String> = skills.specs().iter().map(|s| s.path()).collect();
        assert_eq!(paths, vec!["Alpha.walk", "Zebra.run"]);
    }

    #[tokio::test]
    async fn echo_handler_returns_args() {
        let mut skills = SkillSet::new();
        skills.register(spec("TestSkill", "echo"), Echo);
        let handler = skills.get("TestSkill", "echo").unwrap();
        let result = handler
            .call(test_ctx(), vec![serde_json::json!(1)], Map::new())
            .await;
        assert_eq!(result.unwrap(), serde_json::json!([1]));
    }
}
