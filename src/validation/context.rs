//! Run-time context handed to every validation call.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Ambient facts for one validation call.
///
/// Carries the evaluation clock, the iteration budget, measured performance for
/// the iteration, and external state facts consulted by `external_state` gates.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationContext {
    now: DateTime<Utc>,
    iteration: u32,
    max_iterations: u32,
    state: Map<String, Value>,
    duration_seconds: Option<f64>,
    external_calls: Option<u64>,
}

impl ValidationContext {
    /// Context for `iteration` of a loop capped at `max_iterations`, evaluated now.
    pub fn new(iteration: u32, max_iterations: u32) -> Self {
        Self {
            now: Utc::now(),
            iteration,
            max_iterations,
            state: Map::new(),
            duration_seconds: None,
            external_calls: None,
        }
    }

    /// Pin the evaluation clock.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Add a single external state fact.
    pub fn with_state(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.state.insert(key.into(), value.into());
        self
    }

    /// Merge a batch of external state facts, overwriting existing keys.
    pub fn with_facts(mut self, facts: Map<String, Value>) -> Self {
        self.state.extend(facts);
        self
    }

    pub fn with_duration_seconds(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn with_external_calls(mut self, calls: u64) -> Self {
        self.external_calls = Some(calls);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration_seconds
    }

    pub fn external_calls(&self) -> Option<u64> {
        self.external_calls
    }
}

/// Supplies external state facts for a stage's output.
///
/// The controller asks the provider once per iteration, after the executor
/// returns and before validation runs.
pub trait StateProvider: Send + Sync {
    fn facts(&self, stage_name: &str, output: &Value) -> Map<String, Value>;
}

/// Provider backed by a fixed set of facts.
#[derive(Debug, Clone, Default)]
pub struct StaticStateProvider {
    facts: Map<String, Value>,
}

impl StaticStateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fact(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.facts.insert(key.into(), value.into());
        self
    }
}

impl StateProvider for StaticStateProvider {
    fn facts(&self, _stage_name: &str, _output: &Value) -> Map<String, Value> {
        self.facts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_context_builders() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let ctx = ValidationContext::new(2, 5)
            .at(now)
            .with_state("persisted", true)
            .with_duration_seconds(1.5)
            .with_external_calls(3);

        assert_eq!(ctx.now(), now);
        assert_eq!(ctx.iteration(), 2);
        assert_eq!(ctx.max_iterations(), 5);
        assert_eq!(ctx.state("persisted"), Some(&Value::Bool(true)));
        assert_eq!(ctx.state("missing"), None);
        assert_eq!(ctx.duration_seconds(), Some(1.5));
        assert_eq!(ctx.external_calls(), Some(3));
    }

    #[test]
    fn test_with_facts_overwrites() {
        let mut facts = Map::new();
        facts.insert("persisted".to_string(), Value::Bool(false));
        let ctx = ValidationContext::new(1, 1)
            .with_state("persisted", true)
            .with_facts(facts);
        assert_eq!(ctx.state("persisted"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_static_provider() {
        let provider = StaticStateProvider::new().with_fact("saved", true);
        let facts = provider.facts("stage", &Value::Null);
        assert_eq!(facts.get("saved"), Some(&Value::Bool(true)));
    }
}
