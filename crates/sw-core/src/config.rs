//! Engine limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 32;
pub const DEFAULT_MAX_DISPATCHES: usize = 10_000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cascade passes that may dispatch before the trigger fails.
    pub max_cascade_depth: usize,
    /// Cascaded dispatches allowed for one trigger.
    pub max_dispatches: usize,
    /// Wall-clock budget per trigger; unset means unbounded.
    pub time_budget_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
            max_dispatches: DEFAULT_MAX_DISPATCHES,
            time_budget_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn submit_options(&self) -> SubmitOptions {
        SubmitOptions {
            max_depth: Some(self.max_cascade_depth),
            max_dispatches: Some(self.max_dispatches),
            time_budget: self.time_budget_ms.map(Duration::from_millis),
        }
    }
}

/// Per-trigger overrides. `None` falls back to the engine config.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubmitOptions {
    pub max_depth: Option<usize>,
    pub max_dispatches: Option<usize>,
    pub time_budget: Option<Duration>,
}

impl SubmitOptions {
    pub fn max_depth(depth: usize) -> Self {
        Self {
            max_depth: Some(depth),
            ..Default::default()
        }
    }

    pub fn time_budget(budget: Duration) -> Self {
        Self {
            time_budget: Some(budget),
            ..Default::default()
        }
    }

    /// Fill unset fields from `config`.
    pub fn resolve(&self, config: &EngineConfig) -> SubmitOptions {
        let base = config.submit_options();
        SubmitOptions {
            max_depth: self.max_depth.or(base.max_depth),
            max_dispatches: self.max_dispatches.or(base.max_dispatches),
            time_budget: self.time_budget.or(base.time_budget),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_cascade_depth, 32);
        assert_eq!(cfg.max_dispatches, 10_000);
        assert!(cfg.time_budget_ms.is_none());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"max_cascade_depth": 4}"#).unwrap();
        assert_eq!(cfg.max_cascade_depth, 4);
        assert_eq!(cfg.max_dispatches, DEFAULT_MAX_DISPATCHES);
    }

    #[test]
    fn test_options_override_config() {
        let cfg = EngineConfig {
            time_budget_ms: Some(50),
            ..Default::default()
        };
        let opts = SubmitOptions::max_depth(2).resolve(&cfg);
        assert_eq!(opts.max_depth, Some(2));
        assert_eq!(opts.max_dispatches, Some(DEFAULT_MAX_DISPATCHES));
        assert_eq!(opts.time_budget, Some(Duration::from_millis(50)));
    }
}
