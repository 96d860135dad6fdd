//! Name-keyed behavior lookup.

use sw_core::{
    BehaviorError, BehaviorProvider, BehaviorResult, ConceptBehavior, ConceptSchema, ConceptState,
    Passive, Value, ValueMap,
};

use crate::counter::Counter;
use crate::notification::Notification;
use crate::rate_limit::RateLimiter;
use crate::shortener::{ExpiringResource, NonceGenerator, UrlShortening, WebAnalytics};
use crate::upvote::{Recommendation, Upvote};

/// Concept names with a library behavior.
pub const NAMES: &[&str] = &[
    "Counter",
    "ExpiringResource",
    "NonceGenerator",
    "Notification",
    "RateLimiter",
    "Recommendation",
    "Upvote",
    "UrlShortening",
    "WebAnalytics",
];

/// Picks a behavior by concept *name*. Concepts the library does not know
/// get [`Passive`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Library {
    seed: Option<u64>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed every random behavior (nonces) for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }

    pub fn with_seed(seed: Option<u64>) -> Self {
        Self { seed }
    }

    pub fn knows(name: &str) -> bool {
        NAMES.contains(&name)
    }

    pub fn behavior(&self, name: &str) -> Option<Box<dyn ConceptBehavior>> {
        let behavior: Box<dyn ConceptBehavior> = match name {
            "Counter" => Box::new(Counter),
            "ExpiringResource" => Box::new(ExpiringResource),
            "NonceGenerator" => Box::new(NonceGenerator::new(self.seed)),
            "Notification" => Box::new(Notification),
            "RateLimiter" => Box::new(RateLimiter),
            "Recommendation" => Box::new(Recommendation),
            "Upvote" => Box::new(Upvote),
            "UrlShortening" => Box::new(UrlShortening),
            "WebAnalytics" => Box::new(WebAnalytics),
            _ => return None,
        };
        Some(behavior)
    }
}

impl BehaviorProvider for Library {
    fn behavior_for(&self, schema: &ConceptSchema) -> Box<dyn ConceptBehavior> {
        self.behavior(&schema.name).unwrap_or_else(|| {
            tracing::debug!(concept = %schema.id, "no library behavior, using defaults");
            Box::new(Passive)
        })
    }
}

// --- helpers shared by the behaviors ---

/// A required string input.
pub(crate) fn text<'a>(inputs: &'a ValueMap, field: &str) -> BehaviorResult<&'a str> {
    inputs
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| BehaviorError(format!("'{field}' must be a string")))
}

pub(crate) fn row(pairs: &[(&str, Value)]) -> ValueMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Index of the first row whose `field` equals `value`.
pub(crate) fn position(state: &ConceptState, field: &str, value: &str) -> Option<usize> {
    state
        .rows
        .iter()
        .position(|r| r.get(field).and_then(Value::as_str) == Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_core::{ActionKind, FieldSpec, FieldType};

    #[test]
    fn test_every_listed_name_has_a_behavior() {
        let lib = Library::new();
        for name in NAMES {
            assert!(lib.behavior(name).is_some(), "{name}");
            assert!(Library::knows(name));
        }
        assert!(lib.behavior("Button").is_none());
        assert!(!Library::knows("Button"));
    }

    #[test]
    fn test_unknown_concept_falls_back_to_defaults() {
        let schema = ConceptSchema::new("Concept:Button", "Button").with_action(
            "clicked",
            ActionKind::Effect,
            vec![FieldSpec::required("kind", FieldType::String)],
            vec![FieldSpec::required("kind", FieldType::String)],
        );
        let mut behavior = Library::new().behavior_for(&schema);
        let mut state = ConceptState::from_schema(&schema);
        let inputs = row(&[("kind", Value::str("inc"))]);
        let out = behavior
            .apply_effect(&schema.actions[0], &mut state, &inputs)
            .unwrap();
        assert_eq!(out, inputs);
    }

    #[test]
    fn test_text_rejects_non_strings() {
        let inputs = row(&[("n", Value::Number(1.0))]);
        assert!(text(&inputs, "n").is_err());
        assert!(text(&inputs, "missing").is_err());
    }

    #[test]
    fn test_position_matches_string_field() {
        let mut state = ConceptState::default();
        state.rows.push(row(&[("id", Value::str("a"))]));
        state.rows.push(row(&[("id", Value::str("b"))]));
        assert_eq!(position(&state, "id", "b"), Some(1));
        assert_eq!(position(&state, "id", "c"), None);
    }
}
