//! `Notification`: an outbox.

use sw_core::{ActionSchema, BehaviorResult, ConceptBehavior, ConceptState, ValueMap, default_effect};

/// Every `notify` appends its inputs as an outbox row. Queries range over
/// the outbox.
#[derive(Clone, Copy, Debug, Default)]
pub struct Notification;

impl ConceptBehavior for Notification {
    fn apply_effect(
        &mut self,
        action: &ActionSchema,
        state: &mut ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<ValueMap> {
        if action.name == "notify" {
            tracing::debug!(outbox = state.rows.len() + 1, "notification queued");
            state.rows.push(inputs.clone());
        }
        Ok(default_effect(action, state, inputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_core::{ActionKind, ConceptSchema, FieldSpec, FieldType, Value, default_query};

    #[test]
    fn test_notify_appends_to_outbox() {
        let schema = ConceptSchema::new("Concept:Notification", "Notification")
            .with_action(
                "notify",
                ActionKind::Effect,
                vec![
                    FieldSpec::required("message", FieldType::String),
                    FieldSpec::optional("to", FieldType::String),
                ],
                vec![],
            )
            .with_action(
                "_outbox",
                ActionKind::Query,
                vec![FieldSpec::optional("to", FieldType::String)],
                vec![FieldSpec::required("message", FieldType::String)],
            );
        let mut state = ConceptState::from_schema(&schema);
        for (message, to) in [("hi", "ann"), ("yo", "bob")] {
            let mut inputs = ValueMap::new();
            inputs.insert("message".into(), Value::str(message));
            inputs.insert("to".into(), Value::str(to));
            Notification
                .apply_effect(&schema.actions[0], &mut state, &inputs)
                .unwrap();
        }
        assert_eq!(state.rows.len(), 2);

        let mut to_bob = ValueMap::new();
        to_bob.insert("to".into(), Value::str("bob"));
        let rows = default_query(&schema.actions[1], &state, &to_bob);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("message"), Some(&Value::str("yo")));
    }
}
