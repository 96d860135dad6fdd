//! Action dispatch: validate, apply, append.

use crate::error::Result;
use crate::log::{ActionLog, ActionRecord, PendingRecord};
use crate::registry::ConceptRegistry;
use crate::time::Clock;
use crate::value::ValueMap;

/// One effect call. `cause` is the rule whose then-pattern issued it.
pub struct Call<'a> {
    pub concept: &'a str,
    pub action: &'a str,
    pub inputs: &'a ValueMap,
    pub trigger: u64,
    pub depth: usize,
    pub cause: Option<&'a str>,
}

/// Invoke an effect and append its completion.
///
/// Unknown concepts, unknown actions, queries and bad inputs are rejected
/// before the behavior runs; a failing behavior commits nothing. In every
/// error case the log is left untouched.
pub fn dispatch(
    registry: &ConceptRegistry,
    log: &mut ActionLog,
    clock: &dyn Clock,
    call: Call<'_>,
) -> Result<ActionRecord> {
    let inputs = registry.validate_effect(call.concept, call.action, call.inputs)?;
    let outputs = registry.apply_effect(call.concept, call.action, &inputs)?;
    let record = log.append(PendingRecord {
        concept: call.concept.to_string(),
        action: call.action.to_string(),
        inputs,
        outputs,
        timestamp: clock.now(),
        trigger: call.trigger,
        depth: call.depth,
        cause: call.cause.map(str::to_string),
    });
    tracing::debug!(
        seq = record.seq,
        trigger = record.trigger,
        depth = record.depth,
        "dispatched {}.{}",
        record.concept,
        record.action
    );
    Ok(record.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::Passive;
    use crate::schema::{ActionKind, ConceptSchema, FieldSpec, FieldType};
    use crate::time::LogicalClock;
    use crate::value::Value;

    fn registry() -> ConceptRegistry {
        let mut reg = ConceptRegistry::new();
        let schema = ConceptSchema::new("Concept:Notification", "Notification")
            .with_action(
                "notify",
                ActionKind::Effect,
                vec![
                    FieldSpec::required("message", FieldType::String),
                    FieldSpec::optional("to", FieldType::String),
                ],
                vec![FieldSpec::required("message", FieldType::String)],
            )
            .with_action("_list", ActionKind::Query, vec![], vec![]);
        reg.register(schema, Box::new(Passive)).unwrap();
        reg
    }

    fn call<'a>(action: &'a str, inputs: &'a ValueMap) -> Call<'a> {
        Call {
            concept: "Concept:Notification",
            action,
            inputs,
            trigger: 1,
            depth: 0,
            cause: None,
        }
    }

    #[test]
    fn test_dispatch_appends_record() {
        let reg = registry();
        let mut log = ActionLog::new();
        let clock = LogicalClock::new();
        let mut inputs = ValueMap::new();
        inputs.insert("message".into(), Value::str("hi"));

        let rec = dispatch(&reg, &mut log, &clock, call("notify", &inputs)).unwrap();
        assert_eq!(rec.seq, 1);
        assert_eq!(rec.inputs["to"], Value::Null);
        assert_eq!(rec.outputs["message"], Value::str("hi"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_rejected_calls_never_reach_the_log() {
        let reg = registry();
        let mut log = ActionLog::new();
        let clock = LogicalClock::new();
        let empty = ValueMap::new();

        let err = dispatch(&reg, &mut log, &clock, call("notify", &empty)).unwrap_err();
        assert_eq!(err.kind(), "InputMismatchError");
        let err = dispatch(&reg, &mut log, &clock, call("shout", &empty)).unwrap_err();
        assert_eq!(err.kind(), "ActionNotFoundError");
        let err = dispatch(&reg, &mut log, &clock, call("_list", &empty)).unwrap_err();
        assert_eq!(err.kind(), "KindMismatchError");
        let mut bad = call("notify", &empty);
        bad.concept = "Concept:Nope";
        assert_eq!(
            dispatch(&reg, &mut log, &clock, bad).unwrap_err().kind(),
            "UnknownConceptError"
        );
        assert!(log.is_empty());
    }
}
