//! `Counter`: a single number in state field `count`.

use sw_core::{ActionSchema, BehaviorResult, ConceptBehavior, ConceptState, Value, ValueMap, default_effect};

/// `increment` / `decrement` move `count` by the optional `amount` input
/// (default 1); `reset` sets it back to zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct Counter;

impl ConceptBehavior for Counter {
    fn apply_effect(
        &mut self,
        action: &ActionSchema,
        state: &mut ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<ValueMap> {
        let amount = inputs.get("amount").and_then(Value::as_f64).unwrap_or(1.0);
        let count = state.field("count").as_f64().unwrap_or(0.0);
        match action.name.as_str() {
            "increment" => state.set("count", Value::Number(count + amount)),
            "decrement" => state.set("count", Value::Number(count - amount)),
            "reset" => state.set("count", Value::Number(0.0)),
            _ => {}
        }
        Ok(default_effect(action, state, inputs))
    }
}
