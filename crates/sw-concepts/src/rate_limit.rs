//! `RateLimiter`: a token bucket per client ip.

use sw_core::{
    ActionSchema, BehaviorResult, ConceptBehavior, ConceptState, Value, ValueMap, default_effect,
};

use crate::library::{position, row, text};

/// Bucket capacity when the schema does not set `tokens`.
pub const DEFAULT_CAPACITY: f64 = 10.0;

/// The `tokens` state field is the capacity every new bucket starts with.
/// Buckets are rows of `{ip, tokens}`, created on first `check`.
///
/// - `check(ip)` spends one token; `allowed` is false once the bucket is empty.
/// - `refill(ip?)` refills one bucket, or all of them without an ip.
/// - queries report `tokensAvailable` for the given ip.
#[derive(Clone, Copy, Debug, Default)]
pub struct RateLimiter;

fn capacity(state: &ConceptState) -> f64 {
    state.field("tokens").as_f64().unwrap_or(DEFAULT_CAPACITY)
}

fn available(state: &ConceptState, ip: &str) -> f64 {
    position(state, "ip", ip)
        .and_then(|i| state.rows[i].get("tokens").and_then(Value::as_f64))
        .unwrap_or_else(|| capacity(state))
}

impl ConceptBehavior for RateLimiter {
    fn apply_effect(
        &mut self,
        action: &ActionSchema,
        state: &mut ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<ValueMap> {
        match action.name.as_str() {
            "check" => {
                let ip = text(inputs, "ip")?;
                let tokens = available(state, ip);
                let allowed = tokens > 0.0;
                let left = if allowed { tokens - 1.0 } else { tokens };
                let bucket = row(&[("ip", Value::str(ip)), ("tokens", Value::Number(left))]);
                match position(state, "ip", ip) {
                    Some(i) => state.rows[i] = bucket,
                    None => state.rows.push(bucket),
                }
                if !allowed {
                    tracing::debug!(ip, "rate limited");
                }
                Ok(row(&[("allowed", Value::Bool(allowed))]))
            }
            "refill" => {
                match inputs.get("ip").and_then(Value::as_str) {
                    Some(ip) => state
                        .rows
                        .retain(|r| r.get("ip").and_then(Value::as_str) != Some(ip)),
                    None => state.rows.clear(),
                }
                Ok(ValueMap::new())
            }
            _ => Ok(default_effect(action, state, inputs)),
        }
    }

    fn run_query(
        &self,
        _action: &ActionSchema,
        state: &ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<Vec<ValueMap>> {
        let tokens = match inputs.get("ip").and_then(Value::as_str) {
            Some(ip) => available(state, ip),
            None => capacity(state),
        };
        Ok(vec![row(&[("tokensAvailable", Value::Number(tokens))])])
    }
}
