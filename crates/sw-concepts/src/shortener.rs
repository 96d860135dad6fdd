//! Concepts of the URL shortener: nonces, the short-to-long mapping,
//! analytics events and expiry.

use rand::distr::Alphanumeric;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sw_core::{
    ActionSchema, BehaviorError, BehaviorResult, ConceptBehavior, ConceptState, Value, ValueMap,
    default_effect,
};

use crate::library::{position, row, text};

pub const NONCE_LEN: usize = 6;

/// `generate` returns a fresh alphanumeric `nonce`, never one it issued
/// before. Issued nonces are kept as rows. A seeded generator replays the
/// same nonces after a reset.
pub struct NonceGenerator {
    seed: Option<u64>,
    rng: SmallRng,
}

fn rng_for(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    }
}

impl NonceGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            seed,
            rng: rng_for(seed),
        }
    }

    fn fresh(&mut self, state: &ConceptState) -> String {
        loop {
            let nonce: String = (&mut self.rng)
                .sample_iter(Alphanumeric)
                .take(NONCE_LEN)
                .map(char::from)
                .collect();
            if position(state, "nonce", &nonce).is_none() {
                return nonce;
            }
        }
    }
}

impl ConceptBehavior for NonceGenerator {
    fn apply_effect(
        &mut self,
        action: &ActionSchema,
        state: &mut ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<ValueMap> {
        if action.name != "generate" {
            return Ok(default_effect(action, state, inputs));
        }
        let nonce = Value::str(self.fresh(state));
        state.rows.push(row(&[("nonce", nonce.clone())]));
        Ok(row(&[("nonce", nonce)]))
    }

    fn reset(&mut self) {
        self.rng = rng_for(self.seed);
    }
}

/// Rows of `{shortUrl, longUrl}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct UrlShortening;

impl ConceptBehavior for UrlShortening {
    fn apply_effect(
        &mut self,
        action: &ActionSchema,
        state: &mut ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<ValueMap> {
        match action.name.as_str() {
            "register" => {
                let short = text(inputs, "shortUrl")?;
                let long = text(inputs, "longUrl")?;
                if position(state, "shortUrl", short).is_some() {
                    return Err(BehaviorError(format!("short url already registered: {short}")));
                }
                state.rows.push(row(&[
                    ("shortUrl", Value::str(short)),
                    ("longUrl", Value::str(long)),
                ]));
                Ok(row(&[("shortUrl", Value::str(short))]))
            }
            "lookup" => {
                let short = text(inputs, "shortUrl")?;
                let i = position(state, "shortUrl", short)
                    .ok_or_else(|| BehaviorError(format!("unknown short url: {short}")))?;
                let long = state.rows[i].get("longUrl").cloned().unwrap_or(Value::Null);
                Ok(row(&[("longUrl", long)]))
            }
            "delete" => {
                let short = text(inputs, "shortUrl")?;
                state
                    .rows
                    .retain(|r| r.get("shortUrl").and_then(Value::as_str) != Some(short));
                Ok(ValueMap::new())
            }
            _ => Ok(default_effect(action, state, inputs)),
        }
    }
}

/// Append-only event rows of `{url, event}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebAnalytics;

impl ConceptBehavior for WebAnalytics {
    fn apply_effect(
        &mut self,
        action: &ActionSchema,
        state: &mut ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<ValueMap> {
        if action.name == "register" {
            let url = text(inputs, "url")?;
            let event = text(inputs, "event")?;
            state
                .rows
                .push(row(&[("url", Value::str(url)), ("event", Value::str(event))]));
        }
        Ok(default_effect(action, state, inputs))
    }
}

/// Rows of `{resource, seconds}`. `setExpiry` replaces an existing entry;
/// `expireResource` removes it and fails for resources never scheduled.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExpiringResource;

impl ConceptBehavior for ExpiringResource {
    fn apply_effect(
        &mut self,
        action: &ActionSchema,
        state: &mut ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<ValueMap> {
        match action.name.as_str() {
            "setExpiry" => {
                let resource = text(inputs, "resource")?;
                let seconds = inputs
                    .get("seconds")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| BehaviorError("'seconds' must be a number".into()))?;
                let entry = row(&[
                    ("resource", Value::str(resource)),
                    ("seconds", Value::Number(seconds)),
                ]);
                match position(state, "resource", resource) {
                    Some(i) => state.rows[i] = entry,
                    None => state.rows.push(entry),
                }
                Ok(ValueMap::new())
            }
            "expireResource" => {
                let resource = text(inputs, "resource")?;
                let i = position(state, "resource", resource)
                    .ok_or_else(|| BehaviorError(format!("no expiry set for {resource}")))?;
                state.rows.remove(i);
                Ok(row(&[("resource", Value::str(resource))]))
            }
            _ => Ok(default_effect(action, state, inputs)),
        }
    }
}
