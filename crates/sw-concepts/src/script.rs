//! Scripted trigger sequences.
//!
//! A script is a JSON array of steps:
//!
//! ```json
//! [{ "concept": "Button", "action": "clicked", "inputs": { "kind": "inc" }, "repeat": 3 }]
//! ```
//!
//! Concepts may be given by id or unique name. Each repetition is its own
//! external submit, so steps never share a triggering window.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use sw_core::{SubmitFailure, SyncEngine, Trace, ValueMap, map_from_json};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub concept: String,
    pub action: String,
    #[serde(default)]
    pub inputs: Map<String, Json>,
    #[serde(default = "once", skip_serializing_if = "is_once")]
    pub repeat: usize,
}

fn once() -> usize {
    1
}

fn is_once(n: &usize) -> bool {
    *n == 1
}

impl Step {
    /// `inputs` should be a JSON object; anything else means no inputs.
    pub fn new(concept: &str, action: &str, inputs: Json) -> Self {
        let inputs = match inputs {
            Json::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            concept: concept.to_string(),
            action: action.to_string(),
            inputs,
            repeat: 1,
        }
    }

    pub fn times(mut self, repeat: usize) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn label(&self) -> String {
        format!("{}.{}", self.concept, self.action)
    }

    pub fn input_map(&self) -> sw_core::Result<ValueMap> {
        map_from_json(&Json::Object(self.inputs.clone()))
    }
}

pub fn parse_script(json: &str) -> sw_core::Result<Vec<Step>> {
    Ok(serde_json::from_str(json)?)
}

/// Outcome of one submit of a script.
#[derive(Debug)]
pub struct Played {
    /// Index of the step in the script.
    pub step: usize,
    /// Zero-based repetition of that step.
    pub round: usize,
    pub label: String,
    pub result: Result<Trace, SubmitFailure>,
}

/// Submit every step in order. Failures are reported per submit and never
/// stop the script.
pub fn play(engine: &mut SyncEngine, steps: &[Step]) -> Vec<Played> {
    let mut played = Vec::new();
    for (i, step) in steps.iter().enumerate() {
        let inputs = step.input_map();
        for round in 0..step.repeat {
            let result = match &inputs {
                Ok(inputs) => engine.submit(&step.concept, &step.action, inputs.clone()),
                Err(error) => Err(SubmitFailure {
                    error: error.clone(),
                    trace: None,
                }),
            };
            if let Err(failure) = &result {
                tracing::debug!(step = i, round, error = %failure, "script step failed");
            }
            played.push(Played {
                step: i,
                round,
                label: step.label(),
                result,
            });
        }
    }
    played
}
