//! Concept state and the behavior seam.
//!
//! The engine never knows what an action *does*. Concrete semantics come
//! from a [`ConceptBehavior`] supplied by the caller through a
//! [`BehaviorProvider`]; behaviors that only need the schema-driven defaults
//! can rely on the provided trait methods.

use serde::{Deserialize, Serialize};

use crate::schema::{ActionSchema, ConceptSchema};
use crate::value::{Value, ValueMap};

/// Mutable state of one concept instance: scalar fields plus a relation of
/// rows that set-valued queries range over.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptState {
    pub fields: ValueMap,
    #[serde(default)]
    pub rows: Vec<ValueMap>,
}

impl ConceptState {
    pub fn from_schema(schema: &ConceptSchema) -> Self {
        Self {
            fields: schema.initial_fields(),
            rows: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&Value::Null)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }

    /// Rows whose fields equal every given `(field, value)` pair.
    pub fn rows_where<'a>(
        &'a self,
        constraints: &'a [(&'a str, &'a Value)],
    ) -> impl Iterator<Item = &'a ValueMap> + 'a {
        self.rows.iter().filter(move |row| {
            constraints
                .iter()
                .all(|(k, v)| row.get(*k).is_some_and(|rv| rv == *v))
        })
    }
}

/// Failure raised by a behavior. The registry discards any state changes made
/// by a failing effect.
#[derive(Clone, Debug, PartialEq)]
pub struct BehaviorError(pub String);

impl std::fmt::Display for BehaviorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for BehaviorError {}

pub type BehaviorResult<T> = std::result::Result<T, BehaviorError>;

pub trait ConceptBehavior: Send {
    /// Apply an effect action. Inputs are already validated against the schema.
    fn apply_effect(
        &mut self,
        action: &ActionSchema,
        state: &mut ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<ValueMap> {
        Ok(default_effect(action, state, inputs))
    }

    /// Run a query. Must not mutate; may return zero, one or many rows.
    fn run_query(
        &self,
        action: &ActionSchema,
        state: &ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<Vec<ValueMap>> {
        Ok(default_query(action, state, inputs))
    }

    /// Drop anything kept outside `ConceptState`, such as a seeded RNG.
    /// Called when the engine resets.
    fn reset(&mut self) {}
}

/// Assign inputs that name scalar state fields, then echo outputs from the
/// inputs or state.
pub fn default_effect(action: &ActionSchema, state: &mut ConceptState, inputs: &ValueMap) -> ValueMap {
    for (name, value) in inputs {
        if state.fields.contains_key(name) && !value.is_null() {
            state.fields.insert(name.clone(), value.clone());
        }
    }
    action
        .outputs
        .iter()
        .map(|f| {
            let v = inputs
                .get(&f.name)
                .filter(|v| !v.is_null())
                .or_else(|| state.fields.get(&f.name))
                .cloned()
                .unwrap_or(Value::Null);
            (f.name.clone(), v)
        })
        .collect()
}

/// Filter the relation (or the scalar fields, when there are no rows) by the
/// non-null inputs and project onto the declared outputs. A concept with
/// neither rows nor fields has nothing to return.
pub fn default_query(action: &ActionSchema, state: &ConceptState, inputs: &ValueMap) -> Vec<ValueMap> {
    let candidates: Vec<&ValueMap> = if !state.rows.is_empty() {
        state.rows.iter().collect()
    } else if !state.fields.is_empty() {
        vec![&state.fields]
    } else {
        Vec::new()
    };

    candidates
        .into_iter()
        .filter(|row| {
            inputs
                .iter()
                .filter(|(_, v)| !v.is_null())
                .all(|(k, v)| row.get(k).is_none_or(|rv| rv == v))
        })
        .map(|row| {
            action
                .outputs
                .iter()
                .map(|f| (f.name.clone(), row.get(&f.name).cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .collect()
}

/// Behavior with only the schema-driven defaults.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passive;

impl ConceptBehavior for Passive {}

/// Chooses a behavior for each concept schema when a graph is loaded.
pub trait BehaviorProvider {
    fn behavior_for(&self, schema: &ConceptSchema) -> Box<dyn ConceptBehavior>;
}

/// Every concept gets [`Passive`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PassiveProvider;

impl BehaviorProvider for PassiveProvider {
    fn behavior_for(&self, _schema: &ConceptSchema) -> Box<dyn ConceptBehavior> {
        Box::new(Passive)
    }
}

impl<F> BehaviorProvider for F
where
    F: Fn(&ConceptSchema) -> Box<dyn ConceptBehavior>,
{
    fn behavior_for(&self, schema: &ConceptSchema) -> Box<dyn ConceptBehavior> {
        self(schema)
    }
}
