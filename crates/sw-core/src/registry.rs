//! The concept registry and state store.
//!
//! Each concept instance pairs its schema with its current state and the
//! behavior that implements its actions. Effects run on a copy of the state
//! and are committed only on success.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::concept::{ConceptBehavior, ConceptState};
use crate::error::{EngineError, Result};
use crate::schema::{ActionKind, ConceptSchema};
use crate::value::ValueMap;

/// One concept's schema, state and behavior.
pub struct ConceptInstance {
    pub schema: ConceptSchema,
    pub state: ConceptState,
    behavior: Box<dyn ConceptBehavior>,
}

impl ConceptInstance {
    pub fn new(schema: ConceptSchema, behavior: Box<dyn ConceptBehavior>) -> Self {
        let state = ConceptState::from_schema(&schema);
        Self {
            schema,
            state,
            behavior,
        }
    }
}

/// Owns every concept instance. Each instance sits behind its own lock so
/// effects on one concept are mutually exclusive without serializing the
/// whole registry.
#[derive(Default)]
pub struct ConceptRegistry {
    instances: BTreeMap<String, Mutex<ConceptInstance>>,
    order: Vec<String>,
}

impl ConceptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        schema: ConceptSchema,
        behavior: Box<dyn ConceptBehavior>,
    ) -> Result<()> {
        if self.instances.contains_key(&schema.id) {
            return Err(EngineError::DuplicateConcept(schema.id));
        }
        let id = schema.id.clone();
        self.instances
            .insert(id.clone(), Mutex::new(ConceptInstance::new(schema, behavior)));
        self.order.push(id);
        Ok(())
    }

    fn lock(&self, concept_id: &str) -> Result<MutexGuard<'_, ConceptInstance>> {
        let slot = self
            .instances
            .get(concept_id)
            .ok_or_else(|| EngineError::UnknownConcept(concept_id.to_string()))?;
        // A poisoned lock only means a behavior panicked mid-call; state is
        // only ever replaced wholesale, so the instance is still consistent.
        Ok(slot.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn contains(&self, concept_id: &str) -> bool {
        self.instances.contains_key(concept_id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Concept ids in registration order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn schema(&self, concept_id: &str) -> Result<ConceptSchema> {
        Ok(self.lock(concept_id)?.schema.clone())
    }

    pub fn schemas(&self) -> Vec<ConceptSchema> {
        self.order
            .iter()
            .filter_map(|id| self.schema(id).ok())
            .collect()
    }

    /// Resolve a concept by exact id, falling back to a unique name match.
    pub fn resolve(&self, name_or_id: &str) -> Result<String> {
        if self.contains(name_or_id) {
            return Ok(name_or_id.to_string());
        }
        let matches: Vec<&String> = self
            .order
            .iter()
            .filter(|id| {
                self.lock(id)
                    .map(|inst| inst.schema.name == name_or_id)
                    .unwrap_or(false)
            })
            .collect();
        match matches.as_slice() {
            [id] => Ok((*id).clone()),
            _ => Err(EngineError::UnknownConcept(name_or_id.to_string())),
        }
    }

    pub fn get_state(&self, concept_id: &str) -> Result<ConceptState> {
        Ok(self.lock(concept_id)?.state.clone())
    }

    /// Check an effect call against its schema without touching state.
    /// Returns the inputs with absent optionals filled in.
    pub fn validate_effect(
        &self,
        concept_id: &str,
        action_name: &str,
        inputs: &ValueMap,
    ) -> Result<ValueMap> {
        let guard = self.lock(concept_id)?;
        let action = guard.schema.action(action_name)?;
        if action.kind != ActionKind::Effect {
            return Err(EngineError::KindMismatch {
                concept: concept_id.to_string(),
                action: action_name.to_string(),
                expected: ActionKind::Effect,
            });
        }
        action.validate_inputs(concept_id, inputs)
    }

    /// Apply an effect. The behavior works on a copy of the state which is
    /// committed only when it succeeds.
    pub fn apply_effect(
        &self,
        concept_id: &str,
        action_name: &str,
        inputs: &ValueMap,
    ) -> Result<ValueMap> {
        let mut guard = self.lock(concept_id)?;
        let inst = &mut *guard;
        let action = inst.schema.action(action_name)?.clone();
        if action.kind != ActionKind::Effect {
            return Err(EngineError::KindMismatch {
                concept: concept_id.to_string(),
                action: action_name.to_string(),
                expected: ActionKind::Effect,
            });
        }

        let mut next = inst.state.clone();
        let outputs = inst
            .behavior
            .apply_effect(&action, &mut next, inputs)
            .map_err(|e| EngineError::Behavior {
                concept: concept_id.to_string(),
                action: action_name.to_string(),
                message: e.0,
            })?;
        inst.state = next;
        Ok(action.normalize_outputs(outputs))
    }

    pub fn run_query(
        &self,
        concept_id: &str,
        query_name: &str,
        inputs: &ValueMap,
    ) -> Result<Vec<ValueMap>> {
        let guard = self.lock(concept_id)?;
        let action = guard.schema.action(query_name)?;
        if action.kind != ActionKind::Query {
            return Err(EngineError::KindMismatch {
                concept: concept_id.to_string(),
                action: query_name.to_string(),
                expected: ActionKind::Query,
            });
        }
        let rows = guard
            .behavior
            .run_query(action, &guard.state, inputs)
            .map_err(|e| EngineError::Behavior {
                concept: concept_id.to_string(),
                action: query_name.to_string(),
                message: e.0,
            })?;
        Ok(rows
            .into_iter()
            .map(|row| action.normalize_outputs(row))
            .collect())
    }

    /// Restore every instance to its schema defaults and rewind its behavior.
    pub fn reset(&mut self) {
        for slot in self.instances.values_mut() {
            let inst = slot.get_mut().unwrap_or_else(|e| e.into_inner());
            inst.state = ConceptState::from_schema(&inst.schema);
            inst.behavior.reset();
        }
    }

    pub(crate) fn insert_instance(&mut self, instance: ConceptInstance) -> Result<()> {
        if self.instances.contains_key(&instance.schema.id) {
            return Err(EngineError::DuplicateConcept(instance.schema.id));
        }
        let id = instance.schema.id.clone();
        self.instances.insert(id.clone(), Mutex::new(instance));
        self.order.push(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::{BehaviorError, BehaviorResult, Passive};
    use crate::schema::{ActionSchema, FieldSpec, FieldType};
    use crate::value::Value;

    struct Failing;

    impl ConceptBehavior for Failing {
        fn apply_effect(
            &mut self,
            _action: &ActionSchema,
            state: &mut ConceptState,
            _inputs: &ValueMap,
        ) -> BehaviorResult<ValueMap> {
            state.set("count", Value::Number(99.0));
            Err(BehaviorError("boom".into()))
        }
    }

    fn schema(id: &str, name: &str) -> ConceptSchema {
        ConceptSchema::new(id, name)
            .with_state("count", FieldType::Number, Some(Value::Number(0.0)))
            .with_action(
                "set",
                ActionKind::Effect,
                vec![FieldSpec::required("count", FieldType::Number)],
                vec![],
            )
            .with_action(
                "_get",
                ActionKind::Query,
                vec![],
                vec![FieldSpec::required("count", FieldType::Number)],
            )
    }

    fn inputs(count: f64) -> ValueMap {
        let mut m = ValueMap::new();
        m.insert("count".into(), Value::Number(count));
        m
    }

    #[test]
    fn test_duplicate_register() {
        let mut reg = ConceptRegistry::new();
        reg.register(schema("C:1", "One"), Box::new(Passive)).unwrap();
        let err = reg
            .register(schema("C:1", "Other"), Box::new(Passive))
            .unwrap_err();
        assert_eq!(err.kind(), "DuplicateConceptError");
    }

    #[test]
    fn test_unknown_concept() {
        let reg = ConceptRegistry::new();
        assert_eq!(reg.get_state("nope").unwrap_err().kind(), "UnknownConceptError");
    }

    #[test]
    fn test_effect_then_query() {
        let mut reg = ConceptRegistry::new();
        reg.register(schema("C:1", "One"), Box::new(Passive)).unwrap();
        reg.apply_effect("C:1", "set", &inputs(4.0)).unwrap();
        let rows = reg.run_query("C:1", "_get", &ValueMap::new()).unwrap();
        assert_eq!(rows[0]["count"], Value::Number(4.0));
    }

    #[test]
    fn test_failed_effect_leaves_state_untouched() {
        let mut reg = ConceptRegistry::new();
        reg.register(schema("C:1", "One"), Box::new(Failing)).unwrap();
        let err = reg.apply_effect("C:1", "set", &inputs(1.0)).unwrap_err();
        assert_eq!(err.kind(), "BehaviorError");
        assert_eq!(reg.get_state("C:1").unwrap().field("count"), &Value::Number(0.0));
    }

    #[test]
    fn test_kind_is_enforced() {
        let mut reg = ConceptRegistry::new();
        reg.register(schema("C:1", "One"), Box::new(Passive)).unwrap();
        assert_eq!(
            reg.apply_effect("C:1", "_get", &ValueMap::new()).unwrap_err().kind(),
            "KindMismatchError"
        );
        assert_eq!(
            reg.run_query("C:1", "set", &inputs(1.0)).unwrap_err().kind(),
            "KindMismatchError"
        );
    }

    #[test]
    fn test_resolve_by_name() {
        let mut reg = ConceptRegistry::new();
        reg.register(schema("Concept:Counter", "Counter"), Box::new(Passive))
            .unwrap();
        assert_eq!(reg.resolve("Counter").unwrap(), "Concept:Counter");
        assert_eq!(reg.resolve("Concept:Counter").unwrap(), "Concept:Counter");
        assert!(reg.resolve("Missing").is_err());
    }

    #[test]
    fn test_validate_effect_rejects_bad_inputs() {
        let mut reg = ConceptRegistry::new();
        reg.register(schema("C:1", "One"), Box::new(Passive)).unwrap();
        let err = reg.validate_effect("C:1", "set", &ValueMap::new()).unwrap_err();
        assert_eq!(err.kind(), "InputMismatchError");
        let mut wrong = ValueMap::new();
        wrong.insert("count".into(), Value::str("three"));
        assert!(reg.validate_effect("C:1", "set", &wrong).is_err());
        assert!(reg.validate_effect("C:1", "set", &inputs(3.0)).is_ok());
        assert_eq!(reg.get_state("C:1").unwrap().field("count"), &Value::Number(0.0));
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut reg = ConceptRegistry::new();
        reg.register(schema("C:1", "One"), Box::new(Passive)).unwrap();
        reg.apply_effect("C:1", "set", &inputs(8.0)).unwrap();
        reg.reset();
        assert_eq!(reg.get_state("C:1").unwrap().field("count"), &Value::Number(0.0));
    }
}
