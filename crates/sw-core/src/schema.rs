//! Concept and action schemas: the runtime form of a concept definition.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::value::{Value, ValueMap};

/// Semantic field type. Anything the editor writes that is not one of the
/// three primitive names is accepted as `Any`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Any,
}

impl FieldType {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" => FieldType::String,
            "number" => FieldType::Number,
            "boolean" | "bool" => FieldType::Boolean,
            _ => FieldType::Any,
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (FieldType::Any, _)
                | (FieldType::String, Value::String(_))
                | (FieldType::Number, Value::Number(_))
                | (FieldType::Boolean, Value::Bool(_))
        )
    }

    /// Parse an editor `init` string according to this type.
    pub fn parse_init(&self, raw: &str) -> Result<Value> {
        let invalid = || EngineError::InvalidValue(format!("cannot parse {raw:?} as {self:?}"));
        match self {
            FieldType::String => Ok(Value::str(raw)),
            FieldType::Number => raw.trim().parse::<f64>().map(Value::Number).map_err(|_| invalid()),
            FieldType::Boolean => match raw.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            FieldType::Any => Ok(serde_json::from_str::<serde_json::Value>(raw)
                .ok()
                .and_then(|j| Value::from_json(&j).ok())
                .unwrap_or_else(|| Value::str(raw))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    pub optional: bool,
}

impl FieldSpec {
    pub fn required(name: &str, ty: FieldType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            optional: false,
        }
    }

    pub fn optional(name: &str, ty: FieldType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            optional: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateField {
    pub name: String,
    pub ty: FieldType,
    pub default: Option<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// State-mutating action; may appear in `when` and `then`.
    Effect,
    /// Read-only, set-valued lookup; only callable from `where`.
    Query,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Effect => write!(f, "effect"),
            ActionKind::Query => write!(f, "query"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionSchema {
    pub name: String,
    pub kind: ActionKind,
    pub inputs: Vec<FieldSpec>,
    pub outputs: Vec<FieldSpec>,
}

impl ActionSchema {
    pub fn input(&self, name: &str) -> Option<&FieldSpec> {
        self.inputs.iter().find(|f| f.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&FieldSpec> {
        self.outputs.iter().find(|f| f.name == name)
    }

    pub fn required_inputs(&self) -> impl Iterator<Item = &FieldSpec> {
        self.inputs.iter().filter(|f| !f.optional)
    }

    /// Check inputs against the declared fields and fill absent optionals with
    /// `Null`. Unknown fields, missing required fields, nulls in required
    /// fields and type mismatches are all rejected.
    pub fn validate_inputs(&self, concept: &str, inputs: &ValueMap) -> Result<ValueMap> {
        let mismatch = |reason: String| EngineError::InputMismatch {
            concept: concept.to_string(),
            action: self.name.clone(),
            reason,
        };

        if let Some(extra) = inputs.keys().find(|k| self.input(k).is_none()) {
            return Err(mismatch(format!("unexpected field '{extra}'")));
        }

        let mut resolved = ValueMap::new();
        for field in &self.inputs {
            let value = inputs.get(&field.name).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                if !field.optional {
                    return Err(mismatch(format!("missing required field '{}'", field.name)));
                }
            } else if !field.ty.accepts(&value) {
                return Err(mismatch(format!(
                    "field '{}' expects {:?}, got {}",
                    field.name,
                    field.ty,
                    value.type_name()
                )));
            }
            resolved.insert(field.name.clone(), value);
        }
        Ok(resolved)
    }

    /// Project behavior output onto the declared output fields.
    pub fn normalize_outputs(&self, mut outputs: ValueMap) -> ValueMap {
        self.outputs
            .iter()
            .map(|f| {
                let v = outputs.remove(&f.name).unwrap_or(Value::Null);
                (f.name.clone(), v)
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConceptSchema {
    pub id: String,
    pub name: String,
    pub state: Vec<StateField>,
    pub actions: Vec<ActionSchema>,
}

impl ConceptSchema {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            state: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_state(mut self, name: &str, ty: FieldType, default: Option<Value>) -> Self {
        self.state.push(StateField {
            name: name.to_string(),
            ty,
            default,
        });
        self
    }

    pub fn with_action(
        mut self,
        name: &str,
        kind: ActionKind,
        inputs: Vec<FieldSpec>,
        outputs: Vec<FieldSpec>,
    ) -> Self {
        self.actions.push(ActionSchema {
            name: name.to_string(),
            kind,
            inputs,
            outputs,
        });
        self
    }

    pub fn action(&self, name: &str) -> Result<&ActionSchema> {
        self.actions
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| EngineError::ActionNotFound {
                concept: self.id.clone(),
                action: name.to_string(),
            })
    }

    /// Scalar state fields at their defaults.
    pub fn initial_fields(&self) -> ValueMap {
        self.state
            .iter()
            .map(|f| (f.name.clone(), f.default.clone().unwrap_or(Value::Null)))
            .collect()
    }

    pub fn has_state_field(&self, name: &str) -> bool {
        self.state.iter().any(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button() -> ConceptSchema {
        ConceptSchema::new("Concept:Button", "Button").with_action(
            "clicked",
            ActionKind::Effect,
            vec![
                FieldSpec::required("kind", FieldType::String),
                FieldSpec::optional("by", FieldType::String),
            ],
            vec![FieldSpec::optional("by", FieldType::String)],
        )
    }

    #[test]
    fn test_validate_fills_optional_with_null() {
        let schema = button();
        let action = schema.action("clicked").unwrap();
        let mut inputs = ValueMap::new();
        inputs.insert("kind".into(), Value::str("inc"));
        let resolved = action.validate_inputs(&schema.id, &inputs).unwrap();
        assert_eq!(resolved.get("by"), Some(&Value::Null));
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let schema = button();
        let action = schema.action("clicked").unwrap();
        let err = action.validate_inputs(&schema.id, &ValueMap::new()).unwrap_err();
        assert_eq!(err.kind(), "InputMismatchError");
        assert!(err.to_string().contains("kind"));
    }

    #[test]
    fn test_validate_rejects_unknown_and_mistyped() {
        let schema = button();
        let action = schema.action("clicked").unwrap();
        let mut inputs = ValueMap::new();
        inputs.insert("kind".into(), Value::Number(1.0));
        assert!(action.validate_inputs(&schema.id, &inputs).is_err());

        let mut inputs = ValueMap::new();
        inputs.insert("kind".into(), Value::str("inc"));
        inputs.insert("color".into(), Value::str("red"));
        assert!(action.validate_inputs(&schema.id, &inputs).is_err());
    }

    #[test]
    fn test_unknown_action() {
        let err = button().action("pressed").unwrap_err();
        assert_eq!(err.kind(), "ActionNotFoundError");
    }

    #[test]
    fn test_parse_init() {
        assert_eq!(FieldType::Number.parse_init("0").unwrap(), Value::Number(0.0));
        assert_eq!(FieldType::Boolean.parse_init("true").unwrap(), Value::Bool(true));
        assert_eq!(FieldType::String.parse_init("0").unwrap(), Value::str("0"));
        assert!(FieldType::Number.parse_init("ten").is_err());
        assert_eq!(FieldType::Any.parse_init("10").unwrap(), Value::Number(10.0));
    }

    #[test]
    fn test_normalize_outputs_projects_declared() {
        let schema = button();
        let action = schema.action("clicked").unwrap();
        let mut out = ValueMap::new();
        out.insert("extra".into(), Value::Bool(true));
        let normalized = action.normalize_outputs(out);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized.get("by"), Some(&Value::Null));
    }
}
