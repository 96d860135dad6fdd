use std::fmt;

use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::expr::ExprError;
use crate::schema::ActionKind;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    DuplicateConcept(String),
    UnknownConcept(String),
    ActionNotFound {
        concept: String,
        action: String,
    },
    KindMismatch {
        concept: String,
        action: String,
        expected: ActionKind,
    },
    InputMismatch {
        concept: String,
        action: String,
        reason: String,
    },
    UnknownField {
        concept: String,
        action: String,
        field: String,
    },
    UnboundVariable {
        rule: String,
        var: String,
    },
    UndeclaredVariable {
        rule: String,
        var: String,
    },
    DuplicateRule(String),
    UnsupportedStep {
        rule: String,
        op: String,
    },
    InvalidRule {
        rule: String,
        reason: String,
    },
    InvalidValue(String),
    Expression(ExprError),
    Behavior {
        concept: String,
        action: String,
        message: String,
    },
    CascadeLimitExceeded {
        limit: usize,
        reason: &'static str,
    },
    BudgetExhausted {
        elapsed_ms: u64,
        budget_ms: u64,
    },
    Graph(String),
    /// Several load-time problems reported together.
    Invalid(Vec<EngineError>),
}

impl EngineError {
    /// Stable taxonomy name, used by the CLI and MCP surfaces.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::DuplicateConcept(_) => "DuplicateConceptError",
            EngineError::UnknownConcept(_) => "UnknownConceptError",
            EngineError::ActionNotFound { .. } => "ActionNotFoundError",
            EngineError::KindMismatch { .. } => "KindMismatchError",
            EngineError::InputMismatch { .. } => "InputMismatchError",
            EngineError::UnknownField { .. } => "UnknownFieldError",
            EngineError::UnboundVariable { .. } => "UnboundVariableError",
            EngineError::UndeclaredVariable { .. } => "UndeclaredVariableError",
            EngineError::DuplicateRule(_) => "DuplicateRuleError",
            EngineError::UnsupportedStep { .. } => "UnsupportedStepError",
            EngineError::InvalidRule { .. } => "InvalidRuleError",
            EngineError::InvalidValue(_) => "InvalidValueError",
            EngineError::Expression(ExprError::Unbound(_)) => "UnboundVariableError",
            EngineError::Expression(_) => "ExpressionError",
            EngineError::Behavior { .. } => "BehaviorError",
            EngineError::CascadeLimitExceeded { .. } => "CascadeLimitExceededError",
            EngineError::BudgetExhausted { .. } => "BudgetExhaustedError",
            EngineError::Graph(_) => "GraphFormatError",
            EngineError::Invalid(_) => "ValidationError",
        }
    }

    /// Flatten an `Invalid` aggregate into its individual problems.
    pub fn problems(&self) -> Vec<&EngineError> {
        match self {
            EngineError::Invalid(errors) => errors.iter().flat_map(|e| e.problems()).collect(),
            other => vec![other],
        }
    }

    /// Collapse a list of load problems: none → `Ok`, one → itself, more → `Invalid`.
    pub fn collect(mut errors: Vec<EngineError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(EngineError::Invalid(errors)),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::DuplicateConcept(id) => write!(f, "concept already registered: {id}"),
            EngineError::UnknownConcept(id) => write!(f, "unknown concept: {id}"),
            EngineError::ActionNotFound { concept, action } => {
                write!(f, "concept {concept} has no action {action}")
            }
            EngineError::KindMismatch {
                concept,
                action,
                expected,
            } => write!(f, "{concept}.{action} is not a {expected} action"),
            EngineError::InputMismatch {
                concept,
                action,
                reason,
            } => write!(f, "input mismatch for {concept}.{action}: {reason}"),
            EngineError::UnknownField {
                concept,
                action,
                field,
            } => write!(f, "{concept}.{action} has no field {field}"),
            EngineError::UnboundVariable { rule, var } => {
                write!(f, "sync {rule}: variable {var} is read before it is bound")
            }
            EngineError::UndeclaredVariable { rule, var } => {
                write!(f, "sync {rule}: variable {var} is not declared")
            }
            EngineError::DuplicateRule(id) => write!(f, "sync already defined: {id}"),
            EngineError::UnsupportedStep { rule, op } => {
                write!(f, "sync {rule}: where-step kind '{op}' is reserved and not supported")
            }
            EngineError::InvalidRule { rule, reason } => write!(f, "sync {rule}: {reason}"),
            EngineError::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
            EngineError::Expression(e) => write!(f, "expression error: {e}"),
            EngineError::Behavior {
                concept,
                action,
                message,
            } => write!(f, "{concept}.{action} failed: {message}"),
            EngineError::CascadeLimitExceeded { limit, reason } => {
                write!(f, "cascade limit exceeded ({reason} limit {limit})")
            }
            EngineError::BudgetExhausted {
                elapsed_ms,
                budget_ms,
            } => write!(f, "time budget exhausted after {elapsed_ms}ms (budget {budget_ms}ms)"),
            EngineError::Graph(msg) => write!(f, "malformed graph: {msg}"),
            EngineError::Invalid(errors) => {
                write!(f, "{} validation errors", errors.len())?;
                for e in errors {
                    write!(f, "\n  - {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for EngineError {}

/// Serialized as `{ "kind": .., "message": .. }` for traces and tool output.
impl Serialize for EngineError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("EngineError", 2)?;
        st.serialize_field("kind", self.kind())?;
        st.serialize_field("message", &self.to_string())?;
        st.end()
    }
}

impl From<ExprError> for EngineError {
    fn from(e: ExprError) -> Self {
        EngineError::Expression(e)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Graph(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_single_is_unwrapped() {
        let err = EngineError::collect(vec![EngineError::UnknownConcept("X".into())]).unwrap_err();
        assert_eq!(err.kind(), "UnknownConceptError");
    }

    #[test]
    fn test_collect_many_aggregates() {
        let err = EngineError::collect(vec![
            EngineError::UnknownConcept("X".into()),
            EngineError::DuplicateRule("S".into()),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert_eq!(err.problems().len(), 2);
        assert!(err.to_string().contains("2 validation errors"));
    }

    #[test]
    fn test_unbound_expression_maps_to_unbound_kind() {
        let err = EngineError::from(ExprError::Unbound("x".into()));
        assert_eq!(err.kind(), "UnboundVariableError");
    }
}
