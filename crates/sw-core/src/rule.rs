//! Validated, immutable synchronization rules.
//!
//! These are the runtime form of the editor's sync nodes: every concept
//! reference is a checked id, every binding a parsed [`Term`], every filter a
//! parsed [`Expr`]. They are only built by the graph compiler.

use std::collections::BTreeSet;

use crate::binding::{Bindings, FieldTerms, Term, unify_sections};
use crate::expr::{Expr, ExprError};
use crate::log::ActionRecord;

/// A `when` pattern matched against completed effect records.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionPattern {
    pub concept: String,
    pub action: String,
    pub inputs: FieldTerms,
    pub outputs: FieldTerms,
}

impl ActionPattern {
    pub fn targets(&self, record: &ActionRecord) -> bool {
        self.concept == record.concept && self.action == record.action
    }

    /// Try to extend `env` with `record`. On `Ok(false)` the env is garbage.
    pub fn unify(&self, record: &ActionRecord, env: &mut Bindings) -> Result<bool, ExprError> {
        if !self.targets(record) {
            return Ok(false);
        }
        unify_sections(
            &[
                (self.inputs.as_slice(), &record.inputs),
                (self.outputs.as_slice(), &record.outputs),
            ],
            env,
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryStep {
    pub concept: String,
    pub query: String,
    pub inputs: FieldTerms,
    pub outputs: FieldTerms,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WhereStep {
    Query(QueryStep),
    Filter { source: String, expr: Expr },
}

impl WhereStep {
    pub fn label(&self) -> String {
        match self {
            WhereStep::Query(q) => format!("query {}.{}", q.concept, q.query),
            WhereStep::Filter { source, .. } => format!("filter {source}"),
        }
    }
}

/// A `then` pattern: an effect dispatched once per surviving continuation.
#[derive(Clone, Debug, PartialEq)]
pub struct ThenPattern {
    pub concept: String,
    pub action: String,
    pub inputs: FieldTerms,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyncRule {
    pub id: String,
    pub name: String,
    pub vars: BTreeSet<String>,
    pub when: Vec<ActionPattern>,
    pub where_steps: Vec<WhereStep>,
    pub then: Vec<ThenPattern>,
}

impl SyncRule {
    /// Whether any `when` pattern could match `record`.
    pub fn watches(&self, record: &ActionRecord) -> bool {
        self.when.iter().any(|p| p.targets(record))
    }
}

/// Rules in declaration order. Evaluation always walks them in that order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<SyncRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<SyncRule>) -> Self {
        Self { rules }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SyncRule> {
        self.rules.iter()
    }

    pub fn get(&self, id: &str) -> Option<&SyncRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a SyncRule;
    type IntoIter = std::slice::Iter<'a, SyncRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

/// Variables read by a term list.
pub(crate) fn term_vars(terms: &[(String, Term)]) -> impl Iterator<Item = &str> {
    terms.iter().flat_map(|(_, t)| t.vars())
}
