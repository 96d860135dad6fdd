//! What one external submit did.

use std::fmt;

use serde::Serialize;

use crate::binding::Bindings;
use crate::error::EngineError;
use crate::log::ActionRecord;

/// Why a continuation stopped without dispatching. None of these are errors.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Abandon {
    EmptyQuery { step: String },
    FilterFalse { step: String },
    /// A query row disagreed with an already-bound variable.
    Conflict { step: String },
}

impl fmt::Display for Abandon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Abandon::EmptyQuery { step } => write!(f, "{step} returned no rows"),
            Abandon::FilterFalse { step } => write!(f, "{step} was false"),
            Abandon::Conflict { step } => write!(f, "{step} rows conflict with bindings"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContinuationOutcome {
    /// Every then-pattern ran; seqs of the records it produced.
    Dispatched { records: Vec<u64> },
    Abandoned(Abandon),
    /// A where-step or then-dispatch failed. Records already produced stay.
    Failed {
        error: EngineError,
        dispatched: Vec<u64>,
    },
    /// Never dispatched because the trigger hit a cascade or time limit.
    Aborted,
}

/// One continuation of one rule firing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Evaluation {
    pub rule: String,
    pub pass: usize,
    /// Record seqs that filled the when-patterns, in pattern order.
    pub matched: Vec<u64>,
    pub bindings: Bindings,
    pub outcome: ContinuationOutcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Quiescent,
    CascadeLimitExceeded,
    BudgetExhausted,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trace {
    pub trigger: u64,
    /// The external record first, then cascaded records in seq order.
    pub records: Vec<ActionRecord>,
    pub evaluations: Vec<Evaluation>,
    /// Cascade passes that dispatched at least one record.
    pub passes: usize,
    pub outcome: Outcome,
}

impl Trace {
    pub(crate) fn new(trigger: u64, external: ActionRecord) -> Self {
        Self {
            trigger,
            records: vec![external],
            evaluations: Vec::new(),
            passes: 0,
            outcome: Outcome::Quiescent,
        }
    }

    pub fn external(&self) -> &ActionRecord {
        &self.records[0]
    }

    /// Cascaded records only.
    pub fn cascaded(&self) -> &[ActionRecord] {
        &self.records[1..]
    }

    pub fn records_of<'a>(
        &'a self,
        concept: &'a str,
        action: &'a str,
    ) -> impl Iterator<Item = &'a ActionRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| r.concept == concept && r.action == action)
    }

    pub fn firings<'a>(&'a self, rule: &'a str) -> impl Iterator<Item = &'a Evaluation> + 'a {
        self.evaluations.iter().filter(move |e| e.rule == rule)
    }

    /// Human-readable, one line per record then one per evaluation.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for r in &self.records {
            out.push_str(&r.summary());
            out.push('\n');
        }
        for e in &self.evaluations {
            let seqs: Vec<String> = e.matched.iter().map(|s| format!("#{s}")).collect();
            let status = match &e.outcome {
                ContinuationOutcome::Dispatched { records } => {
                    format!("dispatched {} record(s)", records.len())
                }
                ContinuationOutcome::Abandoned(why) => format!("abandoned: {why}"),
                ContinuationOutcome::Failed { error, .. } => format!("failed: {error}"),
                ContinuationOutcome::Aborted => "aborted".to_string(),
            };
            out.push_str(&format!(
                "  pass {} {} [{}] {}\n",
                e.pass,
                e.rule,
                seqs.join(", "),
                status
            ));
        }
        out
    }
}

/// An external submit that did not reach quiescence. `trace` is `None` when
/// the external call itself was rejected and nothing was recorded.
#[derive(Clone, Debug, PartialEq)]
pub struct SubmitFailure {
    pub error: EngineError,
    pub trace: Option<Trace>,
}

impl SubmitFailure {
    pub(crate) fn rejected(error: EngineError) -> Self {
        Self { error, trace: None }
    }
}

impl fmt::Display for SubmitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.trace {
            Some(t) => write!(f, "{} (after {} records)", self.error, t.records.len()),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for SubmitFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<SubmitFailure> for EngineError {
    fn from(f: SubmitFailure) -> Self {
        f.error
    }
}
