//! The synchronization engine.
//!
//! One external submit opens a triggering window. Pass 0 evaluates the
//! external record; every later pass evaluates all rules, in declaration
//! order, against the records produced by the previous pass. A pass first
//! collects every surviving continuation and only then dispatches their
//! then-patterns, so all where-steps of a pass see the same state. The loop
//! stops at the first pass that dispatches nothing.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::binding::{Bindings, resolve_fields, unify_fields};
use crate::concept::{BehaviorProvider, ConceptState};
use crate::config::{EngineConfig, SubmitOptions};
use crate::dispatcher::{Call, dispatch};
use crate::error::{EngineError, Result};
use crate::expr::ExprError;
use crate::graph::{ComposerGraph, Diagnostic};
use crate::log::{ActionLog, ActionRecord};
use crate::registry::{ConceptInstance, ConceptRegistry};
use crate::rule::{ActionPattern, RuleSet, SyncRule, WhereStep};
use crate::time::{Clock, SystemClock};
use crate::trace::{Abandon, ContinuationOutcome, Evaluation, Outcome, SubmitFailure, Trace};
use crate::value::{Value, ValueMap};

pub struct SyncEngine {
    registry: ConceptRegistry,
    rules: RuleSet,
    log: ActionLog,
    config: EngineConfig,
    diagnostics: Vec<Diagnostic>,
    clock: Box<dyn Clock>,
    next_trigger: u64,
}

/// A continuation that survived its where-steps and waits for dispatch.
struct Ready<'r> {
    rule: &'r SyncRule,
    evaluation: usize,
    env: Bindings,
}

impl SyncEngine {
    /// Validate `graph` and build a fresh engine over it.
    pub fn load(
        graph: &ComposerGraph,
        provider: &dyn BehaviorProvider,
        config: EngineConfig,
    ) -> Result<Self> {
        let compiled = graph.compile()?;
        let mut registry = ConceptRegistry::new();
        for schema in compiled.schemas {
            let behavior = provider.behavior_for(&schema);
            registry.register(schema, behavior)?;
        }
        tracing::info!(
            concepts = registry.len(),
            syncs = compiled.rules.len(),
            warnings = compiled.diagnostics.len(),
            "engine loaded"
        );
        Ok(Self {
            registry,
            rules: compiled.rules,
            log: ActionLog::new(),
            config,
            diagnostics: compiled.diagnostics,
            clock: Box::new(SystemClock),
            next_trigger: 1,
        })
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Replace schemas and rules as one unit. Nothing changes unless the
    /// whole graph validates. Concepts whose id and state fields are
    /// unchanged keep their state; the log is kept.
    pub fn reload(
        &mut self,
        graph: &ComposerGraph,
        provider: &dyn BehaviorProvider,
    ) -> Result<&[Diagnostic]> {
        let compiled = graph.compile()?;
        let mut registry = ConceptRegistry::new();
        let mut kept = 0;
        for schema in compiled.schemas {
            let carried = self
                .registry
                .schema(&schema.id)
                .ok()
                .filter(|old| old.state == schema.state)
                .and_then(|_| self.registry.get_state(&schema.id).ok());
            let behavior = provider.behavior_for(&schema);
            let mut instance = ConceptInstance::new(schema, behavior);
            if let Some(state) = carried {
                instance.state = state;
                kept += 1;
            }
            registry.insert_instance(instance)?;
        }
        tracing::info!(
            concepts = registry.len(),
            kept_state = kept,
            syncs = compiled.rules.len(),
            "engine reloaded"
        );
        self.registry = registry;
        self.rules = compiled.rules;
        self.diagnostics = compiled.diagnostics;
        Ok(self.diagnostics.as_slice())
    }

    /// States and behaviors back to defaults, log cleared, numbering and
    /// the clock restart.
    pub fn reset(&mut self) {
        self.registry.reset();
        self.log.clear();
        self.clock.reset();
        self.next_trigger = 1;
        tracing::info!("engine reset");
    }

    pub fn submit(
        &mut self,
        concept: &str,
        action: &str,
        inputs: ValueMap,
    ) -> std::result::Result<Trace, SubmitFailure> {
        self.submit_with(concept, action, inputs, &SubmitOptions::default())
    }

    /// Dispatch one external effect and cascade to quiescence.
    pub fn submit_with(
        &mut self,
        concept: &str,
        action: &str,
        inputs: ValueMap,
        options: &SubmitOptions,
    ) -> std::result::Result<Trace, SubmitFailure> {
        let options = options.resolve(&self.config);
        let started = Instant::now();
        let concept_id = self
            .registry
            .resolve(concept)
            .map_err(SubmitFailure::rejected)?;

        let trigger = self.next_trigger;
        let external = dispatch(
            &self.registry,
            &mut self.log,
            self.clock.as_ref(),
            Call {
                concept: &concept_id,
                action,
                inputs: &inputs,
                trigger,
                depth: 0,
                cause: None,
            },
        )
        .map_err(SubmitFailure::rejected)?;
        self.next_trigger += 1;

        let mut trace = Trace::new(trigger, external);
        let max_depth = options.max_depth.unwrap_or(usize::MAX);
        let max_dispatches = options.max_dispatches.unwrap_or(usize::MAX);
        let mut dispatched = 0usize;
        let mut tail_from = trace.external().seq;
        let mut pass = 0usize;

        loop {
            let ready = evaluate_pass(
                &self.rules,
                &self.registry,
                self.log.window(trigger),
                tail_from,
                pass,
                &mut trace.evaluations,
            );
            if ready.is_empty() {
                break;
            }
            let depth = pass + 1;
            if depth > max_depth && ready.iter().any(|c| !c.rule.then.is_empty()) {
                return Err(abort(
                    trace,
                    &ready,
                    Outcome::CascadeLimitExceeded,
                    EngineError::CascadeLimitExceeded {
                        limit: max_depth,
                        reason: "cascade depth",
                    },
                ));
            }

            let mark = self.log.last_seq();
            for (i, cont) in ready.iter().enumerate() {
                let mut produced = Vec::new();
                let mut failure = None;
                for then in &cont.rule.then {
                    if dispatched >= max_dispatches {
                        let error = EngineError::CascadeLimitExceeded {
                            limit: max_dispatches,
                            reason: "dispatch count",
                        };
                        set_outcome(&mut trace, cont, partial(&produced, Some(error.clone())));
                        return Err(abort(
                            trace,
                            &ready[i + 1..],
                            Outcome::CascadeLimitExceeded,
                            error,
                        ));
                    }
                    if let Some(budget) = options.time_budget
                        && started.elapsed() >= budget
                    {
                        let error = EngineError::BudgetExhausted {
                            elapsed_ms: started.elapsed().as_millis() as u64,
                            budget_ms: budget.as_millis() as u64,
                        };
                        set_outcome(&mut trace, cont, partial(&produced, Some(error.clone())));
                        return Err(abort(
                            trace,
                            &ready[i + 1..],
                            Outcome::BudgetExhausted,
                            error,
                        ));
                    }

                    let result = resolve_fields(&then.inputs, &cont.env)
                        .map_err(EngineError::from)
                        .and_then(|inputs| {
                            dispatch(
                                &self.registry,
                                &mut self.log,
                                self.clock.as_ref(),
                                Call {
                                    concept: &then.concept,
                                    action: &then.action,
                                    inputs: &inputs,
                                    trigger,
                                    depth,
                                    cause: Some(&cont.rule.id),
                                },
                            )
                        });
                    match result {
                        Ok(record) => {
                            dispatched += 1;
                            produced.push(record.seq);
                            trace.records.push(record);
                        }
                        Err(error) => {
                            tracing::debug!(rule = %cont.rule.id, %error, "continuation failed");
                            failure = Some(error);
                            break;
                        }
                    }
                }
                set_outcome(&mut trace, cont, partial(&produced, failure));
            }

            if self.log.last_seq() == mark {
                // every continuation failed before dispatching
                break;
            }
            trace.passes += 1;
            tail_from = mark + 1;
            pass = depth;
        }

        tracing::debug!(
            trigger,
            records = trace.records.len(),
            passes = trace.passes,
            "quiescent"
        );
        Ok(trace)
    }

    pub fn inspect(&self, concept: &str) -> Result<ConceptState> {
        let id = self.registry.resolve(concept)?;
        self.registry.get_state(&id)
    }

    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn registry(&self) -> &ConceptRegistry {
        &self.registry
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }
}

/// Mark the remaining continuations as never run and package the error.
fn abort(
    mut trace: Trace,
    pending: &[Ready<'_>],
    outcome: Outcome,
    error: EngineError,
) -> SubmitFailure {
    for cont in pending {
        trace.evaluations[cont.evaluation].outcome = ContinuationOutcome::Aborted;
    }
    trace.outcome = outcome;
    tracing::warn!(trigger = trace.trigger, %error, "trigger aborted");
    SubmitFailure {
        error,
        trace: Some(trace),
    }
}

/// Match every rule against the window's new tail and run where-steps.
/// Abandoned and failed continuations are recorded immediately.
fn evaluate_pass<'r>(
    rules: &'r RuleSet,
    registry: &ConceptRegistry,
    window: &[ActionRecord],
    tail_from: u64,
    pass: usize,
    evaluations: &mut Vec<Evaluation>,
) -> Vec<Ready<'r>> {
    let mut ready = Vec::new();
    for rule in rules {
        if !window.iter().any(|r| r.seq >= tail_from && rule.watches(r)) {
            continue;
        }
        let mut combos = Vec::new();
        join(&rule.when, window, tail_from, &mut Vec::new(), &Bindings::new(), &mut combos);

        for (matched, env) in combos {
            tracing::debug!(rule = %rule.id, pass, ?matched, "rule matched");
            for (env, outcome) in run_where(registry, rule, env) {
                let survived = outcome.is_none();
                evaluations.push(Evaluation {
                    rule: rule.id.clone(),
                    pass,
                    matched: matched.clone(),
                    bindings: env.clone(),
                    outcome: outcome.unwrap_or(ContinuationOutcome::Aborted),
                });
                if survived {
                    ready.push(Ready {
                        rule,
                        evaluation: evaluations.len() - 1,
                        env,
                    });
                }
            }
        }
    }
    ready
}

/// Run where-steps in order, forking per query row. `None` marks a
/// continuation that survived every step.
fn run_where(
    registry: &ConceptRegistry,
    rule: &SyncRule,
    env: Bindings,
) -> Vec<(Bindings, Option<ContinuationOutcome>)> {
    let mut live = vec![env];
    let mut done = Vec::new();

    for step in &rule.where_steps {
        let mut next = Vec::new();
        for env in live {
            match where_step(registry, step, &env) {
                Ok(forks) if forks.is_empty() => {
                    let why = match step {
                        WhereStep::Query(_) => Abandon::EmptyQuery { step: step.label() },
                        WhereStep::Filter { .. } => Abandon::FilterFalse { step: step.label() },
                    };
                    tracing::trace!(rule = %rule.id, "{why}");
                    done.push((env, Some(ContinuationOutcome::Abandoned(why))));
                }
                Ok(forks) => {
                    for fork in forks {
                        match fork {
                            Some(env) => next.push(env),
                            None => done.push((
                                env.clone(),
                                Some(ContinuationOutcome::Abandoned(Abandon::Conflict {
                                    step: step.label(),
                                })),
                            )),
                        }
                    }
                }
                Err(error) => {
                    tracing::debug!(rule = %rule.id, %error, "where-step failed");
                    done.push((
                        env,
                        Some(ContinuationOutcome::Failed {
                            error,
                            dispatched: Vec::new(),
                        }),
                    ));
                }
            }
        }
        live = next;
    }

    // survivors follow in query row order
    done.extend(live.into_iter().map(|env| (env, None)));
    done
}

/// One step for one continuation. A query yields one entry per row
/// (`None` when that row conflicts); a filter yields its continuation
/// when true and nothing when false.
fn where_step(
    registry: &ConceptRegistry,
    step: &WhereStep,
    env: &Bindings,
) -> Result<Vec<Option<Bindings>>> {
    match step {
        WhereStep::Query(q) => {
            let inputs = resolve_fields(&q.inputs, env)?;
            let rows = registry.run_query(&q.concept, &q.query, &inputs)?;
            rows.iter()
                .map(|row| -> Result<Option<Bindings>> {
                    let mut fork = env.clone();
                    Ok(unify_fields(&q.outputs, row, &mut fork)?.then_some(fork))
                })
                .collect()
        }
        WhereStep::Filter { source, expr } => match expr.eval(env)? {
            Value::Bool(true) => Ok(vec![Some(env.clone())]),
            Value::Bool(false) => Ok(Vec::new()),
            other => Err(EngineError::Expression(ExprError::Type(format!(
                "filter `{source}` produced {}, not a boolean",
                other.type_name()
            )))),
        },
    }
}

fn partial(produced: &[u64], failure: Option<EngineError>) -> ContinuationOutcome {
    match failure {
        Some(error) => ContinuationOutcome::Failed {
            error,
            dispatched: produced.to_vec(),
        },
        None => ContinuationOutcome::Dispatched {
            records: produced.to_vec(),
        },
    }
}

fn set_outcome(trace: &mut Trace, cont: &Ready<'_>, outcome: ContinuationOutcome) {
    trace.evaluations[cont.evaluation].outcome = outcome;
}

/// Enumerate every way to fill `patterns` with distinct window records,
/// in pattern order and ascending seq, keeping only combinations that use
/// at least one record with `seq >= tail_from`.
fn join(
    patterns: &[ActionPattern],
    window: &[ActionRecord],
    tail_from: u64,
    used: &mut Vec<u64>,
    env: &Bindings,
    out: &mut Vec<(Vec<u64>, Bindings)>,
) {
    let Some((pattern, rest)) = patterns.split_first() else {
        if used.iter().any(|&s| s >= tail_from) {
            out.push((used.clone(), env.clone()));
        }
        return;
    };
    for record in window {
        if used.contains(&record.seq) || !pattern.targets(record) {
            continue;
        }
        // the last pattern must supply a new record if none was used yet
        if rest.is_empty() && record.seq < tail_from && !used.iter().any(|&s| s >= tail_from) {
            continue;
        }
        let mut next = env.clone();
        match pattern.unify(record, &mut next) {
            Ok(true) => {
                used.push(record.seq);
                join(rest, window, tail_from, used, &next, out);
                used.pop();
            }
            Ok(false) => {}
            Err(error) => {
                tracing::warn!(seq = record.seq, %error, "pattern could not be evaluated");
            }
        }
    }
}

/// A [`SyncEngine`] shared between callers. Each submit holds the lock for
/// its whole cascade, so triggers are processed one at a time.
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<SyncEngine>>,
}

impl SharedEngine {
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncEngine> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn submit(
        &self,
        concept: &str,
        action: &str,
        inputs: ValueMap,
    ) -> std::result::Result<Trace, SubmitFailure> {
        self.lock().submit(concept, action, inputs)
    }

    pub fn submit_with(
        &self,
        concept: &str,
        action: &str,
        inputs: ValueMap,
        options: &SubmitOptions,
    ) -> std::result::Result<Trace, SubmitFailure> {
        self.lock().submit_with(concept, action, inputs, options)
    }

    pub fn inspect(&self, concept: &str) -> Result<ConceptState> {
        self.lock().inspect(concept)
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    /// Run `f` with exclusive access, e.g. to read the log.
    pub fn with<R>(&self, f: impl FnOnce(&mut SyncEngine) -> R) -> R {
        f(&mut self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::PassiveProvider;
    use crate::time::LogicalClock;
    use serde_json::json;

    fn graph(v: serde_json::Value) -> ComposerGraph {
        serde_json::from_value(v).unwrap()
    }

    /// A → B → C chain, one pattern per rule.
    fn chain() -> ComposerGraph {
        let concept = |id: &str| {
            json!({"id": id, "name": id, "actions": [
                {"name": "go", "kind": "action", "input": [{"name": "n", "type": "number"}],
                 "output": [{"name": "n", "type": "number"}]}
            ]})
        };
        let sync = |id: &str, from: &str, to: &str| {
            json!({"id": id, "name": id, "vars": ["n"],
                "when": [{"conceptId": from, "action": "go", "inputBindings": {"n": "n"}}],
                "then": [{"conceptId": to, "action": "go", "inputBindings": {"n": "n"}}]})
        };
        graph(json!({
            "concepts": [concept("A"), concept("B"), concept("C")],
            "syncs": [sync("S:AB", "A", "B"), sync("S:BC", "B", "C")]
        }))
    }

    fn engine(g: &ComposerGraph) -> SyncEngine {
        SyncEngine::load(g, &PassiveProvider, EngineConfig::default())
            .unwrap()
            .with_clock(LogicalClock::new())
    }

    fn n(v: f64) -> ValueMap {
        let mut m = ValueMap::new();
        m.insert("n".into(), Value::Number(v));
        m
    }

    #[test]
    fn test_chain_cascades_in_passes() {
        let mut e = engine(&chain());
        let trace = e.submit("A", "go", n(1.0)).unwrap();
        let steps: Vec<(&str, usize)> = trace
            .records
            .iter()
            .map(|r| (r.concept.as_str(), r.depth))
            .collect();
        assert_eq!(steps, vec![("A", 0), ("B", 1), ("C", 2)]);
        assert_eq!(trace.passes, 2);
        assert_eq!(trace.outcome, Outcome::Quiescent);
        assert_eq!(trace.records[2].cause.as_deref(), Some("S:BC"));
        assert_eq!(trace.records[2].inputs["n"], Value::Number(1.0));
    }

    #[test]
    fn test_depth_limit_keeps_applied_effects() {
        let mut e = engine(&chain());
        let failure = e
            .submit_with("A", "go", n(1.0), &SubmitOptions::max_depth(1))
            .unwrap_err();
        assert_eq!(failure.error.kind(), "CascadeLimitExceededError");
        let trace = failure.trace.unwrap();
        assert_eq!(trace.outcome, Outcome::CascadeLimitExceeded);
        assert_eq!(trace.records.len(), 2);
        assert_eq!(e.log().len(), 2);
    }

    #[test]
    fn test_rejected_external_call_has_no_trace() {
        let mut e = engine(&chain());
        let failure = e.submit("Nope", "go", n(1.0)).unwrap_err();
        assert_eq!(failure.error.kind(), "UnknownConceptError");
        assert!(failure.trace.is_none());
        let failure = e.submit("A", "go", ValueMap::new()).unwrap_err();
        assert_eq!(failure.error.kind(), "InputMismatchError");
        assert!(e.log().is_empty());
    }

    #[test]
    fn test_windows_do_not_join_across_submits() {
        let g = graph(json!({
            "concepts": [
                {"id": "A", "name": "A", "actions": [{"name": "go", "kind": "action"}]},
                {"id": "B", "name": "B", "actions": [{"name": "go", "kind": "action"}]},
                {"id": "C", "name": "C", "actions": [{"name": "go", "kind": "action"}]}
            ],
            "syncs": [{"id": "S:Both", "name": "Both",
                "when": [{"conceptId": "A", "action": "go"}, {"conceptId": "B", "action": "go"}],
                "then": [{"conceptId": "C", "action": "go"}]}]
        }));
        let mut e = engine(&g);
        e.submit("A", "go", ValueMap::new()).unwrap();
        let trace = e.submit("B", "go", ValueMap::new()).unwrap();
        assert_eq!(trace.records.len(), 1);
        assert!(trace.evaluations.is_empty());
    }

    #[test]
    fn test_reset_restarts_numbering() {
        let mut e = engine(&chain());
        e.submit("A", "go", n(1.0)).unwrap();
        e.reset();
        assert!(e.log().is_empty());
        let trace = e.submit("A", "go", n(2.0)).unwrap();
        assert_eq!(trace.trigger, 1);
        assert_eq!(trace.external().seq, 1);
    }

    #[test]
    fn test_reload_failure_changes_nothing() {
        let mut e = engine(&chain());
        let mut bad = chain();
        bad.syncs[0].then[0].concept_id = "Missing".into();
        assert!(e.reload(&bad, &PassiveProvider).is_err());
        assert_eq!(e.rules().len(), 2);
        assert_eq!(e.submit("A", "go", n(1.0)).unwrap().records.len(), 3);
    }

    #[test]
    fn test_join_requires_a_new_record() {
        let g = chain();
        let compiled = g.compile().unwrap();
        let rule = compiled.rules.get("S:AB").unwrap();
        let window = vec![ActionRecord {
            seq: 1,
            concept: "A".into(),
            action: "go".into(),
            inputs: n(1.0),
            outputs: n(1.0),
            timestamp: 0,
            trigger: 1,
            depth: 0,
            cause: None,
        }];
        let mut out = Vec::new();
        join(&rule.when, &window, 2, &mut Vec::new(), &Bindings::new(), &mut out);
        assert!(out.is_empty());
        join(&rule.when, &window, 1, &mut Vec::new(), &Bindings::new(), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, vec![1]);
    }
}
