//! The declarative composer graph and its compiler.
//!
//! The wire types mirror the editor's JSON export (camelCase, bindings as
//! loosely typed JSON). `ComposerGraph::compile` turns them into validated
//! schemas and an immutable [`RuleSet`], reporting every problem at once.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::binding::{FieldTerms, Term};
use crate::error::{EngineError, Result};
use crate::expr::Expr;
use crate::rule::{ActionPattern, QueryStep, RuleSet, SyncRule, ThenPattern, WhereStep, term_vars};
use crate::schema::{ActionKind, ActionSchema, ConceptSchema, FieldSpec, FieldType, StateField};

// --- Wire format types ---

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ComposerGraph {
    #[serde(default)]
    pub concepts: Vec<ConceptData>,
    #[serde(default)]
    pub syncs: Vec<SyncData>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConceptData {
    pub id: String,
    pub name: String,
    #[serde(rename = "stateFields", default)]
    pub state_fields: Vec<StateFieldData>,
    #[serde(default)]
    pub actions: Vec<ActionData>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StateFieldData {
    pub name: String,
    #[serde(rename = "type", default = "any_type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WireActionKind {
    #[serde(alias = "effect")]
    Action,
    Query,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActionData {
    pub name: String,
    pub kind: WireActionKind,
    #[serde(default)]
    pub input: Vec<FieldData>,
    #[serde(default)]
    pub output: Vec<FieldData>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FieldData {
    pub name: String,
    #[serde(rename = "type", default = "any_type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

pub type WireBindings = BTreeMap<String, serde_json::Value>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PatternData {
    #[serde(rename = "conceptId")]
    pub concept_id: String,
    pub action: String,
    #[serde(rename = "inputBindings", default)]
    pub input_bindings: WireBindings,
    #[serde(
        rename = "outputBindings",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub output_bindings: Option<WireBindings>,
}

/// `op` is kept as text so reserved kinds can be reported rather than
/// failing deserialization.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WhereData {
    pub op: String,
    #[serde(rename = "conceptId", default, skip_serializing_if = "Option::is_none")]
    pub concept_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<WireBindings>,
    #[serde(
        rename = "outputBindings",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub output_bindings: Option<WireBindings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SyncData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub vars: Vec<String>,
    #[serde(default)]
    pub when: Vec<PatternData>,
    #[serde(rename = "where", default)]
    pub where_steps: Vec<WhereData>,
    #[serde(default)]
    pub then: Vec<PatternData>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    When,
    Then,
}

/// Display-only connection, `from`/`to` as `node#handle`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GraphEdge {
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    pub from: String,
    pub to: String,
}

impl GraphEdge {
    pub fn from_node(&self) -> &str {
        node_of(&self.from)
    }

    pub fn to_node(&self) -> &str {
        node_of(&self.to)
    }
}

fn node_of(handle: &str) -> &str {
    handle.split('#').next().unwrap_or(handle)
}

fn any_type() -> String {
    "any".to_string()
}

// --- Compiled form ---

/// A non-fatal load finding.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diagnostic {
    pub subject: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.message)
    }
}

#[derive(Clone, Debug)]
pub struct CompiledGraph {
    pub schemas: Vec<ConceptSchema>,
    pub rules: RuleSet,
    pub diagnostics: Vec<Diagnostic>,
}

impl ComposerGraph {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate and compile. Fails with every problem found; warnings about
    /// edges and ignored bindings never block loading.
    pub fn compile(&self) -> Result<CompiledGraph> {
        let mut cx = Compiler::default();

        let mut schemas = Vec::new();
        for data in &self.concepts {
            if cx.schemas.contains_key(data.id.as_str()) {
                cx.errors.push(EngineError::DuplicateConcept(data.id.clone()));
                continue;
            }
            let schema = cx.concept(data);
            cx.schemas.insert(data.id.clone(), schema.clone());
            schemas.push(schema);
        }

        let mut rules = Vec::new();
        let mut seen = BTreeSet::new();
        for sync in &self.syncs {
            if !seen.insert(sync.id.as_str()) {
                cx.errors.push(EngineError::DuplicateRule(sync.id.clone()));
                continue;
            }
            if let Some(rule) = cx.rule(sync) {
                rules.push(rule);
            }
        }

        cx.edges(self);
        EngineError::collect(cx.errors)?;
        for d in &cx.diagnostics {
            tracing::warn!(subject = %d.subject, "{}", d.message);
        }
        Ok(CompiledGraph {
            schemas,
            rules: RuleSet::new(rules),
            diagnostics: cx.diagnostics,
        })
    }
}

#[derive(Default)]
struct Compiler {
    schemas: BTreeMap<String, ConceptSchema>,
    errors: Vec<EngineError>,
    diagnostics: Vec<Diagnostic>,
}

/// Which side of an action a binding map addresses.
#[derive(Clone, Copy)]
enum Side {
    Input,
    Output,
}

impl Compiler {
    fn warn(&mut self, subject: &str, message: String) {
        self.diagnostics.push(Diagnostic {
            subject: subject.to_string(),
            message,
        });
    }

    /// Problems are recorded but the schema is still returned, so syncs that
    /// reference it are checked normally.
    fn concept(&mut self, data: &ConceptData) -> ConceptSchema {
        let mut schema = ConceptSchema::new(&data.id, &data.name);

        let mut names = BTreeSet::new();
        for field in &data.state_fields {
            if !names.insert(field.name.as_str()) {
                self.errors.push(EngineError::Graph(format!(
                    "concept {} declares state field {} twice",
                    data.id, field.name
                )));
                continue;
            }
            let ty = FieldType::from_str_lossy(&field.ty);
            let default = match field.init.as_deref().map(|raw| ty.parse_init(raw)) {
                Some(Ok(v)) => Some(v),
                Some(Err(e)) => {
                    self.errors.push(e);
                    None
                }
                None => None,
            };
            schema.state.push(StateField {
                name: field.name.clone(),
                ty,
                default,
            });
        }

        let mut actions = BTreeSet::new();
        for action in &data.actions {
            if !actions.insert(action.name.as_str()) {
                self.errors.push(EngineError::Graph(format!(
                    "concept {} declares action {} twice",
                    data.id, action.name
                )));
                continue;
            }
            let inputs = self.fields(&data.id, &action.name, &action.input);
            let outputs = self.fields(&data.id, &action.name, &action.output);
            schema.actions.push(ActionSchema {
                name: action.name.clone(),
                kind: match action.kind {
                    WireActionKind::Action => ActionKind::Effect,
                    WireActionKind::Query => ActionKind::Query,
                },
                inputs,
                outputs,
            });
        }

        schema
    }

    fn fields(&mut self, concept: &str, action: &str, data: &[FieldData]) -> Vec<FieldSpec> {
        let mut names = BTreeSet::new();
        let mut out = Vec::new();
        for f in data {
            if !names.insert(f.name.as_str()) {
                self.errors.push(EngineError::Graph(format!(
                    "{concept}.{action} declares field {} twice",
                    f.name
                )));
                continue;
            }
            out.push(FieldSpec {
                name: f.name.clone(),
                ty: FieldType::from_str_lossy(&f.ty),
                optional: f.optional,
            });
        }
        out
    }

    /// Look up `concept.action` and check its kind.
    fn target(&mut self, concept: &str, action: &str, kind: ActionKind) -> Option<ActionSchema> {
        let Some(schema) = self.schemas.get(concept) else {
            self.errors.push(EngineError::UnknownConcept(concept.to_string()));
            return None;
        };
        let found = match schema.action(action).cloned() {
            Ok(a) => a,
            Err(e) => {
                self.errors.push(e);
                return None;
            }
        };
        if found.kind != kind {
            self.errors.push(EngineError::KindMismatch {
                concept: concept.to_string(),
                action: action.to_string(),
                expected: kind,
            });
            return None;
        }
        Some(found)
    }

    fn terms(
        &mut self,
        rule: &SyncRule,
        concept: &str,
        action: &ActionSchema,
        side: Side,
        raw: Option<&WireBindings>,
    ) -> FieldTerms {
        let mut out = Vec::new();
        for (field, value) in raw.into_iter().flatten() {
            let spec = match side {
                Side::Input => action.input(field),
                Side::Output => action.output(field),
            };
            let Some(spec) = spec else {
                self.errors.push(EngineError::UnknownField {
                    concept: concept.to_string(),
                    action: action.name.clone(),
                    field: field.clone(),
                });
                continue;
            };
            match Term::parse(value, &rule.id, &rule.vars, Some(&spec.ty)) {
                Ok(term) => out.push((field.clone(), term)),
                Err(e) => self.errors.push(e),
            }
        }
        out
    }

    /// Every variable read must already be in `bound`.
    fn require_bound<'a>(
        &mut self,
        rule: &str,
        bound: &BTreeSet<String>,
        vars: impl IntoIterator<Item = &'a str>,
    ) {
        let mut reported = BTreeSet::new();
        for var in vars {
            if !bound.contains(var) && reported.insert(var) {
                self.errors.push(EngineError::UnboundVariable {
                    rule: rule.to_string(),
                    var: var.to_string(),
                });
            }
        }
    }

    /// Bind the pattern's bare variables, then check its templates.
    fn bind_pattern(&mut self, rule: &str, bound: &mut BTreeSet<String>, sections: &[&FieldTerms]) {
        for terms in sections {
            for (_, term) in terms.iter() {
                if let Term::Var(v) = term {
                    bound.insert(v.clone());
                }
            }
        }
        let templated: Vec<&str> = sections
            .iter()
            .flat_map(|terms| terms.iter())
            .filter(|(_, t)| matches!(t, Term::Template(_)))
            .flat_map(|(_, t)| t.vars())
            .collect();
        self.require_bound(rule, bound, templated);
    }

    fn rule(&mut self, sync: &SyncData) -> Option<SyncRule> {
        let before = self.errors.len();
        let mut rule = SyncRule {
            id: sync.id.clone(),
            name: sync.name.clone(),
            vars: sync
                .vars
                .iter()
                .map(|v| v.trim().trim_start_matches('$').to_string())
                .filter(|v| !v.is_empty())
                .collect(),
            when: Vec::new(),
            where_steps: Vec::new(),
            then: Vec::new(),
        };
        if sync.when.is_empty() {
            self.errors.push(EngineError::InvalidRule {
                rule: sync.id.clone(),
                reason: "no when pattern".into(),
            });
        }

        let mut bound = BTreeSet::new();
        for p in &sync.when {
            let Some(action) = self.target(&p.concept_id, &p.action, ActionKind::Effect) else {
                continue;
            };
            let inputs = self.terms(&rule, &p.concept_id, &action, Side::Input, Some(&p.input_bindings));
            let outputs =
                self.terms(&rule, &p.concept_id, &action, Side::Output, p.output_bindings.as_ref());
            self.bind_pattern(&rule.id, &mut bound, &[&inputs, &outputs]);
            rule.when.push(ActionPattern {
                concept: p.concept_id.clone(),
                action: p.action.clone(),
                inputs,
                outputs,
            });
        }

        for step in &sync.where_steps {
            if let Some(step) = self.where_step(&rule, &mut bound, step) {
                rule.where_steps.push(step);
            }
        }

        for p in &sync.then {
            let Some(action) = self.target(&p.concept_id, &p.action, ActionKind::Effect) else {
                continue;
            };
            let inputs = self.terms(&rule, &p.concept_id, &action, Side::Input, Some(&p.input_bindings));
            self.require_bound(&rule.id, &bound, term_vars(&inputs));
            for spec in action.required_inputs() {
                if !inputs.iter().any(|(f, _)| *f == spec.name) {
                    self.errors.push(EngineError::InputMismatch {
                        concept: p.concept_id.clone(),
                        action: p.action.clone(),
                        reason: format!("{} does not bind required field '{}'", rule.id, spec.name),
                    });
                }
            }
            for (field, term) in &inputs {
                if let (Term::Literal(v), Some(spec)) = (term, action.input(field))
                    && !v.is_null()
                    && !spec.ty.accepts(v)
                {
                    self.errors.push(EngineError::InputMismatch {
                        concept: p.concept_id.clone(),
                        action: p.action.clone(),
                        reason: format!("literal for '{field}' is not a {:?}", spec.ty),
                    });
                }
            }
            if p.output_bindings.as_ref().is_some_and(|b| !b.is_empty()) {
                self.warn(
                    &rule.id,
                    format!("output bindings on then {}.{} are ignored", p.concept_id, p.action),
                );
            }
            rule.then.push(ThenPattern {
                concept: p.concept_id.clone(),
                action: p.action.clone(),
                inputs,
            });
        }

        (self.errors.len() == before).then_some(rule)
    }

    fn where_step(
        &mut self,
        rule: &SyncRule,
        bound: &mut BTreeSet<String>,
        step: &WhereData,
    ) -> Option<WhereStep> {
        let invalid = |reason: &str| EngineError::InvalidRule {
            rule: rule.id.clone(),
            reason: reason.to_string(),
        };
        match step.op.as_str() {
            "query" => {
                let (Some(concept), Some(method)) = (&step.concept_id, &step.method) else {
                    self.errors.push(invalid("query step needs conceptId and method"));
                    return None;
                };
                let action = self.target(concept, method, ActionKind::Query)?;
                let inputs = self.terms(rule, concept, &action, Side::Input, step.input.as_ref());
                self.require_bound(&rule.id, bound, term_vars(&inputs));
                let outputs =
                    self.terms(rule, concept, &action, Side::Output, step.output_bindings.as_ref());
                self.bind_pattern(&rule.id, bound, &[&outputs]);
                Some(WhereStep::Query(QueryStep {
                    concept: concept.clone(),
                    query: method.clone(),
                    inputs,
                    outputs,
                }))
            }
            "filter" => {
                let Some(source) = step.expr.as_deref() else {
                    self.errors.push(invalid("filter step needs expr"));
                    return None;
                };
                let expr = match Expr::parse(source) {
                    Ok(e) => e,
                    Err(e) => {
                        self.errors.push(e.into());
                        return None;
                    }
                };
                let vars = expr.vars();
                let before = self.errors.len();
                for var in vars.iter().filter(|v| !rule.vars.contains(*v)) {
                    self.errors.push(EngineError::UndeclaredVariable {
                        rule: rule.id.clone(),
                        var: var.clone(),
                    });
                }
                if self.errors.len() == before {
                    self.require_bound(&rule.id, bound, vars.iter().map(String::as_str));
                }
                Some(WhereStep::Filter {
                    source: source.to_string(),
                    expr,
                })
            }
            "map" | "queryAsync" => {
                self.errors.push(EngineError::UnsupportedStep {
                    rule: rule.id.clone(),
                    op: step.op.clone(),
                });
                None
            }
            other => {
                self.errors.push(invalid(&format!("unknown where op '{other}'")));
                None
            }
        }
    }

    fn edges(&mut self, graph: &ComposerGraph) {
        let syncs: BTreeMap<&str, &SyncData> =
            graph.syncs.iter().map(|s| (s.id.as_str(), s)).collect();
        for edge in &graph.edges {
            let (concept, sync) = match edge.kind {
                EdgeKind::When => (edge.from_node(), edge.to_node()),
                EdgeKind::Then => (edge.to_node(), edge.from_node()),
            };
            let subject = format!("edge {} -> {}", edge.from, edge.to);
            if !self.schemas.contains_key(concept) {
                self.warn(&subject, format!("unknown concept node {concept}"));
                continue;
            }
            let Some(sync) = syncs.get(sync) else {
                self.warn(&subject, format!("unknown sync node {sync}"));
                continue;
            };
            let patterns = match edge.kind {
                EdgeKind::When => &sync.when,
                EdgeKind::Then => &sync.then,
            };
            if !patterns.iter().any(|p| p.concept_id == concept) {
                let kind = match edge.kind {
                    EdgeKind::When => "when",
                    EdgeKind::Then => "then",
                };
                self.warn(
                    &subject,
                    format!("{} has no {kind} pattern on {concept}", sync.id),
                );
            }
        }
    }
}
