//! Binding environments, binding terms and unification.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::expr::ExprError;
use crate::schema::FieldType;
use crate::value::{Value, ValueMap};

static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\s*\$?([A-Za-z_][A-Za-z0-9_]*)\s*\}").unwrap());

/// Variable → value. A variable, once bound, never changes for the rest of
/// the evaluation pass; later references must agree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bindings(ValueMap);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, var: &str) -> Option<&Value> {
        self.0.get(var)
    }

    pub fn contains(&self, var: &str) -> bool {
        self.0.contains_key(var)
    }

    /// Bind `var` if unbound; otherwise require the existing value to equal
    /// `value`. Returns `false` on conflict and leaves the environment as is.
    pub fn unify(&mut self, var: &str, value: Value) -> bool {
        match self.0.get(var) {
            Some(existing) => *existing == value,
            None => {
                self.0.insert(var.to_string(), value);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &ValueMap {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Text(String),
    Var(String),
}

/// A backtick template such as `` `reached ${count}` ``.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse template text (without the surrounding backticks).
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(raw) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Text(raw[last..whole.start()].to_string()));
            }
            segments.push(Segment::Var(name.as_str().to_string()));
            last = whole.end();
        }
        if last < raw.len() {
            segments.push(Segment::Text(raw[last..].to_string()));
        }
        Self { segments }
    }

    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Var(v) => Some(v.as_str()),
            Segment::Text(_) => None,
        })
    }

    pub fn render(&self, env: &Bindings) -> std::result::Result<String, ExprError> {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Text(t) => out.push_str(t),
                Segment::Var(v) => {
                    let value = env.get(v).ok_or_else(|| ExprError::Unbound(v.clone()))?;
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(out)
    }
}

/// The right-hand side of one field binding.
#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    Var(String),
    Literal(Value),
    Template(Template),
}

/// Field name → term, in field-name order.
pub type FieldTerms = Vec<(String, Term)>;

impl Term {
    /// Interpret an authoring binding value. `declared` is the rule's variable
    /// set; `ty` is the semantic type of the bound field, used to read
    /// unquoted literals.
    pub fn parse(
        raw: &serde_json::Value,
        rule: &str,
        declared: &BTreeSet<String>,
        ty: Option<&FieldType>,
    ) -> Result<Term> {
        let (verbatim, text) = match raw {
            serde_json::Value::String(s) => (s.as_str(), s.trim()),
            other => return Value::from_json(other).map(Term::Literal),
        };
        let undeclared = |var: &str| EngineError::UndeclaredVariable {
            rule: rule.to_string(),
            var: var.to_string(),
        };

        if let Some(name) = text.strip_prefix('$')
            && IDENT.is_match(name)
        {
            return if declared.contains(name) {
                Ok(Term::Var(name.to_string()))
            } else {
                Err(undeclared(name))
            };
        }
        if IDENT.is_match(text) && declared.contains(text) {
            return Ok(Term::Var(text.to_string()));
        }
        if text.len() >= 2 && text.starts_with('`') && text.ends_with('`') {
            let template = Template::parse(&text[1..text.len() - 1]);
            if let Some(var) = template.vars().find(|v| !declared.contains(*v)) {
                return Err(undeclared(var));
            }
            return Ok(Term::Template(template));
        }
        for quote in ['"', '\''] {
            if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
                return Ok(Term::Literal(Value::str(&text[1..text.len() - 1])));
            }
        }
        // Surrounding whitespace is only dropped when the text reads as a
        // number or boolean; plain strings are kept exactly as written.
        let literal = match ty.unwrap_or(&FieldType::Any) {
            FieldType::String => Value::str(verbatim),
            FieldType::Any => serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|j| Value::from_json(&j).ok())
                .unwrap_or_else(|| Value::str(verbatim)),
            ty => ty.parse_init(text).unwrap_or_else(|_| Value::str(verbatim)),
        };
        Ok(Term::Literal(literal))
    }

    pub fn vars(&self) -> Vec<&str> {
        match self {
            Term::Var(v) => vec![v.as_str()],
            Term::Literal(_) => Vec::new(),
            Term::Template(t) => t.vars().collect(),
        }
    }

    pub fn eval(&self, env: &Bindings) -> std::result::Result<Value, ExprError> {
        match self {
            Term::Var(v) => env.get(v).cloned().ok_or_else(|| ExprError::Unbound(v.clone())),
            Term::Literal(v) => Ok(v.clone()),
            Term::Template(t) => t.render(env).map(Value::String),
        }
    }

    fn is_template(&self) -> bool {
        matches!(self, Term::Template(_))
    }
}

/// Unify `terms` against concrete field `values`, extending `env`.
///
/// `Ok(false)` means no match; `env` may then hold partial extensions and
/// must be discarded by the caller.
pub fn unify_fields(
    terms: &[(String, Term)],
    values: &ValueMap,
    env: &mut Bindings,
) -> std::result::Result<bool, ExprError> {
    unify_sections(&[(terms, values)], env)
}

/// Unify several (terms, values) sections as one pattern. Variables and
/// literals of every section are handled before any template, so a template
/// may read a variable bound anywhere in the same pattern.
pub fn unify_sections(
    sections: &[(&[(String, Term)], &ValueMap)],
    env: &mut Bindings,
) -> std::result::Result<bool, ExprError> {
    for templates in [false, true] {
        for (terms, values) in sections {
            for (field, term) in terms.iter().filter(|(_, t)| t.is_template() == templates) {
                let actual = values.get(field).cloned().unwrap_or(Value::Null);
                let ok = match term {
                    Term::Var(var) => env.unify(var, actual),
                    Term::Literal(expected) => *expected == actual,
                    Term::Template(t) => Value::String(t.render(env)?) == actual,
                };
                if !ok {
                    tracing::trace!(field = %field, "unification failed");
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

/// Evaluate terms into a concrete field map (then-inputs, query inputs).
pub fn resolve_fields(
    terms: &[(String, Term)],
    env: &Bindings,
) -> std::result::Result<ValueMap, ExprError> {
    terms
        .iter()
        .map(|(field, term)| Ok((field.clone(), term.eval(env)?)))
        .collect()
}
