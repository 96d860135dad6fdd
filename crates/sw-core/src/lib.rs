//! syncweave synchronization engine.
//!
//! Interprets concept definitions and declarative synchronization rules:
//! completed actions are matched against multi-pattern `when` clauses,
//! refined by ordered `where` queries and filters, and cascade through
//! `then` dispatches to a fixed point.
//!
//! Zero I/O. Concept behaviors are supplied by the caller through
//! [`BehaviorProvider`]; the engine has no opinion about transport or
//! persistence.

pub mod binding;
pub mod concept;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod expr;
pub mod graph;
pub mod log;
pub mod registry;
pub mod rule;
pub mod schema;
pub mod time;
pub mod trace;
pub mod value;

pub use binding::{Bindings, Template, Term};
pub use concept::{
    BehaviorError, BehaviorProvider, BehaviorResult, ConceptBehavior, ConceptState, Passive,
    PassiveProvider, default_effect, default_query,
};
pub use config::{EngineConfig, SubmitOptions};
pub use engine::{SharedEngine, SyncEngine};
pub use error::{EngineError, Result};
pub use expr::{Expr, ExprError};
pub use graph::{CompiledGraph, ComposerGraph, Diagnostic};
pub use log::{ActionLog, ActionRecord, LogFilter};
pub use registry::ConceptRegistry;
pub use rule::{RuleSet, SyncRule, WhereStep};
pub use schema::{ActionKind, ActionSchema, ConceptSchema, FieldSpec, FieldType};
pub use time::{Clock, LogicalClock, SystemClock};
pub use trace::{Abandon, ContinuationOutcome, Evaluation, Outcome, SubmitFailure, Trace};
pub use value::{Value, ValueMap, format_map, map_from_json, map_to_json};
