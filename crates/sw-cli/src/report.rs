//! Human and JSON renderings of graphs, traces and state.

use serde_json::{Value as Json, json};
use sw_concepts::Played;
use sw_core::{CompiledGraph, ConceptState, EngineError, SubmitFailure, Trace, format_map};

/// `sw validate` output.
pub fn summary(compiled: &CompiledGraph, edges: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("concepts: {}\n", compiled.schemas.len()));
    for s in &compiled.schemas {
        out.push_str(&format!("  {} ({}) {} actions\n", s.id, s.name, s.actions.len()));
    }
    out.push_str(&format!("syncs:    {}\n", compiled.rules.len()));
    for r in &compiled.rules {
        out.push_str(&format!(
            "  {} ({}) {} vars, {} when, {} where, {} then\n",
            r.id,
            r.name,
            r.vars.len(),
            r.when.len(),
            r.where_steps.len(),
            r.then.len()
        ));
    }
    out.push_str(&format!("edges:    {edges}\n"));
    out.push_str(&format!("warnings: {}\n", compiled.diagnostics.len()));
    for d in &compiled.diagnostics {
        out.push_str(&format!("  {d}\n"));
    }
    out
}

pub fn problems(error: &EngineError) -> Vec<String> {
    error
        .problems()
        .into_iter()
        .map(|e| format!("[{}] {e}", e.kind()))
        .collect()
}

pub fn print_played(played: &Played) {
    let round = if played.round > 0 {
        format!(" #{}", played.round + 1)
    } else {
        String::new()
    };
    println!("== {}{round}", played.label);
    match &played.result {
        Ok(trace) => print!("{}", trace.render()),
        Err(failure) => print_failure(failure),
    }
}

fn print_failure(failure: &SubmitFailure) {
    if let Some(trace) = &failure.trace {
        print!("{}", trace.render());
    }
    println!("error: [{}] {}", failure.error.kind(), failure.error);
}

pub fn print_state(concept: &str, state: &ConceptState) {
    println!("{concept}: {}", format_map(&state.fields));
    for row in &state.rows {
        println!("  {}", format_map(row));
    }
}

pub fn error_json(error: &EngineError) -> Json {
    json!({"kind": error.kind(), "message": error.to_string()})
}

pub fn trace_json(trace: &Trace) -> Json {
    serde_json::to_value(trace).unwrap_or(Json::Null)
}

pub fn result_json(result: &Result<Trace, SubmitFailure>) -> Json {
    match result {
        Ok(trace) => json!({"ok": true, "trace": trace_json(trace)}),
        Err(failure) => json!({
            "ok": false,
            "error": error_json(&failure.error),
            "trace": failure.trace.as_ref().map(trace_json),
        }),
    }
}

pub fn played_json(played: &Played) -> Json {
    let mut out = result_json(&played.result);
    out["step"] = json!(played.step);
    out["round"] = json!(played.round);
    out["label"] = json!(played.label);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_concepts::Demo;

    #[test]
    fn test_summary_lists_concepts_and_syncs() {
        let graph = Demo::CounterNudge.graph().unwrap();
        let compiled = graph.compile().unwrap();
        let text = summary(&compiled, graph.edges.len());
        assert!(text.contains("concepts: 3"));
        assert!(text.contains("Sync:CounterNudge (CounterNudge) 2 vars, 2 when, 2 where, 1 then"));
        assert!(text.contains("warnings: 0"));
    }

    #[test]
    fn test_problems_are_tagged_with_kind() {
        let err = EngineError::Invalid(vec![
            EngineError::UnknownConcept("Concept:Ghost".into()),
            EngineError::DuplicateRule("Sync:A".into()),
        ]);
        let lines = problems(&err);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[UnknownConceptError]"));
        assert!(lines[1].starts_with("[DuplicateRuleError]"));
    }

    #[test]
    fn test_failure_json_carries_kind() {
        let failure = SubmitFailure {
            error: EngineError::UnknownConcept("X".into()),
            trace: None,
        };
        let j = result_json(&Err(failure));
        assert_eq!(j["ok"], false);
        assert_eq!(j["error"]["kind"], "UnknownConceptError");
        assert!(j["trace"].is_null());
    }
}
