//! Cascade throughput: chained rules and query fan-out.
//!
//! ```bash
//! cargo bench -p sw-core -- cascade
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use sw_core::{
    ActionSchema, BehaviorResult, ComposerGraph, ConceptBehavior, ConceptSchema, ConceptState,
    EngineConfig, LogicalClock, Passive, SyncEngine, Value, ValueMap, default_effect,
};

struct Rows;

impl ConceptBehavior for Rows {
    fn apply_effect(
        &mut self,
        action: &ActionSchema,
        state: &mut ConceptState,
        inputs: &ValueMap,
    ) -> BehaviorResult<ValueMap> {
        state.rows.push(inputs.clone());
        Ok(default_effect(action, state, inputs))
    }
}

fn provider(schema: &ConceptSchema) -> Box<dyn ConceptBehavior> {
    if schema.name == "Roster" {
        Box::new(Rows)
    } else {
        Box::new(Passive)
    }
}

/// C0 → C1 → … → C{len}, one rule per hop.
fn chain(len: usize) -> ComposerGraph {
    let concepts: Vec<_> = (0..=len)
        .map(|i| {
            json!({"id": format!("C{i}"), "name": format!("C{i}"), "actions": [
                {"name": "go", "kind": "action", "input": [{"name": "n", "type": "number"}]}
            ]})
        })
        .collect();
    let syncs: Vec<_> = (0..len)
        .map(|i| {
            json!({"id": format!("S{i}"), "name": format!("S{i}"), "vars": ["n"],
                "when": [{"conceptId": format!("C{i}"), "action": "go", "inputBindings": {"n": "n"}}],
                "then": [{"conceptId": format!("C{}", i + 1), "action": "go", "inputBindings": {"n": "n"}}]})
        })
        .collect();
    serde_json::from_value(json!({"concepts": concepts, "syncs": syncs})).unwrap()
}

fn fan_out() -> ComposerGraph {
    serde_json::from_value(json!({
        "concepts": [
            {"id": "Team", "name": "Team", "actions": [
                {"name": "announce", "kind": "action", "input": [{"name": "msg", "type": "string"}]}]},
            {"id": "Roster", "name": "Roster", "actions": [
                {"name": "add", "kind": "action", "input": [{"name": "member", "type": "string"}]},
                {"name": "_members", "kind": "query", "output": [{"name": "member", "type": "string"}]}]},
            {"id": "Mail", "name": "Mail", "actions": [
                {"name": "send", "kind": "action",
                 "input": [{"name": "to", "type": "string"}, {"name": "body", "type": "string"}]}]}
        ],
        "syncs": [{"id": "Announce", "name": "Announce", "vars": ["msg", "member"],
            "when": [{"conceptId": "Team", "action": "announce", "inputBindings": {"msg": "msg"}}],
            "where": [{"op": "query", "conceptId": "Roster", "method": "_members",
                       "outputBindings": {"member": "member"}}],
            "then": [{"conceptId": "Mail", "action": "send",
                      "inputBindings": {"to": "member", "body": "msg"}}]}]
    }))
    .unwrap()
}

fn one(field: &str, value: Value) -> ValueMap {
    let mut m = ValueMap::new();
    m.insert(field.to_string(), value);
    m
}

fn bench_chain(c: &mut Criterion) {
    let mut g = c.benchmark_group("cascade/chain");
    for len in [4usize, 16, 31] {
        let graph = chain(len);
        g.throughput(Throughput::Elements(len as u64));
        g.bench_with_input(BenchmarkId::from_parameter(len), &graph, |b, graph| {
            let mut engine = SyncEngine::load(graph, &provider, EngineConfig::default())
                .unwrap()
                .with_clock(LogicalClock::new());
            b.iter(|| {
                let trace = engine.submit("C0", "go", one("n", Value::Number(1.0))).unwrap();
                black_box(trace.records.len())
            });
        });
    }
    g.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut g = c.benchmark_group("cascade/fan_out");
    for rows in [8usize, 64, 256] {
        let mut engine = SyncEngine::load(&fan_out(), &provider, EngineConfig::default())
            .unwrap()
            .with_clock(LogicalClock::new());
        for i in 0..rows {
            engine
                .submit("Roster", "add", one("member", Value::str(format!("m{i}"))))
                .unwrap();
        }
        g.throughput(Throughput::Elements(rows as u64));
        g.bench_function(BenchmarkId::from_parameter(rows), |b| {
            b.iter(|| {
                let trace = engine
                    .submit("Team", "announce", one("msg", Value::str("hi")))
                    .unwrap();
                black_box(trace.records.len())
            });
        });
    }
    g.finish();
}

criterion_group!(benches, bench_chain, bench_fan_out);
criterion_main!(benches);
