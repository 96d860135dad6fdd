use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use sw_core::{ContinuationOutcome, LogFilter, SubmitOptions, SyncEngine, map_from_json};
use tokio::sync::Mutex;

use crate::report;

/// One engine per server. The mutex is held for a whole cascade, so
/// concurrent `sw_submit` calls are processed one trigger at a time.
#[derive(Clone)]
pub struct SwServer {
    engine: Arc<Mutex<SyncEngine>>,
    tool_router: ToolRouter<Self>,
}

impl SwServer {
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            tool_router: Self::tool_router(),
        }
    }
}

fn json_result(value: &serde_json::Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_default(),
    )])
}

// --- Tool parameter types ---

#[derive(Debug, Deserialize, JsonSchema)]
struct SubmitRequest {
    /// Concept id or unique concept name, e.g. "Button" or "Concept:Button"
    concept: String,
    /// Effect action to invoke
    action: String,
    /// Input field values as a JSON object of strings, numbers, booleans or nulls
    inputs: Option<serde_json::Value>,
    /// Optional cascade depth limit for this trigger only
    max_depth: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct InspectRequest {
    /// Concept id or unique concept name
    concept: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct LogRequest {
    /// Only records of this triggering window
    trigger: Option<u64>,
    /// Only records of this concept id
    concept: Option<String>,
    /// Only records of this action
    action: Option<String>,
    /// Only records with a sequence number greater than this
    since: Option<u64>,
}

#[tool_router]
impl SwServer {
    #[tool(
        description = "Submit an external action and cascade synchronizations to quiescence. Returns the full trace: every record produced (external call first) and every rule evaluation with its bindings and outcome."
    )]
    async fn sw_submit(
        &self,
        Parameters(req): Parameters<SubmitRequest>,
    ) -> Result<CallToolResult, McpError> {
        let inputs = map_from_json(&req.inputs.unwrap_or(serde_json::Value::Null))
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
        let options = match req.max_depth {
            Some(depth) => SubmitOptions::max_depth(depth),
            None => SubmitOptions::default(),
        };

        let mut engine = self.engine.lock().await;
        let result = engine.submit_with(&req.concept, &req.action, inputs, &options);
        let trace = match &result {
            Ok(trace) => Some(trace),
            Err(failure) => failure.trace.as_ref(),
        };
        for eval in trace.into_iter().flat_map(|t| &t.evaluations) {
            if let ContinuationOutcome::Failed { error, .. } = &eval.outcome {
                tracing::error!(rule = %eval.rule, pass = eval.pass, "continuation failed: {error}");
            }
        }

        let body = report::result_json(&result);
        match result {
            Ok(_) => Ok(json_result(&body)),
            Err(failure) => {
                tracing::warn!("submit {}.{} failed: {}", req.concept, req.action, failure);
                Ok(CallToolResult::error(vec![Content::text(
                    serde_json::to_string_pretty(&body).unwrap_or_default(),
                )]))
            }
        }
    }

    #[tool(description = "Read the current state of one concept: scalar fields and rows.")]
    async fn sw_inspect(
        &self,
        Parameters(req): Parameters<InspectRequest>,
    ) -> Result<CallToolResult, McpError> {
        let engine = self.engine.lock().await;
        let state = engine
            .inspect(&req.concept)
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
        let value = serde_json::to_value(&state)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(json_result(&serde_json::json!({
            "concept": req.concept,
            "state": value,
        })))
    }

    #[tool(
        description = "List action log records in sequence order, optionally filtered by triggering window, concept id or action, or limited to records after a sequence number."
    )]
    async fn sw_log(
        &self,
        Parameters(req): Parameters<LogRequest>,
    ) -> Result<CallToolResult, McpError> {
        let engine = self.engine.lock().await;
        let filter = LogFilter {
            concept: req.concept,
            action: req.action,
            trigger: req.trigger,
        };
        let records: Vec<_> = engine
            .log()
            .since(req.since.unwrap_or(0))
            .iter()
            .filter(|r| filter.matches(r))
            .collect();
        let value = serde_json::to_value(&records)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(json_result(&serde_json::json!({
            "count": records.len(),
            "last_seq": engine.log().last_seq(),
            "records": value,
        })))
    }

    #[tool(
        description = "List the loaded synchronization rules in evaluation order, with their variables and the actions they watch and dispatch, plus load warnings."
    )]
    async fn sw_rules(&self) -> Result<CallToolResult, McpError> {
        let engine = self.engine.lock().await;
        let rules: Vec<_> = engine
            .rules()
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "name": r.name,
                    "vars": r.vars,
                    "when": r.when.iter().map(|p| format!("{}.{}", p.concept, p.action)).collect::<Vec<_>>(),
                    "where": r.where_steps.iter().map(|s| s.label()).collect::<Vec<_>>(),
                    "then": r.then.iter().map(|p| format!("{}.{}", p.concept, p.action)).collect::<Vec<_>>(),
                })
            })
            .collect();
        Ok(json_result(&serde_json::json!({
            "rules": rules,
            "concepts": engine.registry().ids(),
            "warnings": engine.diagnostics(),
        })))
    }

    #[tool(
        description = "Reset every concept to its initial state and clear the action log. Sequence numbers restart at 1."
    )]
    async fn sw_reset(&self) -> Result<CallToolResult, McpError> {
        let mut engine = self.engine.lock().await;
        engine.reset();
        Ok(json_result(&serde_json::json!({
            "reset": true,
            "concepts": engine.registry().len(),
        })))
    }
}

#[tool_handler]
impl ServerHandler for SwServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Runs a syncweave synchronization engine over a fixed concept graph.\n\n\
                 - sw_rules shows which concepts exist and which actions each rule watches.\n\
                 - sw_submit invokes one effect action and returns everything it caused.\n\
                 - sw_inspect reads concept state; sw_log reads the action log.\n\
                 - sw_reset restores initial state.\n\
                 Queries (names starting with _) cannot be submitted; rules call them."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_concepts::{Demo, Library};
    use sw_core::{EngineConfig, LogicalClock};

    fn make_server(demo: Demo) -> SwServer {
        let engine = SyncEngine::load(
            &demo.graph().unwrap(),
            &Library::seeded(3),
            EngineConfig::default(),
        )
        .unwrap()
        .with_clock(LogicalClock::new());
        SwServer::new(engine)
    }

    fn text_from_result(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|c| match &c.raw {
                RawContent::Text(t) => Some(t.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    fn parse_result(result: &CallToolResult) -> serde_json::Value {
        let text = text_from_result(result);
        serde_json::from_str(&text).expect("handler should return valid JSON")
    }

    fn click() -> Parameters<SubmitRequest> {
        Parameters(SubmitRequest {
            concept: "Button".into(),
            action: "clicked".into(),
            inputs: Some(serde_json::json!({"kind": "inc", "by": "user"})),
            max_depth: None,
        })
    }

    #[tokio::test]
    async fn test_sw_submit_returns_trace() {
        let server = make_server(Demo::CounterNudge);
        let result = server.sw_submit(click()).await.unwrap();
        assert_ne!(result.is_error, Some(true));
        let json = parse_result(&result);
        assert_eq!(json["ok"], true);
        let records = json["trace"]["records"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["action"], "increment");
        assert_eq!(records[1]["cause"], "Sync:ClickToIncrement");
    }

    #[tokio::test]
    async fn test_sw_submit_third_click_nudges() {
        let server = make_server(Demo::CounterNudge);
        for _ in 0..2 {
            server.sw_submit(click()).await.unwrap();
        }
        let json = parse_result(&server.sw_submit(click()).await.unwrap());
        let records = json["trace"]["records"].as_array().unwrap();
        assert_eq!(records[2]["concept"], "Concept:Notification");
        assert_eq!(records[2]["inputs"]["message"], "reached 3");
    }

    #[tokio::test]
    async fn test_sw_submit_rejection_is_tool_error() {
        let server = make_server(Demo::CounterNudge);
        let result = server
            .sw_submit(Parameters(SubmitRequest {
                concept: "Counter".into(),
                action: "_getCount".into(),
                inputs: None,
                max_depth: None,
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        let json = parse_result(&result);
        assert_eq!(json["error"]["kind"], "KindMismatchError");
        assert!(json["trace"].is_null());
    }

    #[tokio::test]
    async fn test_sw_submit_depth_override() {
        let server = make_server(Demo::CounterNudge);
        let result = server
            .sw_submit(Parameters(SubmitRequest {
                max_depth: Some(0),
                ..click().0
            }))
            .await
            .unwrap();
        let json = parse_result(&result);
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["kind"], "CascadeLimitExceededError");
        assert_eq!(json["trace"]["outcome"], "cascade_limit_exceeded");
    }

    #[tokio::test]
    async fn test_sw_submit_rejects_nested_inputs() {
        let server = make_server(Demo::CounterNudge);
        let err = server
            .sw_submit(Parameters(SubmitRequest {
                inputs: Some(serde_json::json!({"kind": ["inc"]})),
                ..click().0
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_sw_inspect_and_reset() {
        let server = make_server(Demo::CounterNudge);
        server.sw_submit(click()).await.unwrap();
        let inspect = || {
            server.sw_inspect(Parameters(InspectRequest {
                concept: "Counter".into(),
            }))
        };
        let json = parse_result(&inspect().await.unwrap());
        assert_eq!(json["state"]["fields"]["count"], 1.0);

        let reset = parse_result(&server.sw_reset().await.unwrap());
        assert_eq!(reset["reset"], true);
        let json = parse_result(&inspect().await.unwrap());
        assert_eq!(json["state"]["fields"]["count"], 0.0);

        let log = parse_result(&server.sw_log(Parameters(LogRequest {
            trigger: None,
            concept: None,
            action: None,
            since: None,
        }))
        .await
        .unwrap());
        assert_eq!(log["count"], 0);
    }

    #[tokio::test]
    async fn test_sw_reset_then_replay_is_identical() {
        let server = make_server(Demo::UrlShortener);
        let shorten = || {
            server.sw_submit(Parameters(SubmitRequest {
                concept: "Web".into(),
                action: "request".into(),
                inputs: Some(serde_json::json!({"method": "shortenUrl", "url": "https://ex.test/x"})),
                max_depth: None,
            }))
        };
        let first = parse_result(&shorten().await.unwrap());
        server.sw_reset().await.unwrap();
        let second = parse_result(&shorten().await.unwrap());
        assert_eq!(first["trace"]["records"][1]["action"], "generate");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_sw_inspect_unknown_concept() {
        let server = make_server(Demo::CounterNudge);
        let err = server
            .sw_inspect(Parameters(InspectRequest {
                concept: "Ghost".into(),
            }))
            .await
            .unwrap_err();
        assert!(err.message.contains("Ghost"));
    }

    #[tokio::test]
    async fn test_sw_log_filters() {
        let server = make_server(Demo::CounterNudge);
        for _ in 0..2 {
            server.sw_submit(click()).await.unwrap();
        }
        let all = |trigger, concept: Option<&str>, since| {
            server.sw_log(Parameters(LogRequest {
                trigger,
                concept: concept.map(String::from),
                action: None,
                since,
            }))
        };
        assert_eq!(parse_result(&all(None, None, None).await.unwrap())["count"], 4);
        assert_eq!(parse_result(&all(Some(2), None, None).await.unwrap())["count"], 2);
        let counter = parse_result(&all(None, Some("Concept:Counter"), None).await.unwrap());
        assert_eq!(counter["count"], 2);
        let tail = parse_result(&all(None, None, Some(3)).await.unwrap());
        assert_eq!(tail["records"][0]["seq"], 4);
    }

    #[tokio::test]
    async fn test_sw_rules_lists_in_order() {
        let server = make_server(Demo::CounterNudge);
        let json = parse_result(&server.sw_rules().await.unwrap());
        let rules = json["rules"].as_array().unwrap();
        assert_eq!(rules[0]["id"], "Sync:ClickToIncrement");
        assert_eq!(rules[1]["where"][1], "filter count === 3");
        assert_eq!(json["concepts"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_tool_registration() {
        let server = make_server(Demo::CounterNudge);
        let info = server.get_info();

        assert!(info.instructions.is_some());
        assert!(info.capabilities.tools.is_some());
    }
}
