use tracing::{debug, info, info_span, trace, warn, Instrument};

use super::error::AgentError;
use super::llm::Backend;
use super::registry::{render_result, ToolRegistry};
use super::schema;
use super::types::{ConversationHistory, Message, Reply, ToolCall};

/// Default cap on backend round-trips per submitted user message
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Drives one user message to a final answer, executing requested tools in between
#[derive(Clone)]
pub struct Orchestrator {
    registry: ToolRegistry,
    max_iterations: usize,
}

impl Orchestrator {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Set the maximum number of backend calls per `submit` (at least 1)
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Append `user_text` to `history` and loop backend calls and tool executions until
    /// the backend answers with text, which is appended and returned.
    ///
    /// History is only ever appended to. On error, messages added before the failure stay.
    pub async fn submit<B: Backend>(
        &self,
        history: &mut ConversationHistory,
        user_text: &str,
        backend: &mut B,
    ) -> Result<String, AgentError> {
        if user_text.trim().is_empty() {
            return Err(AgentError::EmptyInput);
        }
        history.push(Message::user(user_text));

        let tools = self.registry.definitions();

        for turn in 1..=self.max_iterations {
            trace!(
                "Calling LLM with {} messages and {} tools",
                history.len(),
                tools.len()
            );
            let reply = backend
                .complete(history.messages(), &tools)
                .instrument(info_span!("backend", turn))
                .await
                .map_err(|source| AgentError::Backend { turn, source })?;

            let calls = match reply {
                Reply::Text(content) => {
                    debug!("Agent loop completed after {} iterations", turn);
                    history.push(Message::assistant(content.clone()));
                    return Ok(content);
                }
                Reply::ToolCalls { content, calls } => {
                    if turn == self.max_iterations {
                        break;
                    }
                    if let Some(text) = content.as_deref().filter(|t| !t.is_empty()) {
                        debug!("LLM response content: {}", text);
                    }
                    history.push(Message::Assistant {
                        content,
                        tool_calls: Some(calls.clone()),
                    });
                    calls
                }
            };

            debug!("LLM requested {} tool calls", calls.len());
            for call in &calls {
                let result = self.execute(turn, call).await?;
                history.push(Message::tool(call.id.clone(), result));
            }
        }

        Err(AgentError::MaxIterationsExceeded {
            limit: self.max_iterations,
        })
    }

    async fn execute(&self, turn: usize, call: &ToolCall) -> Result<String, AgentError> {
        let (definition, tool) =
            self.registry
                .get(call.name())
                .ok_or_else(|| AgentError::UnknownTool {
                    turn,
                    call_id: call.id.clone(),
                    name: call.name().to_string(),
                })?;

        let invalid = |reason: String| AgentError::InvalidArguments {
            turn,
            call_id: call.id.clone(),
            tool: call.name().to_string(),
            reason,
        };
        let args = call.arguments().map_err(invalid)?;
        schema::validate(&definition.function.parameters, &args).map_err(invalid)?;

        info!(
            "Tool Call:    {}({})",
            call.name(),
            serde_json::Value::Object(args.clone())
        );
        let value = tool
            .invoke(args)
            .instrument(info_span!("tool", name = call.name(), call_id = %call.id))
            .await
            .map_err(|source| AgentError::ToolExecution {
                turn,
                call_id: call.id.clone(),
                tool: call.name().to_string(),
                source,
            })?;

        let rendered = render_result(&value);
        info!("Tool Result:  {} -> {}", call.name(), rendered);
        Ok(rendered)
    }
}

/// A chat session: orchestrator, backend and the history they share
pub struct Session<B: Backend> {
    orchestrator: Orchestrator,
    backend: B,
    system_prompt: Option<String>,
    history: ConversationHistory,
    /// History length before the last `chat`, kept only when that turn failed
    failed_turn: Option<usize>,
}

impl<B: Backend> Session<B> {
    pub fn new(orchestrator: Orchestrator, backend: B) -> Self {
        Self {
            orchestrator,
            backend,
            system_prompt: None,
            history: ConversationHistory::new(),
            failed_turn: None,
        }
    }

    /// Start (and restart on `clear`) the history with a system instruction
    pub fn system(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.history = ConversationHistory::with_system(prompt.clone());
        self.system_prompt = Some(prompt);
        self
    }

    pub async fn chat(&mut self, text: &str) -> Result<String, AgentError> {
        let start = self.history.len();
        let result = self
            .orchestrator
            .submit(&mut self.history, text, &mut self.backend)
            .await;
        self.failed_turn = result.is_err().then_some(start);
        result
    }

    /// Replace the history with the prefix before the last failed turn, so no
    /// unanswered tool calls reach the backend. Returns the number of messages dropped.
    pub fn recover(&mut self) -> usize {
        let Some(start) = self.failed_turn.take() else {
            return 0;
        };

        let unanswered = self.history.unanswered_tool_calls();
        if !unanswered.is_empty() {
            warn!("Dropping unanswered tool calls: {}", unanswered.join(", "));
        }
        if let Some(text) = self.history.messages().get(start).and_then(Message::content) {
            debug!("Discarding failed turn: {}", text);
        }

        let dropped = self.history.len().saturating_sub(start);
        self.history = self.history.prefix(start);
        dropped
    }

    /// Start a fresh history, keeping only the system instruction
    pub fn clear(&mut self) {
        self.failed_turn = None;
        self.history = match &self.system_prompt {
            Some(prompt) => ConversationHistory::with_system(prompt.clone()),
            None => ConversationHistory::new(),
        };
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::error::BackendError;
    use crate::agent::registry::Tool;
    use crate::agent::types::{unanswered_tool_calls, ToolDefinition};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Backend that replays scripted replies and records what it was sent
    struct ScriptedBackend {
        replies: VecDeque<Result<Reply, BackendError>>,
        seen: Vec<Vec<Message>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: replies.into_iter().map(Ok).collect(),
                seen: Vec::new(),
            }
        }
    }

    impl Backend for ScriptedBackend {
        async fn complete(
            &mut self,
            history: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<Reply, BackendError> {
            self.seen.push(history.to_vec());
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Malformed("script exhausted".into())))
        }
    }

    /// Backend that never stops asking for the same tool
    struct LoopingBackend {
        calls: usize,
    }

    impl Backend for LoopingBackend {
        async fn complete(
            &mut self,
            _history: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<Reply, BackendError> {
            self.calls += 1;
            Ok(calls(vec![ToolCall::new(
                format!("loop_{}", self.calls),
                "get_coordinates",
                &json!({"location_name": "Paris"}),
            )]))
        }
    }

    /// Deterministic tool returning a fixed value and counting invocations
    struct SpyTool {
        name: &'static str,
        params: Value,
        result: Value,
        invocations: Arc<AtomicUsize>,
    }

    impl SpyTool {
        fn new(name: &'static str, params: Value, result: Value) -> (Self, Arc<AtomicUsize>) {
            let invocations = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    params,
                    result,
                    invocations: invocations.clone(),
                },
                invocations,
            )
        }
    }

    #[async_trait]
    impl Tool for SpyTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(self.name, "spy", self.params.clone())
        }

        async fn invoke(&self, _args: Map<String, Value>) -> anyhow::Result<Value> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("flaky", "always fails", json!({"type": "object", "properties": {}}))
        }

        async fn invoke(&self, _args: Map<String, Value>) -> anyhow::Result<Value> {
            anyhow::bail!("upstream returned 503")
        }
    }

    fn geo_params() -> Value {
        json!({
            "type": "object",
            "properties": {
                "location_name": {"type": "string"},
                "country_code": {"type": "string"}
            },
            "required": ["location_name"]
        })
    }

    fn wx_params() -> Value {
        json!({
            "type": "object",
            "properties": {
                "latitude": {"type": "number"},
                "longitude": {"type": "number"}
            },
            "required": ["latitude", "longitude"]
        })
    }

    fn paris() -> Value {
        json!({"name": "Paris", "country": "France", "latitude": 48.85, "longitude": 2.35})
    }

    fn weather_registry() -> (ToolRegistry, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let (geo, geo_count) = SpyTool::new("get_coordinates", geo_params(), paris());
        let (wx, wx_count) = SpyTool::new("get_weather", wx_params(), json!(15.0));
        let registry = ToolRegistry::builder().tool(geo).tool(wx).build().unwrap();
        (registry, geo_count, wx_count)
    }

    fn calls(calls: Vec<ToolCall>) -> Reply {
        Reply::ToolCalls {
            content: None,
            calls,
        }
    }

    fn geo_call(id: &str) -> ToolCall {
        ToolCall::new(id, "get_coordinates", &json!({"location_name": "Paris"}))
    }

    fn wx_call(id: &str) -> ToolCall {
        ToolCall::new(id, "get_weather", &json!({"latitude": 48.85, "longitude": 2.35}))
    }

    fn roles(history: &ConversationHistory) -> Vec<&'static str> {
        history.messages().iter().map(Message::role).collect()
    }

    #[tokio::test]
    async fn test_paris_weather_scenario() {
        let (registry, geo_count, wx_count) = weather_registry();
        let orchestrator = Orchestrator::new(registry);
        let mut backend = ScriptedBackend::new(vec![
            calls(vec![geo_call("call_1")]),
            calls(vec![wx_call("call_2")]),
            Reply::Text("It is 15°C in Paris.".into()),
        ]);
        let mut history = ConversationHistory::new();

        let answer = orchestrator
            .submit(&mut history, "What's the weather like in Paris today?", &mut backend)
            .await
            .unwrap();

        assert_eq!(answer, "It is 15°C in Paris.");
        assert_eq!(
            roles(&history),
            vec!["user", "assistant", "tool", "assistant", "tool", "assistant"]
        );
        let messages = history.messages();
        assert_eq!(messages[1].tool_calls()[0].id, "call_1");
        assert_eq!(messages[2], Message::tool("call_1", paris().to_string()));
        assert_eq!(messages[3].tool_calls()[0].id, "call_2");
        assert_eq!(messages[4], Message::tool("call_2", "15.0"));
        assert_eq!(messages[5], Message::assistant("It is 15°C in Paris."));
        assert_eq!(geo_count.load(Ordering::SeqCst), 1);
        assert_eq!(wx_count.load(Ordering::SeqCst), 1);

        // Each backend call sees the history as it stood at that point
        assert_eq!(backend.seen.len(), 3);
        assert_eq!(backend.seen[0].len(), 1);
        assert_eq!(backend.seen[1].len(), 3);
        assert_eq!(backend.seen[2].len(), 5);
    }

    #[tokio::test]
    async fn test_history_length_matches_round_trips() {
        let (registry, _, _) = weather_registry();
        let orchestrator = Orchestrator::new(registry);
        // Batches of 2, 0 (text) ... plus one batch of 3
        let mut backend = ScriptedBackend::new(vec![
            calls(vec![geo_call("a"), wx_call("b")]),
            calls(vec![geo_call("c"), geo_call("d"), wx_call("e")]),
            Reply::Text("done".into()),
        ]);
        let mut history = ConversationHistory::with_system("be brief");
        let initial = history.len();

        orchestrator
            .submit(&mut history, "hi", &mut backend)
            .await
            .unwrap();

        let tool_round_trips = 2;
        let executed_calls = 5;
        let final_text = 1;
        assert_eq!(
            history.len(),
            initial + 1 + tool_round_trips + executed_calls + final_text
        );
        assert_eq!(history.messages()[0], Message::system("be brief"));
    }

    #[tokio::test]
    async fn test_tool_messages_answer_preceding_assistant_calls() {
        let (registry, _, _) = weather_registry();
        let orchestrator = Orchestrator::new(registry);
        let mut backend = ScriptedBackend::new(vec![
            calls(vec![geo_call("x1"), wx_call("x2")]),
            calls(vec![wx_call("y1")]),
            Reply::Text("ok".into()),
        ]);
        let mut history = ConversationHistory::new();
        orchestrator
            .submit(&mut history, "hi", &mut backend)
            .await
            .unwrap();

        let mut requested: Vec<String> = Vec::new();
        for message in history.messages() {
            match message {
                Message::Assistant { .. } => {
                    requested = message.tool_calls().iter().map(|c| c.id.clone()).collect();
                }
                Message::Tool { tool_call_id, .. } => {
                    let matches = requested.iter().filter(|id| *id == tool_call_id).count();
                    assert_eq!(matches, 1, "call id {} not requested once", tool_call_id);
                }
                _ => {}
            }
        }
        // Results keep request order
        let tool_ids: Vec<_> = history
            .messages()
            .iter()
            .filter_map(|m| match m {
                Message::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tool_ids, vec!["x1", "x2", "y1"]);
    }

    #[tokio::test]
    async fn test_same_call_twice_yields_identical_results() {
        let (registry, _, wx_count) = weather_registry();
        let orchestrator = Orchestrator::new(registry);
        let mut backend = ScriptedBackend::new(vec![
            calls(vec![wx_call("1"), wx_call("2")]),
            Reply::Text("ok".into()),
        ]);
        let mut history = ConversationHistory::new();
        orchestrator
            .submit(&mut history, "hi", &mut backend)
            .await
            .unwrap();

        let messages = history.messages();
        assert_eq!(messages[2].content(), messages[3].content());
        assert_eq!(wx_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_tool_keeps_prior_results() {
        let (registry, geo_count, wx_count) = weather_registry();
        let orchestrator = Orchestrator::new(registry);
        let mut backend = ScriptedBackend::new(vec![calls(vec![
            geo_call("ok_1"),
            ToolCall::new("bad_2", "get_tides", &json!({})),
            wx_call("never_3"),
        ])]);
        let mut history = ConversationHistory::new();

        let err = orchestrator
            .submit(&mut history, "hi", &mut backend)
            .await
            .unwrap_err();

        match err {
            AgentError::UnknownTool {
                turn,
                call_id,
                name,
            } => {
                assert_eq!(turn, 1);
                assert_eq!(call_id, "bad_2");
                assert_eq!(name, "get_tides");
            }
            other => panic!("expected UnknownTool, got {:?}", other),
        }
        assert_eq!(roles(&history), vec!["user", "assistant", "tool"]);
        assert_eq!(history.messages()[1].tool_calls().len(), 3);
        assert_eq!(geo_count.load(Ordering::SeqCst), 1);
        // Remaining calls in the batch are not attempted
        assert_eq!(wx_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_required_argument_skips_invocation() {
        let (registry, _, wx_count) = weather_registry();
        let orchestrator = Orchestrator::new(registry);
        let mut backend = ScriptedBackend::new(vec![calls(vec![ToolCall::new(
            "c1",
            "get_weather",
            &json!({"latitude": 48.85}),
        )])]);
        let mut history = ConversationHistory::new();

        let err = orchestrator
            .submit(&mut history, "hi", &mut backend)
            .await
            .unwrap_err();

        assert!(
            matches!(&err, AgentError::InvalidArguments { tool, reason, .. }
                if tool == "get_weather" && reason.contains("longitude")),
            "unexpected error: {:?}",
            err
        );
        assert_eq!(wx_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_argument_type_is_invalid() {
        let (registry, _, wx_count) = weather_registry();
        let orchestrator = Orchestrator::new(registry);
        let mut backend = ScriptedBackend::new(vec![calls(vec![ToolCall::new(
            "c1",
            "get_weather",
            &json!({"latitude": "north", "longitude": 2.35}),
        )])]);
        let mut history = ConversationHistory::new();

        let err = orchestrator
            .submit(&mut history, "hi", &mut backend)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::InvalidArguments { .. }));
        assert_eq!(wx_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tool_failure_is_wrapped() {
        let registry = ToolRegistry::builder().tool(FailingTool).build().unwrap();
        let orchestrator = Orchestrator::new(registry);
        let mut backend = ScriptedBackend::new(vec![
            Reply::Text("warming up".into()),
            calls(vec![ToolCall::new("f1", "flaky", &json!({}))]),
        ]);
        let mut history = ConversationHistory::new();
        orchestrator
            .submit(&mut history, "first", &mut backend)
            .await
            .unwrap();

        let err = orchestrator
            .submit(&mut history, "second", &mut backend)
            .await
            .unwrap_err();

        match err {
            AgentError::ToolExecution {
                tool,
                call_id,
                source,
                ..
            } => {
                assert_eq!(tool, "flaky");
                assert_eq!(call_id, "f1");
                assert_eq!(source.to_string(), "upstream returned 503");
            }
            other => panic!("expected ToolExecution, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_error_propagates_with_turn() {
        let (registry, _, _) = weather_registry();
        let orchestrator = Orchestrator::new(registry);
        let mut backend = ScriptedBackend::new(vec![calls(vec![geo_call("c1")])]);
        let mut history = ConversationHistory::new();

        let err = orchestrator
            .submit(&mut history, "hi", &mut backend)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Backend { turn: 2, .. }));
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn test_max_iterations_stops_looping_backend() {
        let (registry, geo_count, _) = weather_registry();
        let orchestrator = Orchestrator::new(registry).max_iterations(3);
        let mut backend = LoopingBackend { calls: 0 };
        let mut history = ConversationHistory::new();

        let err = orchestrator
            .submit(&mut history, "hi", &mut backend)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::MaxIterationsExceeded { limit: 3 }));
        assert_eq!(backend.calls, 3);
        // The last batch is neither recorded nor executed
        assert_eq!(geo_count.load(Ordering::SeqCst), 2);
        assert_eq!(history.len(), 1 + 2 * 2);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let (registry, _, _) = weather_registry();
        let orchestrator = Orchestrator::new(registry);
        let mut backend = ScriptedBackend::new(vec![]);
        let mut history = ConversationHistory::new();

        let err = orchestrator
            .submit(&mut history, "   ", &mut backend)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::EmptyInput));
        assert_eq!(history.len(), 0);
        assert!(backend.seen.is_empty());
    }

    #[tokio::test]
    async fn test_session_clear_keeps_system_prompt() {
        let (registry, _, _) = weather_registry();
        let backend = ScriptedBackend::new(vec![Reply::Text("hello".into())]);
        let mut session = Session::new(Orchestrator::new(registry), backend).system("sys");

        assert_eq!(session.chat("hi").await.unwrap(), "hello");
        assert_eq!(session.history().len(), 3);

        session.clear();
        assert_eq!(session.history().messages(), &[Message::system("sys")]);
    }

    #[tokio::test]
    async fn test_derived_schema_rejects_bad_enum_and_minimum() {
        use crate::config::WeatherConfig;
        use crate::tool::geocoding::GetLocations;
        use crate::tool::open_meteo::OpenMeteo;
        use crate::tool::weather::GetWeatherForecast;

        let api = OpenMeteo::new(&WeatherConfig::default());
        let registry = ToolRegistry::builder()
            .tool(GetWeatherForecast::new(api.clone()))
            .tool(GetLocations::new(api))
            .build()
            .unwrap();
        let orchestrator = Orchestrator::new(registry);

        let mut backend = ScriptedBackend::new(vec![calls(vec![ToolCall::new(
            "c1",
            "get_weather_forecast",
            &json!({"latitude": 1.0, "longitude": 2.0, "temperature_unit": "kelvin"}),
        )])]);
        let mut history = ConversationHistory::new();
        let err = orchestrator
            .submit(&mut history, "weather?", &mut backend)
            .await
            .unwrap_err();
        assert!(
            matches!(&err, AgentError::InvalidArguments { tool, reason, .. }
                if tool == "get_weather_forecast" && reason.contains("temperature_unit")),
            "unexpected error: {:?}",
            err
        );

        let mut backend = ScriptedBackend::new(vec![calls(vec![ToolCall::new(
            "c2",
            "get_locations",
            &json!({"name": "Paris", "count": -1}),
        )])]);
        let err = orchestrator
            .submit(&mut history, "where?", &mut backend)
            .await
            .unwrap_err();
        assert!(
            matches!(&err, AgentError::InvalidArguments { tool, reason, .. }
                if tool == "get_locations" && reason.contains("count")),
            "unexpected error: {:?}",
            err
        );
    }

    /// Backend that rejects histories with unanswered tool calls, like OpenAI-compatible servers
    struct StrictBackend {
        inner: ScriptedBackend,
    }

    impl Backend for StrictBackend {
        async fn complete(
            &mut self,
            history: &[Message],
            tools: &[ToolDefinition],
        ) -> Result<Reply, BackendError> {
            let unanswered = unanswered_tool_calls(history);
            if !unanswered.is_empty() {
                return Err(BackendError::Status {
                    status: 400,
                    body: format!("tool_call_ids did not have response messages: {}", unanswered.join(", ")),
                });
            }
            self.inner.complete(history, tools).await
        }
    }

    #[tokio::test]
    async fn test_session_recover_drops_failed_turn() {
        let (registry, geo_count, _) = weather_registry();
        let backend = StrictBackend {
            inner: ScriptedBackend::new(vec![
                calls(vec![
                    geo_call("call_1"),
                    ToolCall::new("call_2", "get_tides", &json!({})),
                ]),
                Reply::Text("Hello again".into()),
            ]),
        };
        let mut session = Session::new(Orchestrator::new(registry), backend).system("sys");

        let err = session.chat("tides in Paris?").await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool { .. }));
        assert_eq!(geo_count.load(Ordering::SeqCst), 1);
        assert_eq!(session.history().unanswered_tool_calls(), vec!["call_2"]);

        assert_eq!(session.recover(), 3);
        assert_eq!(session.history().messages(), &[Message::system("sys")]);
        assert_eq!(session.recover(), 0);

        assert_eq!(session.chat("hello").await.unwrap(), "Hello again");
        assert_eq!(roles(session.history()), vec!["system", "user", "assistant"]);
    }

    #[tokio::test]
    async fn test_recover_after_success_is_noop() {
        let (registry, _, _) = weather_registry();
        let backend = ScriptedBackend::new(vec![Reply::Text("hello".into())]);
        let mut session = Session::new(Orchestrator::new(registry), backend).system("sys");

        session.chat("hi").await.unwrap();
        assert_eq!(session.recover(), 0);
        assert_eq!(session.history().len(), 3);
    }
}
