use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::agent::error::BackendError;
use crate::agent::llm::Backend;
use crate::agent::types::{Message, Reply, ToolCall, ToolDefinition};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

/// OpenAI-compatible LLM provider
pub struct OpenAIProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    headers: HeaderMap,
    body: serde_json::Map<String, Value>,
    inline_tool_calls: bool,
    inline_calls_seen: usize,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
            headers: HeaderMap::new(),
            body: serde_json::Map::new(),
            inline_tool_calls: false,
            inline_calls_seen: 0,
        }
    }

    /// Replace the HTTP client with one that enforces a request timeout
    pub fn timeout(mut self, timeout: Duration) -> anyhow::Result<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Add an extra request header
    pub fn header(mut self, key: &str, value: &str) -> anyhow::Result<Self> {
        let name = HeaderName::from_bytes(key.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Merge extra fields into every request body. Must be a JSON object.
    pub fn body(mut self, body: Value) -> anyhow::Result<Self> {
        match body {
            Value::Object(map) => {
                self.body.extend(map);
                Ok(self)
            }
            Value::Null => Ok(self),
            other => anyhow::bail!("extra request body must be an object, got {}", other),
        }
    }

    /// Treat assistant text shaped like `{"name": ..., "parameters": {...}}` as a tool call
    pub fn inline_tool_calls(mut self, enabled: bool) -> Self {
        self.inline_tool_calls = enabled;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, messages: &[Message], tools: &[ToolDefinition]) -> Value {
        let request = ChatRequest {
            model: &self.model,
            messages,
            tools,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let mut value = serde_json::to_value(&request).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            for (key, extra) in &self.body {
                map.insert(key.clone(), extra.clone());
            }
        }
        value
    }

    fn classify(&mut self, message: Message) -> Result<Reply, BackendError> {
        let role = message.role();
        trace!("Response carries {} tool calls", message.tool_calls().len());
        let reply = Reply::from_message(message).ok_or_else(|| {
            BackendError::Malformed(format!("first choice is a {} message, expected assistant", role))
        })?;

        if let Reply::Text(text) = &reply {
            if self.inline_tool_calls {
                if let Some(call) = parse_inline_tool_call(text, self.inline_calls_seen + 1) {
                    self.inline_calls_seen += 1;
                    debug!("Detected inline tool call: {}", call.function.name);
                    return Ok(Reply::ToolCalls {
                        content: None,
                        calls: vec![call],
                    });
                }
            }
        }

        Ok(reply)
    }
}

impl Backend for OpenAIProvider {
    async fn complete(
        &mut self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Reply, BackendError> {
        trace!(
            "Request: {} messages, {} tools",
            messages.len(),
            tools.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .headers(self.headers.clone())
            .json(&self.request_body(messages, tools))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let chat_response: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| BackendError::Malformed(format!("{}: {}", e, text)))?;
        trace!("Response has {} choices", chat_response.choices.len());

        // First choice is the primary response
        let message = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| BackendError::Malformed("response has no choices".into()))?;

        self.classify(message)
    }
}

/// Parse a tool request emitted as plain JSON text, optionally inside a code fence
pub fn parse_inline_tool_call(text: &str, seq: usize) -> Option<ToolCall> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let value: Value = serde_json::from_str(body).ok()?;
    let name = value.get("name")?.as_str()?;
    let arguments = value
        .get("parameters")
        .or_else(|| value.get("arguments"))
        .filter(|a| a.is_object())?;

    Some(ToolCall::new(format!("call_{}", seq), name, arguments))
}
