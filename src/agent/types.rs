use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chat message, tagged by role as on the OpenAI wire
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }

    /// Text content, if any
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::System { content } | Self::User { content } | Self::Tool { content, .. } => {
                Some(content)
            }
            Self::Assistant { content, .. } => content.as_deref(),
        }
    }

    /// Tool calls carried by an assistant message (empty for every other role)
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant {
                tool_calls: Some(calls),
                ..
            } => calls,
            _ => &[],
        }
    }
}

/// Tool call from LLM
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

/// Function call details
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Decode the argument payload into a key/value map.
    ///
    /// An empty argument string is treated as `{}`, which some local servers send
    /// for parameterless calls.
    pub fn arguments(&self) -> Result<Map<String, Value>, String> {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!("arguments must be a JSON object, got {}", other)),
            Err(e) => Err(format!("arguments are not valid JSON: {}", e)),
        }
    }
}

fn function_type() -> String {
    "function".to_string()
}

/// Tool definition advertised to the LLM
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: ToolFunction,
}

/// Tool function definition
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: function_type(),
            function: ToolFunction {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    /// Build a definition whose parameters are the JSON schema of an argument struct
    pub fn from_args<T: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, parameters_of::<T>())
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// JSON schema of `T`, stripped of the metadata keys LLM endpoints reject
pub fn parameters_of<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| Value::Object(Map::new()));
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
        map.entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
    }
    value
}

/// Backend reply: either the final text or a batch of tool calls
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Text(String),
    ToolCalls {
        /// Optional text the model emitted alongside its calls
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
}

impl Reply {
    /// Classify an assistant message. Any non-empty `tool_calls` makes it a tool-call batch.
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Assistant {
                content,
                tool_calls: Some(calls),
            } if !calls.is_empty() => Some(Self::ToolCalls { content, calls }),
            Message::Assistant { content, .. } => Some(Self::Text(content.unwrap_or_default())),
            _ => None,
        }
    }
}

/// Append-only conversation record owned by one session
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History seeded with a system instruction
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// New history holding the first `len` messages
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            messages: self.messages[..len.min(self.messages.len())].to_vec(),
        }
    }

    /// Ids of assistant tool calls that no tool message answers yet
    pub fn unanswered_tool_calls(&self) -> Vec<&str> {
        unanswered_tool_calls(&self.messages)
    }
}

/// Ids of assistant tool calls in `messages` without a matching tool message, in request order
pub fn unanswered_tool_calls(messages: &[Message]) -> Vec<&str> {
    let mut pending: Vec<&str> = Vec::new();
    for message in messages {
        match message {
            Message::Assistant { .. } => {
                pending.extend(message.tool_calls().iter().map(|c| c.id.as_str()));
            }
            Message::Tool { tool_call_id, .. } => {
                pending.retain(|id| id != tool_call_id);
            }
            _ => {}
        }
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assistant_with_null_fields_deserializes() {
        let message: Message = serde_json::from_value(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{\"latitude\":1.0}"}
            }],
            "refusal": null
        }))
        .unwrap();

        assert_eq!(message.role(), "assistant");
        assert_eq!(message.content(), None);
        assert_eq!(message.tool_calls().len(), 1);
        assert_eq!(message.tool_calls()[0].name(), "get_weather");
    }

    #[test]
    fn test_tool_message_serializes_with_call_id() {
        let value = serde_json::to_value(Message::tool("call_9", "15.2")).unwrap();
        assert_eq!(
            value,
            json!({"role": "tool", "tool_call_id": "call_9", "content": "15.2"})
        );
    }

    #[test]
    fn test_text_assistant_omits_tool_calls() {
        let value = serde_json::to_value(Message::assistant("hi")).unwrap();
        assert_eq!(value, json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn test_arguments_rejects_non_object() {
        let call = ToolCall {
            id: "c".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "x".into(),
                arguments: "[1, 2]".into(),
            },
        };
        assert!(call.arguments().unwrap_err().contains("JSON object"));
    }

    #[test]
    fn test_empty_arguments_is_empty_map() {
        let call = ToolCall::new("c", "x", &json!({}));
        let call = ToolCall {
            function: FunctionCall {
                arguments: "  ".into(),
                ..call.function
            },
            ..call
        };
        assert!(call.arguments().unwrap().is_empty());
    }

    #[test]
    fn test_reply_from_message_with_empty_calls_is_text() {
        let reply = Reply::from_message(Message::Assistant {
            content: Some("done".into()),
            tool_calls: Some(vec![]),
        });
        assert_eq!(reply, Some(Reply::Text("done".into())));
    }

    #[test]
    fn test_reply_from_non_assistant_is_none() {
        assert_eq!(Reply::from_message(Message::user("hi")), None);
    }

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Args {
        /// A city
        city: String,
        days: Option<u32>,
    }

    #[test]
    fn test_parameters_of_strips_metadata() {
        let params = parameters_of::<Args>();
        assert!(params.get("$schema").is_none());
        assert!(params.get("title").is_none());
        assert_eq!(params["type"], "object");
        assert_eq!(params["required"], json!(["city"]));
        assert!(params["properties"]["days"].is_object());
    }

    #[test]
    fn test_unanswered_tool_calls_and_prefix() {
        let mut history = ConversationHistory::with_system("sys");
        history.push(Message::user("weather in Paris?"));
        history.push(Message::Assistant {
            content: None,
            tool_calls: Some(vec![
                ToolCall::new("call_1", "get_coordinates", &json!({"location_name": "Paris"})),
                ToolCall::new("call_2", "get_weather", &json!({})),
            ]),
        });
        history.push(Message::tool("call_1", "{}"));

        assert_eq!(history.unanswered_tool_calls(), vec!["call_2"]);

        let restored = history.prefix(2);
        assert_eq!(restored.len(), 2);
        assert!(restored.unanswered_tool_calls().is_empty());
        assert_eq!(history.len(), 4);
        assert_eq!(history.prefix(10).len(), 4);
    }
}
