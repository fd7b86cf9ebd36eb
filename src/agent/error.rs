use thiserror::Error;

/// Failure of the LLM backend itself (transport, status or payload)
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Errors surfaced by the orchestrator. `turn` counts backend round-trips within one submit, from 1.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("user input is empty")]
    EmptyInput,
    #[error("tool '{0}' is registered more than once")]
    DuplicateTool(String),
    #[error("turn {turn}: unknown tool '{name}' requested by call {call_id}")]
    UnknownTool {
        turn: usize,
        call_id: String,
        name: String,
    },
    #[error("turn {turn}: invalid arguments for '{tool}' (call {call_id}): {reason}")]
    InvalidArguments {
        turn: usize,
        call_id: String,
        tool: String,
        reason: String,
    },
    #[error("turn {turn}: backend error: {source}")]
    Backend {
        turn: usize,
        #[source]
        source: BackendError,
    },
    #[error("turn {turn}: tool '{tool}' failed (call {call_id}): {source}")]
    ToolExecution {
        turn: usize,
        call_id: String,
        tool: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("no final answer after {limit} backend round-trips")]
    MaxIterationsExceeded { limit: usize },
}
