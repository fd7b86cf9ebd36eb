pub mod openai;

use super::error::BackendError;
use super::types::{Message, Reply, ToolDefinition};

/// LLM inference capability driven by the orchestrator
pub trait Backend {
    /// Produce the next assistant turn for `history`, advertising `tools`
    async fn complete(
        &mut self,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<Reply, BackendError>;
}
