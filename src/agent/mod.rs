pub mod error;
pub mod llm;
pub mod r#loop;
pub mod registry;
pub mod schema;
pub mod types;

pub use llm::Backend;
pub use r#loop::{Orchestrator, Session};
pub use registry::{Tool, ToolRegistry};
pub use types::ToolDefinition;
