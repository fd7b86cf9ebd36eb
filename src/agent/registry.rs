use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::error::AgentError;
use super::types::ToolDefinition;

/// A callable tool: its advertised schema plus the implementation
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Invoke with arguments already validated against `definition().function.parameters`
    async fn invoke(&self, args: Map<String, Value>) -> anyhow::Result<Value>;
}

/// Immutable name -> tool mapping, built once per session
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<(ToolDefinition, Arc<dyn Tool>)>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Tool schemas in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|(def, _)| def.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<(&ToolDefinition, &Arc<dyn Tool>)> {
        self.index
            .get(name)
            .map(|&i| (&self.tools[i].0, &self.tools[i].1))
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|(def, _)| def.name()).collect()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    tools: Vec<Arc<dyn Tool>>,
}

impl RegistryBuilder {
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn build(self) -> Result<ToolRegistry, AgentError> {
        let mut registry = ToolRegistry::default();
        for tool in self.tools {
            let def = tool.definition();
            let name = def.name().to_string();
            if registry.index.contains_key(&name) {
                return Err(AgentError::DuplicateTool(name));
            }
            registry.index.insert(name, registry.tools.len());
            registry.tools.push((def, tool));
        }
        Ok(registry)
    }
}

/// Render a tool result as message text: strings verbatim, everything else as compact JSON
pub fn render_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
