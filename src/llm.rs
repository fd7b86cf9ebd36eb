use std::time::Duration;

use tracing::debug;

use crate::agent::llm::openai::OpenAIProvider;
use crate::agent::{Orchestrator, Session, ToolRegistry};
use crate::config::{Config, LlmConfig};
use crate::tool::open_meteo::OpenMeteo;

/// Create an LLM provider with the specified configuration
pub fn create_provider(
    config: &LlmConfig,
    base_url: &str,
    api_key: &str,
) -> anyhow::Result<OpenAIProvider> {
    let mut provider = OpenAIProvider::new(base_url, api_key, &config.model)
        .timeout(Duration::from_secs(config.timeout_secs))?
        .temperature(config.temperature)
        .max_tokens(config.max_tokens)
        .inline_tool_calls(config.inline_tool_calls);

    for (key, value) in &config.headers {
        provider = provider.header(key, value)?;
    }

    if !config.body.is_null() {
        provider = provider.body(config.body.clone())?;
    }

    Ok(provider)
}

/// Build the weather agent: registry, orchestrator, and a session primed with the system prompt
pub fn weather_session(
    config: &Config,
    provider: OpenAIProvider,
) -> anyhow::Result<Session<OpenAIProvider>> {
    let api = OpenMeteo::new(&config.weather);
    let registry = crate::tool::register_weather_tools(ToolRegistry::builder(), &api).build()?;
    debug!("Registered tools: {}", registry.names().join(", "));
    let orchestrator = Orchestrator::new(registry).max_iterations(config.agent.max_iterations);
    Ok(Session::new(orchestrator, provider).system(config.agent.system_prompt.clone()))
}
