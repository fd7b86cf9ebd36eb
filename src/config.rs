use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::agent::r#loop::DEFAULT_MAX_ITERATIONS;

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub local: LocalConfig,
}

#[derive(Deserialize, Debug)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub inline_tool_calls: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: None,
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
            headers: HashMap::new(),
            body: Value::Null,
            inline_tool_calls: false,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct WeatherConfig {
    #[serde(default = "default_forecast_url")]
    pub forecast_url: String,
    #[serde(default = "default_geocoding_url")]
    pub geocoding_url: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            forecast_url: default_forecast_url(),
            geocoding_url: default_geocoding_url(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct LocalConfig {
    #[serde(default = "default_local_model")]
    pub model: String,
    /// Interface the server binds; `0.0.0.0` exposes it to the network
    #[serde(default = "default_local_host")]
    pub host: String,
    #[serde(default = "default_local_port")]
    pub port: u16,
    #[serde(default = "default_server_bin")]
    pub server_bin: String,
    #[serde(default = "default_context_size")]
    pub context_size: u32,
    /// Layers offloaded to the GPU; larger than the layer count means all of them
    #[serde(default = "default_gpu_layers")]
    pub gpu_layers: u32,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            model: default_local_model(),
            host: default_local_host(),
            port: default_local_port(),
            server_bin: default_server_bin(),
            context_size: default_context_size(),
            gpu_layers: default_gpu_layers(),
            ready_timeout_secs: default_ready_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:1234/v1".into()
}

fn default_model() -> String {
    "ministral-8b-instruct-2410".into()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_system_prompt() -> String {
    "You are a helpful weather assistant that can answer questions and perform tasks using the provided tools. \
    You can call tools to get information or perform actions. \
    If you don't know the answer, you will say 'I don't know'. \
    You will always use the tools provided to you, and you will not make up information. \
    You will always respond in a helpful and informative manner. \
    Do not use bold, italics, or emphasis formatting in your responses. \
    Be friendly and empathic in your responses. \
    If you are unsure about something, ask for clarification. \
    Always use AM and PM time formats and US customary units."
        .into()
}

fn default_forecast_url() -> String {
    "https://api.open-meteo.com/v1/forecast".into()
}

fn default_geocoding_url() -> String {
    "https://geocoding-api.open-meteo.com/v1/search".into()
}

fn default_local_model() -> String {
    crate::engine::DEFAULT_MODEL.into()
}

fn default_local_host() -> String {
    "127.0.0.1".into()
}

fn default_local_port() -> u16 {
    8080
}

fn default_server_bin() -> String {
    "llama-server".into()
}

fn default_context_size() -> u32 {
    4096
}

fn default_gpu_layers() -> u32 {
    999
}

fn default_ready_timeout_secs() -> u64 {
    60
}

/// Default config written by `agentlab init`
pub const DEFAULT_CONFIG: &str = r#"# agentlab configuration

[llm]
# OpenAI-compatible endpoint (LM Studio, llama-server, vLLM, ...)
base_url = "http://localhost:1234/v1"
# Model identifier sent with every request
model = "ministral-8b-instruct-2410"
# Request timeout in seconds
timeout_secs = 120
# Sampling temperature (omit to use the server default)
# temperature = 0.0
# Completion token limit (omit to use the server default)
# max_tokens = 1024
# Parse tool calls that small local models emit as plain JSON text
inline_tool_calls = false

# Extra request headers
[llm.headers]

[agent]
# Maximum backend round-trips per user message before giving up
max_iterations = 10

[weather]
# Open-Meteo forecast API
forecast_url = "https://api.open-meteo.com/v1/forecast"
# Open-Meteo geocoding API
geocoding_url = "https://geocoding-api.open-meteo.com/v1/search"

[local]
# GGUF model served by `agentlab chat --local` and `agentlab serve`
model = "bartowski/Llama-3.2-3B-Instruct-GGUF"
# Interface the local server binds (0.0.0.0 to accept remote clients)
host = "127.0.0.1"
# Port the local server listens on
port = 8080
# OpenAI-compatible server binary (llama.cpp)
server_bin = "llama-server"
# Context window in tokens
context_size = 4096
# Layers offloaded to the GPU (0 for CPU only, 999 for all)
gpu_layers = 999
# Seconds to wait for the server to accept connections
ready_timeout_secs = 60
"#;

impl Config {
    /// Load config from `path`, falling back to defaults when the file does not exist.
    /// Each override is `dotted.key=value`, applied before deserialization.
    pub fn load(path: &str, overrides: &[String]) -> anyhow::Result<Self> {
        let mut table = if Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str::<toml::Table>(&content)?
        } else {
            toml::Table::new()
        };

        for entry in overrides {
            apply_override(&mut table, entry)?;
        }

        Ok(toml::Value::Table(table).try_into()?)
    }
}

/// Set `a.b.c=value` in a TOML table, creating intermediate tables as needed
pub fn apply_override(table: &mut toml::Table, entry: &str) -> anyhow::Result<()> {
    let (key, raw) = entry
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Invalid override '{}', expected key=value", entry))?;
    let path: Vec<&str> = key.trim().split('.').collect();
    if path.iter().any(|p| p.is_empty()) {
        anyhow::bail!("Invalid override key '{}'", key);
    }

    let value = parse_scalar(raw.trim());
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| anyhow::anyhow!("Invalid override key '{}'", key))?;

    let mut current = table;
    for part in parents {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        current = match entry {
            toml::Value::Table(t) => t,
            _ => anyhow::bail!("Cannot override '{}': '{}' is not a table", key, part),
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// Parse a TOML scalar (number, bool, quoted string, array), falling back to a bare string
fn parse_scalar(raw: &str) -> toml::Value {
    let doc = format!("v = {}", raw);
    match toml::from_str::<toml::Table>(&doc) {
        Ok(mut t) => t.remove("v").unwrap_or_else(|| toml::Value::String(raw.to_string())),
        Err(_) => toml::Value::String(raw.to_string()),
    }
}
