use clap::{Parser, Subcommand};

use crate::config::LocalConfig;

// Display order for API key option (placed at top of help text)
const API_KEY_DISPLAY_ORDER: usize = 0;
// Display order for log level option (placed at end of help text)
const LOG_LEVEL_DISPLAY_ORDER: usize = 100;

/// CLI arguments
#[derive(Parser)]
#[command(name = "agentlab", version, about = "Tool-calling LLM agent with weather tools", long_about = None)]
pub struct Cli {
    /// Log level (see https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html)
    /// [env: AGENTLAB_LOG=] [default: info]
    #[arg(
        long,
        env = "AGENTLAB_LOG",
        default_value = "info",
        global = true,
        hide_default_value = true,
        hide_env = true,
        display_order = LOG_LEVEL_DISPLAY_ORDER,
        verbatim_doc_comment
    )]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a default agentlab.toml config file
    Init(InitArgs),
    /// Ask the weather agent a single question
    Ask(AskArgs),
    /// Chat with the weather agent interactively
    Chat(ChatArgs),
    /// Serve the weather tools as an MCP server on stdio
    Mcp(McpArgs),
    /// Run the local llama.cpp server in the foreground until Ctrl-C
    #[command(visible_alias = "local-llm")]
    Serve(ServeArgs),
    /// Download every catalog model into the cache
    DownloadModels,
}

/// Arguments for the init command
#[derive(Parser)]
pub struct InitArgs {
    /// Path to config file
    #[arg(long, default_value = "agentlab.toml")]
    pub config: String,

    /// Override existing config file
    #[arg(long)]
    pub r#override: bool,
}

/// Config and credentials shared by the LLM-backed commands
#[derive(Parser, Debug)]
pub struct LlmArgs {
    /// Path to config file (initialize with `agentlab init`)
    #[arg(long, default_value = "agentlab.toml")]
    pub config: String,

    /// Override config values using dot notation (e.g. llm.model=gpt-4o-mini)
    #[arg(long = "config-override")]
    pub config_overrides: Vec<String>,

    /// LLM API key
    #[arg(
        long,
        env = "AGENTLAB_LLM_API_KEY",
        default_value = "lm-studio",
        hide_default_value = true,
        display_order = API_KEY_DISPLAY_ORDER
    )]
    pub api_key: String,
}

/// Arguments for the ask command
#[derive(Parser, Debug)]
pub struct AskArgs {
    /// Question for the agent
    #[arg(default_value = "What's the weather like in Paris today?")]
    pub prompt: String,

    #[command(flatten)]
    pub llm: LlmArgs,
}

/// Arguments for the chat command
#[derive(Parser, Debug)]
pub struct ChatArgs {
    #[command(flatten)]
    pub llm: LlmArgs,

    /// Start a local llama.cpp server with the [local] model instead of using [llm].base_url
    #[arg(long)]
    pub local: bool,
}

/// Arguments for the mcp command
#[derive(Parser, Debug)]
pub struct McpArgs {
    /// Path to config file
    #[arg(long, default_value = "agentlab.toml")]
    pub config: String,

    /// Override config values using dot notation (e.g. weather.forecast_url=http://...)
    #[arg(long = "config-override")]
    pub config_overrides: Vec<String>,
}

/// Arguments for the serve command. Flags take precedence over the [local] config section.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Path to config file
    #[arg(long, default_value = "agentlab.toml")]
    pub config: String,

    /// Override config values using dot notation (e.g. local.gpu_layers=0)
    #[arg(long = "config-override")]
    pub config_overrides: Vec<String>,

    /// Catalog model to serve
    #[arg(long)]
    pub model: Option<String>,

    /// Interface to bind (0.0.0.0 for remote clients)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Context window in tokens
    #[arg(long)]
    pub context_window: Option<u32>,
}

impl ServeArgs {
    /// Apply the command-line flags on top of the loaded config
    pub fn apply(&self, local: &mut LocalConfig) {
        if let Some(model) = &self.model {
            local.model = model.clone();
        }
        if let Some(host) = &self.host {
            local.host = host.clone();
        }
        if let Some(port) = self.port {
            local.port = port;
        }
        if let Some(context_window) = self.context_window {
            local.context_size = context_window;
        }
    }
}
