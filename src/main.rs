mod agent;
mod chat;
mod cli;
mod config;
mod engine;
mod llm;
mod mcp;
mod tool;

use clap::Parser;
use cli::{Cli, Commands};
use config::{Config, DEFAULT_CONFIG};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: i32 = 1;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for answers and the MCP transport
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli.command).await {
        error!("{:#}", e);
        std::process::exit(EXIT_FAILURE);
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Init(args) => {
            if std::path::Path::new(&args.config).exists() && !args.r#override {
                anyhow::bail!(
                    "Config file {} already exists. Use --override to replace it",
                    args.config
                );
            }
            std::fs::write(&args.config, DEFAULT_CONFIG)?;
            info!("Created config file: {}", args.config);
        }
        Commands::Ask(args) => {
            let config = Config::load(&args.llm.config, &args.llm.config_overrides)?;
            chat::ask(&config, &args.llm.api_key, &args.prompt).await?;
        }
        Commands::Chat(args) => {
            let config = Config::load(&args.llm.config, &args.llm.config_overrides)?;
            chat::chat(&config, &args.llm.api_key, args.local).await?;
        }
        Commands::Mcp(args) => {
            let config = Config::load(&args.config, &args.config_overrides)?;
            mcp::serve(tool::open_meteo::OpenMeteo::new(&config.weather)).await?;
        }
        Commands::Serve(args) => {
            let mut config = Config::load(&args.config, &args.config_overrides)?;
            args.apply(&mut config.local);
            engine::serve(&config.local).await?;
        }
        Commands::DownloadModels => {
            engine::download_models(&engine::model_cache_dir()).await?;
        }
    }
    Ok(())
}
