use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use crate::agent::{Backend, Session};
use crate::config::Config;
use crate::engine::{LOCAL_API_KEY, LocalServer};
use crate::llm::{create_provider, weather_session};

const PROMPT: &str = "\n\x1b[94m❯ \x1b[0m";

/// What the REPL does with one line of input
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Exit,
    Clear,
    Skip,
    Message(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    match line.to_lowercase().as_str() {
        "" => Command::Skip,
        "exit" | "quit" | "bye" => Command::Exit,
        "clear" => Command::Clear,
        _ => Command::Message(line),
    }
}

/// Answer a single prompt and print the reply
pub async fn ask(config: &Config, api_key: &str, prompt: &str) -> anyhow::Result<()> {
    let provider = create_provider(&config.llm, &config.llm.base_url, api_key)?;
    info!("Using {} at {}", provider.model(), provider.base_url());
    let mut session = weather_session(config, provider)?;
    let answer = session.chat(prompt).await?;
    println!("{}", answer);
    Ok(())
}

/// Interactive chat on stdin. With `local`, a model server is started first and stopped on exit.
pub async fn chat(config: &Config, api_key: &str, local: bool) -> anyhow::Result<()> {
    let server = if local {
        Some(LocalServer::start(&config.local).await?)
    } else {
        None
    };
    let (base_url, api_key) = match &server {
        Some(server) => (server.base_url(), LOCAL_API_KEY),
        None => (config.llm.base_url.clone(), api_key),
    };

    let provider = create_provider(&config.llm, &base_url, api_key)?;
    info!("Using {} at {}", provider.model(), provider.base_url());
    let mut session = weather_session(config, provider)?;
    let result = repl(&mut session, BufReader::new(tokio::io::stdin())).await;

    if let Some(server) = server {
        server.stop().await?;
    }
    result
}

/// Read lines until EOF or an exit word. A failed turn is reported and dropped from the
/// history, and the session goes on.
async fn repl<B, R>(session: &mut Session<B>, input: R) -> anyhow::Result<()>
where
    B: Backend,
    R: AsyncBufRead + Unpin,
{
    println!("Chat started. Type 'exit' to quit, 'clear' to reset the conversation.");
    let mut lines = input.lines();
    loop {
        print!("{}", PROMPT);
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match parse_command(&line) {
            Command::Exit => break,
            Command::Skip => continue,
            Command::Clear => {
                session.clear();
                println!("Conversation cleared.");
            }
            Command::Message(text) => match session.chat(text).await {
                Ok(answer) => println!("{}", answer),
                Err(e) => {
                    error!("{}", e);
                    let dropped = session.recover();
                    warn!("Discarded the failed turn ({} messages)", dropped);
                }
            },
        }
    }
    info!("Chat ended after {} messages", session.history().len());
    Ok(())
}
