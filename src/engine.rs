use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Default catalog key for the local model server
pub const DEFAULT_MODEL: &str = "bartowski/Llama-3.2-3B-Instruct-GGUF";

/// Interval between readiness checks
const READY_POLL_INTERVAL_MS: u64 = 500;

/// Timeout of a single connection attempt
const CONNECT_TIMEOUT_MS: u64 = 1000;

const LOCAL_HOST: &str = "127.0.0.1";

const ANY_HOST: &str = "0.0.0.0";

/// API key the local server is started with
pub const LOCAL_API_KEY: &str = "local";

/// A downloadable GGUF model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub key: &'static str,
    pub repo: &'static str,
    pub filename: &'static str,
}

pub const GGUF_MODELS: &[ModelSpec] = &[
    ModelSpec {
        key: "bartowski/Llama-3.2-1B-Instruct-GGUF",
        repo: "bartowski/Llama-3.2-1B-Instruct-GGUF",
        filename: "Llama-3.2-1B-Instruct-Q4_K_M.gguf",
    },
    ModelSpec {
        key: "bartowski/Llama-3.2-3B-Instruct-GGUF",
        repo: "bartowski/Llama-3.2-3B-Instruct-GGUF",
        filename: "Llama-3.2-3B-Instruct-Q4_K_M.gguf",
    },
];

impl ModelSpec {
    pub fn lookup(key: &str) -> anyhow::Result<&'static ModelSpec> {
        GGUF_MODELS.iter().find(|m| m.key == key).ok_or_else(|| {
            let available: Vec<&str> = GGUF_MODELS.iter().map(|m| m.key).collect();
            anyhow::anyhow!(
                "Unknown model '{}'. Available models: {}",
                key,
                available.join(", ")
            )
        })
    }

    pub fn download_url(&self) -> String {
        format!(
            "https://huggingface.co/{}/resolve/main/{}",
            self.repo, self.filename
        )
    }
}

/// Directory downloaded models are cached in
pub fn model_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentlab")
        .join("models")
}

/// Download a catalog model into `cache_dir` unless it is already there, returning its path
pub async fn download_model(spec: &ModelSpec, cache_dir: &Path) -> anyhow::Result<PathBuf> {
    let path = cache_dir.join(spec.filename);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        debug!("Model '{}' already cached at {}", spec.key, path.display());
        return Ok(path);
    }

    tokio::fs::create_dir_all(cache_dir)
        .await
        .with_context(|| format!("Failed to create {}", cache_dir.display()))?;

    let url = spec.download_url();
    info!("Downloading model '{}' from {}", spec.key, url);
    let written = download_to(&url, &path)
        .await
        .with_context(|| format!("Download of '{}' failed", spec.key))?;
    info!("Model saved to {} ({} bytes)", path.display(), written);
    Ok(path)
}

/// Download through a `.part` file that is renamed into place on success and removed on failure
async fn download_to(url: &str, path: &Path) -> anyhow::Result<u64> {
    let partial = path.with_extension("gguf.part");
    match fetch_to(url, &partial).await {
        Ok(written) => {
            tokio::fs::rename(&partial, path).await?;
            Ok(written)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                debug!("Could not remove {}: {}", partial.display(), cleanup);
            }
            Err(e)
        }
    }
}

/// Stream `url` into `dest`, failing when fewer bytes arrive than announced
async fn fetch_to(url: &str, dest: &Path) -> anyhow::Result<u64> {
    let mut response = reqwest::get(url).await?.error_for_status()?;
    let total = response.content_length();

    let mut file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    if let Some(total) = total {
        if written != total {
            anyhow::bail!("truncated after {} of {} bytes", written, total);
        }
    }
    Ok(written)
}

/// Download every catalog model, failing if any of them could not be fetched
pub async fn download_models(cache_dir: &Path) -> anyhow::Result<()> {
    let mut failed = Vec::new();
    for spec in GGUF_MODELS {
        if let Err(e) = download_model(spec, cache_dir).await {
            error!("{:#}", e);
            failed.push(spec.key);
        }
    }
    info!(
        "Downloaded {} of {} models to {}",
        GGUF_MODELS.len() - failed.len(),
        GGUF_MODELS.len(),
        cache_dir.display()
    );
    if !failed.is_empty() {
        anyhow::bail!("Failed to download: {}", failed.join(", "));
    }
    Ok(())
}

/// Run the local server in the foreground until Ctrl-C
pub async fn serve(config: &crate::config::LocalConfig) -> anyhow::Result<()> {
    let server = LocalServer::start(config).await?;
    println!("OpenAI-compatible endpoint: {}", server.endpoint());
    println!("API key: {}", LOCAL_API_KEY);
    println!("Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down local LLM server");
    server.stop().await
}

/// Handle to a running local OpenAI-compatible server. The process is killed when dropped.
pub struct LocalServer {
    child: Child,
    host: String,
    port: u16,
}

impl LocalServer {
    /// Download the configured model if needed, start the server and wait until it accepts connections
    pub async fn start(config: &crate::config::LocalConfig) -> anyhow::Result<Self> {
        let spec = ModelSpec::lookup(&config.model)?;
        info!("Loading model '{}' (first run downloads ~2 GB)", spec.key);
        let model_path = download_model(spec, &model_cache_dir()).await?;

        let mut server = Self::spawn(config, &model_path)?;
        server
            .poll_ready(Duration::from_secs(config.ready_timeout_secs))
            .await?;
        info!("Model ready at {}", server.base_url());
        Ok(server)
    }

    fn spawn(config: &crate::config::LocalConfig, model_path: &Path) -> anyhow::Result<Self> {
        let args = server_args(config, model_path);
        debug!("Spawning {} {:?}", config.server_bin, args);
        let child = Command::new(&config.server_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start '{}'", config.server_bin))?;
        Ok(Self {
            child,
            host: config.host.clone(),
            port: config.port,
        })
    }

    /// Connect to the port until it accepts a connection, the process exits, or `timeout` passes
    pub async fn poll_ready(&mut self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                anyhow::bail!("Local LLM server exited unexpectedly ({})", status);
            }

            let attempt = tokio::time::timeout(
                Duration::from_millis(CONNECT_TIMEOUT_MS),
                TcpStream::connect((self.connect_host(), self.port)),
            )
            .await;
            if let Ok(Ok(_)) = attempt {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!(
                    "Local LLM server did not start within {} seconds on port {}",
                    timeout.as_secs(),
                    self.port
                );
            }
            tokio::time::sleep(Duration::from_millis(READY_POLL_INTERVAL_MS)).await;
        }
    }

    /// Host a client on this machine connects to; a wildcard bind is reached over loopback
    fn connect_host(&self) -> &str {
        if self.host == ANY_HOST { LOCAL_HOST } else { self.host.as_str() }
    }

    /// Base URL for OpenAI-compatible clients on this machine, e.g. `http://127.0.0.1:8080/v1`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/v1", self.connect_host(), self.port)
    }

    /// Base URL as bound, for clients elsewhere
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}/v1", self.host, self.port)
    }

    pub async fn stop(mut self) -> anyhow::Result<()> {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to stop local LLM server: {}", e);
            return Err(e.into());
        }
        info!("Local LLM server stopped");
        Ok(())
    }
}

fn server_args(config: &crate::config::LocalConfig, model_path: &Path) -> Vec<String> {
    vec![
        "-m".into(),
        model_path.display().to_string(),
        "--host".into(),
        config.host.clone(),
        "--port".into(),
        config.port.to_string(),
        "-c".into(),
        config.context_size.to_string(),
        "-ngl".into(),
        config.gpu_layers.to_string(),
        "--jinja".into(),
        "--api-key".into(),
        LOCAL_API_KEY.into(),
    ]
}
