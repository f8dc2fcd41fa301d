use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub ai: AiConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Root directory for the `local` backend.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Bucket name for the `s3` backend.
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix prepended to every path (`s3` backend).
    #[serde(default)]
    pub prefix: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_backend() -> String {
    "local".to_string()
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("./data")
}
fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            root: default_storage_root(),
            bucket: None,
            region: default_region(),
            prefix: String::new(),
            endpoint_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_fetch_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_temperature() -> f64 {
    0.1
}
fn default_ai_timeout() -> u64 {
    120
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_ai_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.storage.backend.as_str() {
        "local" => {}
        "s3" => {
            if config.storage.bucket.is_none() {
                anyhow::bail!("storage.bucket must be set when backend is 's3'");
            }
        }
        other => anyhow::bail!("Unknown storage backend: '{}'. Must be local or s3.", other),
    }

    if config.fetch.max_retries == 0 {
        anyhow::bail!("fetch.max_retries must be >= 1");
    }

    match config.ai.provider.as_str() {
        "openai" | "openrouter" => {}
        other => anyhow::bail!("Unknown AI provider: '{}'. Must be openai or openrouter.", other),
    }

    if config.ai.max_tokens == 0 {
        anyhow::bail!("ai.max_tokens must be > 0");
    }

    if !(0.0..=2.0).contains(&config.ai.temperature) {
        anyhow::bail!("ai.temperature must be in [0.0, 2.0]");
    }

    Ok(config)
}
