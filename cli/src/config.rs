use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;

use nourish_core::queue::DEFAULT_DRAIN_INTERVAL;

pub const DEFAULT_AI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_AI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_PING_TABLE: &str = "profiles";

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub url: String,
    pub api_key: String,
    pub ping_table: String,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub remote: Option<RemoteConfig>,
    pub ai: Option<AiConfig>,
    pub drain_interval: Duration,
    pub max_attempts: Option<u32>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let data_dir = match std::env::var("NOURISH_DATA_DIR") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => ProjectDirs::from("", "", "nourish")
                .context("Could not determine home directory")?
                .data_dir()
                .to_path_buf(),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Self::from_lookup(data_dir, |key| std::env::var(key).ok())
    }

    /// Build the configuration from a variable lookup (the process environment in practice).
    pub fn from_lookup(data_dir: PathBuf, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let remote = match (var("NOURISH_REMOTE_URL"), var("NOURISH_REMOTE_KEY")) {
            (Some(url), Some(api_key)) => Some(RemoteConfig {
                url: url.trim_end_matches('/').to_string(),
                api_key,
                ping_table: var("NOURISH_PING_TABLE")
                    .unwrap_or_else(|| DEFAULT_PING_TABLE.to_string()),
            }),
            (Some(_), None) => anyhow::bail!("NOURISH_REMOTE_URL is set but NOURISH_REMOTE_KEY is missing"),
            _ => None,
        };

        let ai = var("NOURISH_AI_API_KEY").map(|api_key| AiConfig {
            base_url: var("NOURISH_AI_URL")
                .unwrap_or_else(|| DEFAULT_AI_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: var("NOURISH_AI_MODEL").unwrap_or_else(|| DEFAULT_AI_MODEL.to_string()),
            api_key,
        });

        let drain_interval = match var("NOURISH_DRAIN_INTERVAL_SECS") {
            Some(secs) => {
                let secs: u64 = secs
                    .parse()
                    .with_context(|| format!("Invalid NOURISH_DRAIN_INTERVAL_SECS: '{secs}'"))?;
                if secs == 0 {
                    anyhow::bail!("NOURISH_DRAIN_INTERVAL_SECS must be greater than 0");
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_DRAIN_INTERVAL,
        };

        let max_attempts = var("NOURISH_MAX_ATTEMPTS")
            .map(|n| {
                n.parse::<u32>()
                    .with_context(|| format!("Invalid NOURISH_MAX_ATTEMPTS: '{n}'"))
            })
            .transpose()?
            .filter(|&n| n > 0);

        Ok(Config {
            db_path: data_dir.join("nourish.db"),
            data_dir,
            remote,
            ai,
            drain_interval,
            max_attempts,
        })
    }
}
