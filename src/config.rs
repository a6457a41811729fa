//! Immutable startup configuration. Loaded once in `main`, then handed by
//! value to every component's constructor — there is no `Config::instance()`
//! singleton anywhere in this crate.

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rating: RatingConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub bot: BotConfig,
    pub identity: IdentityConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatingConfig {
    pub k_factor: i32,
    pub initial_rating: i32,
    pub max_rating: i32,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            k_factor: 32,
            initial_rating: 1500,
            max_rating: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_min_pool")]
    pub min_pool: u32,
    #[serde(default = "default_max_pool")]
    pub max_pool: u32,
    #[serde(default = "default_query_timeout_ms", with = "duration_millis")]
    pub query_timeout: Duration,
}

fn default_min_pool() -> u32 {
    1
}
fn default_max_pool() -> u32 {
    10
}
fn default_query_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    Polling,
    Webhook,
}

impl Default for BotMode {
    fn default() -> Self {
        BotMode::Polling
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub mode: BotMode,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,
    pub webhook_secret: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            mode: BotMode::Polling,
            webhook_path: default_webhook_path(),
            webhook_port: default_webhook_port(),
            webhook_secret: None,
        }
    }
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}
fn default_webhook_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub base_url: String,
    pub client_id: String,
    /// Name of the environment variable holding `username:password`
    /// credentials for the password grant. Never the credentials
    /// themselves — config files and env dumps must not carry secrets.
    pub credentials_env: String,
    #[serde(default = "default_identity_timeout_ms", with = "duration_millis")]
    pub timeout: Duration,
    #[serde(default = "default_success_ttl_secs")]
    pub success_ttl_secs: u64,
    #[serde(default = "default_failure_ttl_secs")]
    pub failure_ttl_secs: u64,
}

fn default_identity_timeout_ms() -> u64 {
    10_000
}
fn default_success_ttl_secs() -> u64 {
    24 * 3600
}
fn default_failure_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TopicsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms", with = "duration_millis")]
    pub initial_delay: Duration,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: Duration::from_millis(default_initial_delay_ms()),
            multiplier: default_multiplier(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    100
}
fn default_multiplier() -> f64 {
    2.0
}

mod duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Config {
    /// Loads configuration the way `main` does at startup: environment
    /// variables first (after `dotenvy::dotenv()` has populated them from a
    /// local `.env` if present), then an optional TOML file overlay passed
    /// via `--config`.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment_json = serde_json::json!({
            "database": {
                "url": env_var("DATABASE_URL")?,
            },
            "identity": {
                "base_url": env_var("IDENTITY_BASE_URL")?,
                "client_id": env_var("IDENTITY_CLIENT_ID")?,
                "credentials_env": std::env::var("IDENTITY_CREDENTIALS_ENV")
                    .unwrap_or_else(|_| "IDENTITY_CREDENTIALS".to_string()),
            },
        });

        if let Some(path) = config_path {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            let overlay: toml::Value = toml::from_str(&text)
                .with_context(|| format!("failed to parse config file {path}"))?;
            let overlay: serde_json::Value =
                serde_json::to_value(overlay).context("config overlay is not representable as JSON")?;
            merge_json(&mut figment_json, overlay);
        }

        let config: Config = serde_json::from_value(figment_json)
            .context("failed to parse configuration")?;
        Ok(config)
    }
}

fn env_var(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("missing required environment variable {name}"))
}

fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                merge_json(base_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}
