use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::poller::PollingConfig;

pub const DEFAULT_WEB3FORMS_URL: &str = "https://api.web3forms.com/submit";

/// Client configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_token: String,
    pub web3forms_url: String,
    /// Optional: contact submissions fail with a configuration error when unset.
    pub web3forms_key: Option<String>,
    pub polling: PollingConfig,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = PollingConfig::default();

        Ok(Config {
            api_url: normalize_base_url(&require_env("RESUMEMIND_API_URL")?),
            api_token: require_env("RESUMEMIND_API_TOKEN")?,
            web3forms_url: std::env::var("WEB3FORMS_URL")
                .unwrap_or_else(|_| DEFAULT_WEB3FORMS_URL.to_string()),
            web3forms_key: std::env::var("WEB3FORMS_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            polling: PollingConfig {
                initial_interval: duration_env("POLL_INITIAL_INTERVAL_MS", defaults.initial_interval)?,
                backoff_interval: duration_env("POLL_BACKOFF_INTERVAL_MS", defaults.backoff_interval)?,
                backoff_after: duration_env("POLL_BACKOFF_AFTER_MS", defaults.backoff_after)?,
                max_duration: duration_env("POLL_MAX_DURATION_MS", defaults.max_duration)?,
                enabled: true,
            },
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Upper bound for any polling setting read from the environment.
const MAX_DURATION_SETTING: Duration = Duration::from_secs(24 * 60 * 60);

fn duration_env(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(raw) => parse_duration_ms(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_duration_ms(key: &str, raw: &str) -> Result<Duration> {
    let ms = raw
        .trim()
        .parse::<u64>()
        .with_context(|| format!("{key} must be a number of milliseconds"))?;
    let duration = Duration::from_millis(ms);
    if duration.is_zero() || duration > MAX_DURATION_SETTING {
        bail!(
            "{key} must be between 1 and {} milliseconds, got {ms}",
            MAX_DURATION_SETTING.as_millis()
        );
    }
    Ok(duration)
}

/// Strips a single trailing slash so paths can always start with `/`.
pub fn normalize_base_url(url: &str) -> String {
    url.trim().strip_suffix('/').unwrap_or(url.trim()).to_string()
}
