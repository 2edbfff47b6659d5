use crate::consts::DEFAULT_RECORDINGS_BASE;
use crate::error::AppError;
use crate::resolver::ResolutionStrategy;

use std::env;

/// Immutable process configuration, read from the environment once at
/// startup and injected everywhere else.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Bitrix inbound-webhook base: `https://<portal>/rest/<user>/<token>`.
    pub bitrix_webhook_base: String,
    /// Base URL for Uniq recording playback links.
    pub recordings_base: String,
    /// Optional JSON roster file; the built-in roster is used when unset.
    pub agents_file: Option<String>,
    pub resolution_strategy: ResolutionStrategy,
    /// When set, look for the CRM's auto-created call activity and enrich it
    /// instead of adding a second one.
    pub enrich_activity: bool,
    pub lookup_attempts: u32,
    pub lookup_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let bitrix_webhook_base = env::var("BITRIX_WEBHOOK_BASE")
            .map_err(|_| AppError::new("BITRIX_WEBHOOK_BASE not set"))?;
        let resolution_strategy = match env::var("UNIQ_RESOLUTION_STRATEGY") {
            Ok(raw) => raw
                .parse()
                .map_err(|e: AppError| AppError::with_detail("UNIQ_RESOLUTION_STRATEGY", e.into_detail()))?,
            Err(_) => ResolutionStrategy::ContactDeal,
        };
        Ok(Self {
            bind_addr: env_or("UNIQ_BIND_ADDR", "0.0.0.0:3000"),
            bitrix_webhook_base,
            recordings_base: env_or("UNIQ_RECORDINGS_BASE", DEFAULT_RECORDINGS_BASE),
            agents_file: env::var("UNIQ_AGENTS_FILE").ok(),
            resolution_strategy,
            enrich_activity: env::var("UNIQ_ENRICH_ACTIVITY")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            lookup_attempts: parse_env("UNIQ_LOOKUP_ATTEMPTS", 3)?,
            lookup_delay_ms: parse_env("UNIQ_LOOKUP_DELAY_MS", 700)?,
            request_timeout_secs: parse_env("UNIQ_REQUEST_TIMEOUT_SECS", 15)?,
        })
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            bitrix_webhook_base: "http://bitrix.local/rest/1/token".to_string(),
            recordings_base: DEFAULT_RECORDINGS_BASE.to_string(),
            agents_file: None,
            resolution_strategy: ResolutionStrategy::ContactDeal,
            enrich_activity: false,
            lookup_attempts: 3,
            lookup_delay_ms: 0,
            request_timeout_secs: 15,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::with_detail(key, format!("unparseable value: {raw}"))),
        Err(_) => Ok(default),
    }
}
