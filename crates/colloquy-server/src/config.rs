use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::rate_limit::RateLimitConfig;

/// Server configuration, loaded from environment variables.
///
/// Required:
/// - `CQ_JWT_SECRET` - HS256 secret used to verify bearer tokens
/// - `OPENAI_API_KEY` - key for the upstream language model API
///
/// Rate limiting (both limiters share one window length):
/// - `CQ_CHAT_RATE_LIMIT` (default: 50) - requests per window on chat routes
/// - `CQ_API_RATE_LIMIT` (default: 100) - requests per window on other routes
/// - `CQ_RATE_LIMIT_WINDOW_MS` (default: 900000)
/// - `CQ_RATE_LIMIT_SWEEP_SECS` (default: 60) - how often expired windows are dropped
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub jwt_secret: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub chat_rate_limit: RateLimitConfig,
    pub api_rate_limit: RateLimitConfig,
    pub sweep_interval: Duration,
    /// Allowed CORS origins (comma-separated). If empty, defaults to restrictive.
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    pub fn load() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| format!("{key} environment variable is required"))
        };

        let jwt_secret = require("CQ_JWT_SECRET")?;
        let openai_api_key = require("OPENAI_API_KEY")?;

        let host: IpAddr = parse_or(&lookup, "CQ_HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .map_err(|_| "CQ_HOST must be a valid IP address".to_string())?;
        let port: u16 = parse_or(&lookup, "CQ_PORT", 8080)
            .map_err(|_| "CQ_PORT must be a valid port number".to_string())?;

        let chat_max: u64 = parse_or(
            &lookup,
            "CQ_CHAT_RATE_LIMIT",
            RateLimitConfig::chat().max_requests,
        )
            .map_err(|_| "CQ_CHAT_RATE_LIMIT must be a number".to_string())?;
        let api_max: u64 = parse_or(
            &lookup,
            "CQ_API_RATE_LIMIT",
            RateLimitConfig::api().max_requests,
        )
            .map_err(|_| "CQ_API_RATE_LIMIT must be a number".to_string())?;
        let default_window_ms =
            u64::try_from(RateLimitConfig::DEFAULT_WINDOW.as_millis()).unwrap_or(u64::MAX);
        let window_ms: u64 = parse_or(&lookup, "CQ_RATE_LIMIT_WINDOW_MS", default_window_ms)
            .map_err(|_| "CQ_RATE_LIMIT_WINDOW_MS must be a number".to_string())?;
        let sweep_secs: u64 = parse_or(&lookup, "CQ_RATE_LIMIT_SWEEP_SECS", 60)
            .map_err(|_| "CQ_RATE_LIMIT_SWEEP_SECS must be a number".to_string())?;

        if window_ms == 0 {
            return Err("CQ_RATE_LIMIT_WINDOW_MS must be greater than zero".to_string());
        }
        if sweep_secs == 0 {
            return Err("CQ_RATE_LIMIT_SWEEP_SECS must be greater than zero".to_string());
        }

        let window = Duration::from_millis(window_ms);

        let cors_origins: Vec<String> = lookup("CQ_CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host,
            port,
            jwt_secret,
            openai_api_key,
            openai_base_url: lookup("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            openai_model: lookup("OPENAI_MODEL")
                .unwrap_or_else(|| colloquy_common::models::DEFAULT_MODEL.to_string()),
            chat_rate_limit: RateLimitConfig {
                max_requests: chat_max,
                window,
            },
            api_rate_limit: RateLimitConfig {
                max_requests: api_max,
                window,
            },
            sweep_interval: Duration::from_secs(sweep_secs),
            cors_origins,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, T::Err> {
    match lookup(key) {
        Some(raw) => raw.trim().parse(),
        None => Ok(default),
    }
}
