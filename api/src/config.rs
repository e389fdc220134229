use std::path::PathBuf;
use std::time::Duration;

use portrait_mcp_runtime::PoolOptions;
use portrait_mcp_runtime::history::RetrievalOptions;
use thiserror::Error;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_STATIC_DIR: &str = "dist";
const DEFAULT_PUBLIC_DIR: &str = "public";

const CLIENT_IDLE_SECS: u64 = 3600;
const CLIENT_IDLE_SECS_MIN: u64 = 60;
const CLIENT_IDLE_SECS_MAX: u64 = 24 * 3600;
const POOL_SWEEP_SECS: u64 = 600;
const POOL_SWEEP_SECS_MIN: u64 = 10;
const POOL_SWEEP_SECS_MAX: u64 = 3600;
const TOOL_TIMEOUT_SECS: u64 = 300;
const TOOL_TIMEOUT_SECS_MIN: u64 = 5;
const TOOL_TIMEOUT_SECS_MAX: u64 = 1800;
const TOOL_MAX_RETRIES: u32 = 3;
const TOOL_MAX_RETRIES_MAX: u32 = 10;
const DETAIL_CONCURRENCY: u64 = 4;
const DETAIL_CONCURRENCY_MAX: u64 = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is not valid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxMindCredentials {
    pub account_id: String,
    pub license_key: String,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub getgather_url: String,
    pub getgather_api_key: Option<String>,
    /// Public origin used when rewriting hosted-link URLs.
    pub app_host: Option<String>,
    /// `None` means a random per-process secret is generated.
    pub session_secret: Option<String>,
    pub maxmind: Option<MaxMindCredentials>,
    pub together_api_key: Option<String>,
    pub segment_write_key: Option<String>,
    pub port: u16,
    pub production: bool,
    pub cors_origins: Vec<String>,
    pub static_dir: PathBuf,
    pub public_dir: PathBuf,
    pub client_idle: Duration,
    pub pool_sweep: Duration,
    pub tool_timeout: Duration,
    pub tool_max_retries: u32,
    pub detail_concurrency: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let getgather_url = optional("GETGATHER_URL")
            .ok_or(ConfigError::Missing("GETGATHER_URL"))?
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&getgather_url).map_err(|e| ConfigError::Invalid {
            name: "GETGATHER_URL",
            reason: e.to_string(),
        })?;

        let maxmind = match (
            optional("MAXMIND_ACCOUNT_ID"),
            optional("MAXMIND_LICENSE_KEY"),
        ) {
            (Some(account_id), Some(license_key)) => Some(MaxMindCredentials {
                account_id,
                license_key,
            }),
            _ => None,
        };

        let port = match optional("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: "PORT",
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let production = optional("PORTRAIT_ENV")
            .or_else(|| optional("NODE_ENV"))
            .is_some_and(|env| env.eq_ignore_ascii_case("production"));

        let cors_origins = optional("PORTRAIT_CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| vec!["http://localhost:5173".to_string()]);

        Ok(Self {
            getgather_url,
            getgather_api_key: optional("GETGATHER_API_KEY"),
            app_host: optional("APP_HOST").map(|h| h.trim_end_matches('/').to_string()),
            session_secret: optional("SESSION_SECRET"),
            maxmind,
            together_api_key: optional("TOGETHER_API_KEY"),
            segment_write_key: optional("SEGMENT_WRITE_KEY"),
            port,
            production,
            cors_origins,
            static_dir: optional("PORTRAIT_STATIC_DIR")
                .unwrap_or_else(|| DEFAULT_STATIC_DIR.to_string())
                .into(),
            public_dir: optional("PORTRAIT_PUBLIC_DIR")
                .unwrap_or_else(|| DEFAULT_PUBLIC_DIR.to_string())
                .into(),
            client_idle: Duration::from_secs(parse_u64_with_bounds(
                optional("PORTRAIT_CLIENT_IDLE_SECS"),
                CLIENT_IDLE_SECS_MIN,
                CLIENT_IDLE_SECS_MAX,
                CLIENT_IDLE_SECS,
            )),
            pool_sweep: Duration::from_secs(parse_u64_with_bounds(
                optional("PORTRAIT_POOL_SWEEP_SECS"),
                POOL_SWEEP_SECS_MIN,
                POOL_SWEEP_SECS_MAX,
                POOL_SWEEP_SECS,
            )),
            tool_timeout: Duration::from_secs(parse_u64_with_bounds(
                optional("PORTRAIT_TOOL_TIMEOUT_SECS"),
                TOOL_TIMEOUT_SECS_MIN,
                TOOL_TIMEOUT_SECS_MAX,
                TOOL_TIMEOUT_SECS,
            )),
            tool_max_retries: parse_u64_with_bounds(
                optional("PORTRAIT_TOOL_MAX_RETRIES"),
                0,
                u64::from(TOOL_MAX_RETRIES_MAX),
                u64::from(TOOL_MAX_RETRIES),
            ) as u32,
            detail_concurrency: parse_u64_with_bounds(
                optional("PORTRAIT_DETAIL_CONCURRENCY"),
                1,
                DETAIL_CONCURRENCY_MAX,
                DETAIL_CONCURRENCY,
            ) as usize,
        })
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            idle_threshold: self.client_idle,
            sweep_interval: self.pool_sweep,
        }
    }

    pub fn retrieval_options(&self) -> RetrievalOptions {
        RetrievalOptions {
            max_retries: self.tool_max_retries,
            detail_concurrency: self.detail_concurrency,
        }
    }
}

/// Unparseable values fall back to the default; out-of-range values clamp.
fn parse_u64_with_bounds(raw: Option<String>, min: u64, max: u64, default: u64) -> u64 {
    match raw.and_then(|value| value.parse::<u64>().ok()) {
        Some(parsed) => parsed.clamp(min, max),
        None => default,
    }
}
