use std::time::Duration;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub audience: String,
    pub issuer: Option<String>,
}

/// Timing and sizing knobs of every dashboard session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub fetch_timeout: Duration,
    pub periodic_interval: Duration,
    pub focus_debounce: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub analysis_window: i64,
    pub long_poll: Duration,
    /// Sessions not touched by any request for this long are torn down.
    pub session_idle: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_millis(8_000),
            periodic_interval: Duration::from_millis(10_000),
            focus_debounce: Duration::from_millis(500),
            backoff_base: Duration::from_millis(10_000),
            backoff_max: Duration::from_millis(300_000),
            analysis_window: 10,
            long_poll: Duration::from_millis(25_000),
            session_idle: Duration::from_millis(90_000),
        }
    }
}

impl SyncConfig {
    fn from_env() -> Self {
        let d = Self::default();
        Self {
            fetch_timeout: env_millis("SYNC_FETCH_TIMEOUT_MS").unwrap_or(d.fetch_timeout),
            periodic_interval: env_millis("SYNC_PERIODIC_INTERVAL_MS")
                .unwrap_or(d.periodic_interval),
            focus_debounce: env_millis("SYNC_FOCUS_DEBOUNCE_MS").unwrap_or(d.focus_debounce),
            backoff_base: env_millis("SYNC_BACKOFF_BASE_MS").unwrap_or(d.backoff_base),
            backoff_max: env_millis("SYNC_BACKOFF_MAX_MS").unwrap_or(d.backoff_max),
            analysis_window: std::env::var("SYNC_ANALYSIS_WINDOW")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(d.analysis_window),
            long_poll: env_millis("SYNC_LONG_POLL_MS").unwrap_or(d.long_poll),
            session_idle: env_millis("SYNC_SESSION_IDLE_MS").unwrap_or(d.session_idle),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt: JwtConfig,
    pub sync: SyncConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let database_max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?,
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "authenticated".into()),
            issuer: std::env::var("JWT_ISSUER").ok().filter(|s| !s.is_empty()),
        };
        Ok(Self {
            database_url,
            database_max_connections,
            jwt,
            sync: SyncConfig::from_env(),
        })
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}
