//! Run configuration loaded from environment variables.

use booking::EngineConfig;
use seat_store::StoreConfig;

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Soak run configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL` — PostgreSQL connection string; the in-memory store is used when unset
/// - `DATABASE_MAX_CONNECTIONS` — pool size (default: `20`)
/// - `SOAK_RESOURCES` — resources contended for (default: `4`)
/// - `SOAK_CAPACITY` — seats per resource (default: `50`)
/// - `SOAK_WORKERS` — concurrent tasks (default: `64`)
/// - `SOAK_ROUNDS` — operations per task (default: `20`)
/// - `SOAK_REVERSE_PERCENT` — share of successful allocations reversed again (default: `30`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `text` or `json` (default: `text`)
///
/// Engine and store settings come from [`EngineConfig::from_env`] and
/// [`StoreConfig::from_env`].
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub resources: usize,
    pub capacity: i32,
    pub workers: usize,
    pub rounds: usize,
    pub reverse_percent: u32,
    pub log_level: String,
    pub log_format: LogFormat,
    pub engine: EngineConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
            resources: env_parse("SOAK_RESOURCES").unwrap_or(defaults.resources),
            capacity: env_parse("SOAK_CAPACITY").unwrap_or(defaults.capacity),
            workers: env_parse("SOAK_WORKERS").unwrap_or(defaults.workers),
            rounds: env_parse("SOAK_ROUNDS").unwrap_or(defaults.rounds),
            reverse_percent: env_parse::<u32>("SOAK_REVERSE_PERCENT")
                .map(|p| p.min(100))
                .unwrap_or(defaults.reverse_percent),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: env_parse("LOG_FORMAT").unwrap_or(defaults.log_format),
            engine: EngineConfig::from_env(),
            store: StoreConfig::from_env(),
        }
    }

    /// Total seats on offer across all resources.
    pub fn total_seats(&self) -> i64 {
        self.resources as i64 * i64::from(self.capacity)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 20,
            resources: 4,
            capacity: 50,
            workers: 64,
            rounds: 20,
            reverse_percent: 30,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            engine: EngineConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
