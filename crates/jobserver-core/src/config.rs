//! Configuration: environment variables are the primary source (§6), with an
//! optional TOML file override for the parts that fit a static schema
//! (server bind address). Structure follows the teacher's `Config`/`ServerConfig`
//! layering — nested structs with `#[serde(default = "...")]` helpers, a
//! `load(path)` and a `from_env()` entry point.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Commands that get a real `WorkerPool` at startup, matching the Go
/// original's `cmd/server/main.go` (only `fibonacci` and `createfile` are
/// ever initialized there — every other command runs inline in the
/// dispatcher).
const STARTUP_POOLS: &[&str] = &["fibonacci", "createfile"];

/// Per-command default timeouts (ms), taken verbatim from the Go original's
/// `defaultTimeouts` table.
fn default_timeout_table() -> HashMap<String, u64> {
    [
        ("isprime", 5000),
        ("factor", 8000),
        ("pi", 15000),
        ("matrixmul", 7000),
        ("mandelbrot", 20000),
        ("fibonacci", 3000),
        ("createfile", 2000),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub jobs: JobsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to field defaults
    /// for anything the file omits.
    pub fn load(path: &str) -> Result<Self, crate::Error> {
        use crate::Error;
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file: {e}")))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables (§6). Optionally
    /// overlays a TOML file named by `JOBSERVER_CONFIG` first, then applies
    /// env vars on top — env vars always win, matching the teacher's
    /// "env var first, file as fallback" precedence.
    pub fn from_env() -> Result<Self, crate::Error> {
        let mut config = if let Ok(config_path) = std::env::var("JOBSERVER_CONFIG") {
            Self::load(&config_path)?
        } else if Path::new("./config/default.toml").exists() {
            Self::load("./config/default.toml")?
        } else {
            Self::default()
        };

        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port.parse().map_err(|_| crate::Error::config("invalid PORT"))?;
        }
        if let Ok(path) = std::env::var("JOURNAL_PATH") {
            config.jobs.journal_path = path;
        }
        if let Ok(v) = std::env::var("QUEUE_DEPTH") {
            config.jobs.queue_depth = v.parse().map_err(|_| crate::Error::config("invalid QUEUE_DEPTH"))?;
        }
        if let Ok(v) = std::env::var("MAX_TOTAL") {
            config.jobs.max_total = v.parse().map_err(|_| crate::Error::config("invalid MAX_TOTAL"))?;
        }

        for &command in STARTUP_POOLS {
            let upper = command.to_uppercase();
            if let Ok(v) = std::env::var(format!("WORKERS_{upper}")) {
                let workers = v.parse().map_err(|_| crate::Error::config(format!("invalid WORKERS_{upper}")))?;
                config.jobs.pool_workers.insert(command.to_string(), workers);
            }
            if let Ok(v) = std::env::var(format!("QUEUE_{upper}")) {
                let depth = v.parse().map_err(|_| crate::Error::config(format!("invalid QUEUE_{upper}")))?;
                config.jobs.pool_queue_depth.insert(command.to_string(), depth);
            }
        }

        for (command, _) in default_timeout_table() {
            let upper = command.to_uppercase();
            if let Ok(v) = std::env::var(format!("TIMEOUT_{upper}")) {
                let ms = v.parse().map_err(|_| crate::Error::config(format!("invalid TIMEOUT_{upper}")))?;
                config.jobs.timeouts.insert(command, ms);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;
        if self.server.port == 0 {
            return Err(Error::Config("invalid server port".to_string()));
        }
        if self.jobs.max_total == 0 {
            return Err(Error::Config("jobs.max_total must be > 0".to_string()));
        }
        Ok(())
    }

    /// Pool init list this config wants at startup: (name, workers, queue_depth).
    pub fn startup_pools(&self) -> Vec<(String, usize, usize)> {
        STARTUP_POOLS
            .iter()
            .map(|&name| {
                let workers = self.jobs.pool_workers.get(name).copied().unwrap_or(2);
                let depth = self.jobs.pool_queue_depth.get(name).copied().unwrap_or(5);
                (name.to_string(), workers, depth)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` selects `tracing_subscriber::fmt().json()`; anything else uses
    /// the human-readable formatter. Set via `LOG_FORMAT`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    #[serde(default = "default_max_total")]
    pub max_total: usize,

    #[serde(default = "default_journal_path")]
    pub journal_path: String,

    #[serde(default = "default_timeout_table")]
    pub timeouts: HashMap<String, u64>,

    #[serde(default = "default_fallback_timeout")]
    pub default_timeout_ms: u64,

    #[serde(default)]
    pub pool_workers: HashMap<String, usize>,

    #[serde(default)]
    pub pool_queue_depth: HashMap<String, usize>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            max_total: default_max_total(),
            journal_path: default_journal_path(),
            timeouts: default_timeout_table(),
            default_timeout_ms: default_fallback_timeout(),
            pool_workers: HashMap::new(),
            pool_queue_depth: HashMap::new(),
        }
    }
}

fn default_queue_depth() -> usize {
    50
}

fn default_max_total() -> usize {
    150
}

fn default_journal_path() -> String {
    "data/jobs_journal.jsonl".to_string()
}

fn default_fallback_timeout() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.jobs.max_total, 150);
    }

    #[test]
    fn test_default_timeout_table_has_fibonacci() {
        let table = default_timeout_table();
        assert_eq!(table.get("fibonacci"), Some(&3000));
        assert_eq!(table.get("mandelbrot"), Some(&20000));
    }

    #[test]
    fn test_startup_pools_defaults() {
        let config = Config::default();
        let pools = config.startup_pools();
        assert_eq!(pools.len(), 2);
        assert!(pools.iter().any(|(name, workers, depth)| name == "fibonacci" && *workers == 2 && *depth == 5));
    }

    #[test]
    fn test_invalid_max_total_rejected() {
        let mut config = Config::default();
        config.jobs.max_total = 0;
        assert!(config.validate().is_err());
    }
}
