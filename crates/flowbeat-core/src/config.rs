use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8750;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Background ticker cadence; 0 disables the internal ticker entirely
/// (heartbeats then come only from the HTTP endpoint).
pub const DEFAULT_TICK_SECS: u64 = 30;

/// Top-level config (flowbeat.toml + FLOWBEAT_* env overrides).
///
/// Built once in `main` and handed to the subsystems that need it — the
/// trigger/handler layer receives it at construction time rather than
/// reading mutable process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowbeatConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for FlowbeatConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduler behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between internal heartbeat ticks. 0 disables the ticker;
    /// external callers drive the scheduler through POST /heartbeat instead.
    /// Env override: FLOWBEAT_SCHEDULER__TICK_INTERVAL_SECS
    #[serde(default = "default_tick_secs")]
    pub tick_interval_secs: u64,
    /// Optional hard cap on a single flow invocation, in seconds. A run that
    /// exceeds it is marked failed with a timeout error. Absent = unlimited.
    #[serde(default)]
    pub invocation_timeout_secs: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_secs(),
            invocation_timeout_secs: None,
        }
    }
}

impl FlowbeatConfig {
    /// Load config from a TOML file with FLOWBEAT_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.flowbeat/flowbeat.toml
    ///
    /// Env keys use `__` as the section separator so multi-word field names
    /// survive: FLOWBEAT_SERVER__PORT, FLOWBEAT_SCHEDULER__TICK_INTERVAL_SECS.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: FlowbeatConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("FLOWBEAT_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.flowbeat/flowbeat.toml", home)
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.flowbeat/flowbeat.db", home)
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let cfg = FlowbeatConfig::default();
        assert_eq!(cfg.server.bind, DEFAULT_BIND);
        assert_eq!(cfg.server.port, DEFAULT_PORT);
        assert_eq!(cfg.scheduler.tick_interval_secs, DEFAULT_TICK_SECS);
        assert!(cfg.scheduler.invocation_timeout_secs.is_none());
        assert!(cfg.database.path.ends_with("flowbeat.db"));
    }

    #[test]
    fn partial_toml_fills_missing_sections() {
        let cfg: FlowbeatConfig = Figment::new()
            .merge(Toml::string("[server]\nport = 9000\n"))
            .extract()
            .unwrap();
        assert_eq!(cfg.server.port, 9000);
        // untouched sections fall back to defaults
        assert_eq!(cfg.server.bind, DEFAULT_BIND);
        assert_eq!(cfg.scheduler.tick_interval_secs, DEFAULT_TICK_SECS);
    }

    #[test]
    fn scheduler_timeout_parses() {
        let cfg: FlowbeatConfig = Figment::new()
            .merge(Toml::string(
                "[scheduler]\ntick_interval_secs = 5\ninvocation_timeout_secs = 120\n",
            ))
            .extract()
            .unwrap();
        assert_eq!(cfg.scheduler.tick_interval_secs, 5);
        assert_eq!(cfg.scheduler.invocation_timeout_secs, Some(120));
    }
}
