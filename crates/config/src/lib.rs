//! Copyright (c) 2023 University of New Hampshire
//! SPDX-License-Identifier: MIT

use std::path::PathBuf;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

static CONFIG: Lazy<MasterConfig> = Lazy::new(|| {
    config::Config::builder()
        .add_source(config::File::with_name("master").required(false))
        .add_source(config::Environment::with_prefix("FLOWMASTER").separator("__"))
        .build()
        .expect("couldn't build configuration from sources")
        .try_deserialize()
        .expect("configuration file did not match expected shape")
});

/// Returns the process-wide configuration, parsed once on first access.
pub fn settings() -> &'static MasterConfig {
    &CONFIG
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MasterConfig {
    /// Address the inbound HTTP API binds to.
    pub bind: HostPortPair,

    /// Root directory under which each job gets its own journal directory.
    #[serde(default = "default_journal_root")]
    pub journal_root: PathBuf,

    #[serde(default)]
    pub scheduling: SchedulingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_journal_root() -> PathBuf {
    PathBuf::from("./journals")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Attempts allowed for a task before WORKER_FAILED becomes terminal.
    pub max_task_attempts: u32,

    /// Seconds of silence before a worker is probed for liveness.
    pub heartbeat_threshold_secs: u64,

    /// Period, in seconds, of the dead-worker reaper sweep.
    pub reap_period_secs: u64,

    /// Concurrent long-poll waiters allowed per job before TooManyWaiters.
    pub max_job_waiters: usize,

    /// Concurrent long-poll waiters allowed on worker-pool version changes.
    pub max_worker_pool_waiters: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            max_task_attempts: 3,
            heartbeat_threshold_secs: 30,
            reap_period_secs: 30,
            max_job_waiters: 10,
            max_worker_pool_waiters: 5,
        }
    }
}

/// `host:port`, split eagerly so callers never juggle a raw string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostPortPair {
    pub host: String,
    pub port: u16,
}

impl HostPortPair {
    pub fn to_socket_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for HostPortPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl<'de> Deserialize<'de> for HostPortPair {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| serde::de::Error::custom("expected a \"host:port\" pair"))?;

        let port: u16 = port
            .parse()
            .map_err(|_| serde::de::Error::custom("port was not a valid u16"))?;

        Ok(HostPortPair {
            host: host.to_string(),
            port,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoggingLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LoggingLevel> for LevelFilter {
    fn from(level: LoggingLevel) -> Self {
        match level {
            LoggingLevel::Trace => LevelFilter::TRACE,
            LoggingLevel::Debug => LevelFilter::DEBUG,
            LoggingLevel::Info => LevelFilter::INFO,
            LoggingLevel::Warn => LevelFilter::WARN,
            LoggingLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl<'de> Deserialize<'de> for LoggingLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "trace" => Ok(LoggingLevel::Trace),
            "debug" => Ok(LoggingLevel::Debug),
            "info" => Ok(LoggingLevel::Info),
            "warn" | "warning" => Ok(LoggingLevel::Warn),
            "error" => Ok(LoggingLevel::Error),
            other => Err(serde::de::Error::custom(format!(
                "unrecognized logging level: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LoggingLevel,
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LoggingLevel::Info,
            log_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_pair_splits_on_last_colon() {
        let pair: HostPortPair = serde_json::from_str("\"0.0.0.0:8080\"").unwrap();
        assert_eq!(pair.host, "0.0.0.0");
        assert_eq!(pair.port, 8080);
    }

    #[test]
    fn host_port_pair_rejects_missing_port() {
        let result: Result<HostPortPair, _> = serde_json::from_str("\"no-port-here\"");
        assert!(result.is_err());
    }

    #[test]
    fn logging_level_accepts_case_insensitive_names() {
        let level: LoggingLevel = serde_json::from_str("\"WARN\"").unwrap();
        assert_eq!(level, LoggingLevel::Warn);
    }
}
