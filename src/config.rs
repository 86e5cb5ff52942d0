//! # Broker configuration
//!
//! This module loads and parses the config used to run the service.
use crate::error::Error;
use serde::Deserialize;

/// Config
///
/// Holds the parsed configuration to start the service
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// Port to listen
    pub port: u16,
    /// List of addresses to bind
    pub bind: Vec<String>,
    /// Milliseconds between expired-key sweeps
    pub sweep_interval_ms: u64,
    /// Logging settings
    pub log: Log,
}

impl Config {
    /// Returns all addresses to bind
    pub fn get_tcp_hostnames(&self) -> Vec<String> {
        self.bind
            .iter()
            .map(|host| format!("{}:{}", host, self.port))
            .collect::<Vec<String>>()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8888,
            bind: vec!["127.0.0.1".to_owned()],
            sweep_interval_ms: 1000,
            log: Log::default(),
        }
    }
}

/// Log levels
#[derive(Deserialize, Debug, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace
    Trace,
    /// Debug
    Debug,
    /// Info
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
}

impl LogLevel {
    /// Filter string understood by the logger implementation
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

/// Logging settings
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct Log {
    /// Log level
    #[serde(rename = "loglevel")]
    pub level: LogLevel,
    /// Directory where log files are written; stderr when absent
    #[serde(rename = "logdir")]
    pub directory: Option<String>,
}

/// Loads and parses the config from a file path
pub async fn parse(path: String) -> Result<Config, Error> {
    let content = tokio::fs::read(path).await?;
    serde_json::from_slice(&content).map_err(|e| Error::Config(e.to_string()))
}
