//! Configuration file handling.
//!
//! Settings come from `.paperclip.toml` (or `--config FILE`) and are then
//! overridden by explicit command-line flags.

use crate::broker::BrokerSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = ".paperclip.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Broker settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Reference host settings.
    #[serde(default)]
    pub host: HostConfig,

    /// Rollback history settings.
    #[serde(default)]
    pub history: HistoryConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// Broker timing and host launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Host executable. Defaults to this binary in host mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_command: Option<PathBuf>,

    /// Arguments passed to the host executable.
    #[serde(default = "default_host_args")]
    pub host_args: Vec<String>,

    /// How long one request may wait for a host reply.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Interval between heartbeat pings.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Delay before reconnecting to the host.
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host_command: None,
            host_args: default_host_args(),
            request_timeout_secs: default_request_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            reconnect_backoff_ms: default_reconnect_backoff(),
        }
    }
}

fn default_host_args() -> Vec<String> {
    vec!["--mode".to_string(), "host".to_string()]
}

fn default_request_timeout() -> u64 {
    8
}

fn default_heartbeat_interval() -> u64 {
    20
}

fn default_reconnect_backoff() -> u64 {
    1000
}

/// Which analyzer the reference host runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    /// Offline word-list check
    #[default]
    Keyword,
    /// Local Ollama model
    Ollama,
}

/// Reference host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Analyzer backing `analyze` requests.
    #[serde(default)]
    pub analyzer: AnalyzerKind,

    /// Emit `diag` frames around each request.
    #[serde(default = "default_true")]
    pub emit_diag: bool,

    /// Ollama settings, used when `analyzer = "ollama"`.
    #[serde(default)]
    pub ollama: OllamaConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerKind::default(),
            emit_diag: true,
            ollama: OllamaConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Ollama model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub url: String,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_ollama_timeout")]
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_seconds: default_ollama_timeout(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_ollama_timeout() -> u64 {
    60
}

/// Rollback history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Entries kept per UI context.
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

fn default_history_capacity() -> usize {
    crate::history::DEFAULT_HISTORY_CAPACITY
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Reject settings the broker cannot run with.
    pub fn validate(&self) -> Result<()> {
        let broker = &self.broker;
        if broker.request_timeout_secs == 0 {
            anyhow::bail!("broker.request_timeout_secs must be at least 1");
        }
        if broker.heartbeat_interval_secs == 0 {
            anyhow::bail!("broker.heartbeat_interval_secs must be at least 1");
        }
        if broker.reconnect_backoff_ms == 0 {
            anyhow::bail!("broker.reconnect_backoff_ms must be at least 1");
        }
        if self.history.capacity == 0 {
            anyhow::bail!("history.capacity must be at least 1");
        }
        Ok(())
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.paperclip.toml` from `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(DEFAULT_CONFIG_FILE);

        if path.exists() {
            Ok(Some(Self::load(&path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// Only values given explicitly on the command line (or via their
    /// environment variables) override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref command) = args.host_command {
            self.broker.host_command = Some(command.clone());
        }
        if let Some(timeout) = args.timeout {
            self.broker.request_timeout_secs = timeout;
        }

        if let Some(analyzer) = args.analyzer {
            self.host.analyzer = analyzer;
        }
        if args.no_diag {
            self.host.emit_diag = false;
        }
        if let Some(ref url) = args.ollama_url {
            self.host.ollama.url = url.clone();
        }
        if let Some(ref model) = args.model {
            self.host.ollama.model = model.clone();
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Broker timings as durations.
    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            request_timeout: Duration::from_secs(self.broker.request_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.broker.heartbeat_interval_secs),
            reconnect_backoff: Duration::from_millis(self.broker.reconnect_backoff_ms),
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
