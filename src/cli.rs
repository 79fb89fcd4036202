//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::AnalyzerKind;
use clap::Parser;
use std::path::PathBuf;

/// PaperClip - tone analysis broker and native-messaging host
///
/// In broker mode (the default) UI requests arrive as JSON lines on stdin
/// and replies leave as JSON lines on stdout. Analysis requests are sent one
/// at a time to a host process speaking the native-messaging protocol.
///
/// In host mode the process is itself a native-messaging host.
///
/// Examples:
///   paperclip
///   paperclip --host-command ./my-host --timeout 15
///   paperclip --mode host --analyzer ollama --model llama3.2:latest
///   paperclip --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Run as the broker or as the native-messaging host
    #[arg(long, value_enum, default_value = "broker")]
    pub mode: Mode,

    /// Path to configuration file
    ///
    /// If not specified, looks for .paperclip.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Host executable the broker spawns
    ///
    /// Defaults to this binary started with `--mode host`.
    #[arg(long, value_name = "PATH")]
    pub host_command: Option<PathBuf>,

    /// Request timeout in seconds
    ///
    /// How long one analysis may wait for the host before the requesting
    /// context gets a timeout error. Default: from config or 8s.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Analyzer used in host mode
    #[arg(long, value_enum, value_name = "KIND")]
    pub analyzer: Option<AnalyzerKind>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Ollama model to use in host mode
    #[arg(short, long, env = "PAPERCLIP_MODEL")]
    pub model: Option<String>,

    /// Do not emit diagnostic frames in host mode
    #[arg(long)]
    pub no_diag: bool,

    /// Generate a default .paperclip.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Arguments passed by the browser (caller origin, window handle)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    pub origin: Vec<String>,
}

/// Process role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    /// Single-flight request broker (default)
    #[default]
    Broker,
    /// Native-messaging host
    Host,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.mode == Mode::Host && self.host_command.is_some() {
            return Err("--host-command only applies in broker mode".to_string());
        }

        if let Some(ref command) = self.host_command {
            if command.as_os_str().is_empty() {
                return Err("Host command must not be empty".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
