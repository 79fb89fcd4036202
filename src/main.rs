//! PaperClip - single-flight tone analysis broker
//!
//! Brokers analysis requests from UI contexts to a native-messaging host,
//! one request at a time, and ships a reference host implementation.
//!
//! Exit codes:
//!   0 - Clean shutdown (input closed or interrupted)
//!   1 - Runtime error (bad arguments, config, I/O failure)

mod broker;
mod cli;
mod codec;
mod config;
mod error;
mod history;
mod host;
mod models;

use anyhow::{Context, Result};
use broker::{BrokerRuntime, HostCommand};
use cli::{Args, Mode};
use config::{AnalyzerKind, Config, DEFAULT_CONFIG_FILE};
use host::{Analyzer, HostServer, KeywordAnalyzer, OllamaAnalyzer};
use std::path::Path;
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    init_logging(&args, &config);

    info!("PaperClip v{} ({:?} mode)", env!("CARGO_PKG_VERSION"), args.mode);
    debug!("Arguments: {:?}", args);
    if !args.origin.is_empty() {
        debug!("Started by {}", args.origin.join(" "));
    }

    let result = match args.mode {
        Mode::Broker => run_broker(&config).await,
        Mode::Host => run_host(&config).await,
    };

    // Exit explicitly: a blocking stdin read may still be parked on the
    // runtime's blocking pool after an interrupt.
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .paperclip.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!("{} already exists. Remove it first or edit it manually.", DEFAULT_CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    eprintln!("Created {} with default settings.", DEFAULT_CONFIG_FILE);
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// Logs go to stderr; stdout carries protocol traffic in both modes.
fn init_logging(args: &Args, config: &Config) {
    let level = if !args.quiet && config.general.verbose {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("Warning: ignoring {}: {:#}", DEFAULT_CONFIG_FILE, e);
            Ok(Config::default())
        }
    }
}

/// Broker mode: JSON lines on stdin/stdout, host as a child process.
async fn run_broker(config: &Config) -> Result<()> {
    let program = match config.broker.host_command.clone() {
        Some(path) => path,
        None => std::env::current_exe().context("Failed to locate the paperclip executable")?,
    };
    let host = HostCommand {
        program,
        args: config.broker.host_args.clone(),
    };

    let settings = config.broker_settings();
    info!(
        "Host: {} {} (timeout {}s, heartbeat {}s)",
        host.program.display(),
        host.args.join(" "),
        settings.request_timeout.as_secs(),
        settings.heartbeat_interval.as_secs()
    );

    let runtime = BrokerRuntime {
        settings,
        host,
        history_capacity: config.history.capacity,
    };
    runtime
        .run(tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("Broker stopped with an error")
}

/// Host mode: native-messaging frames on stdin/stdout.
async fn run_host(config: &Config) -> Result<()> {
    let analyzer: Box<dyn Analyzer> = match config.host.analyzer {
        AnalyzerKind::Keyword => Box::new(KeywordAnalyzer),
        AnalyzerKind::Ollama => Box::new(OllamaAnalyzer::new(config.host.ollama.clone())?),
    };

    let server = HostServer::new(analyzer, config.host.emit_diag);
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    server.serve(&mut stdin, &mut stdout).await
}
