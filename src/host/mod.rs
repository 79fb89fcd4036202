//! Reference native-messaging host.
//!
//! Speaks the same framed protocol the broker expects, so the broker can be
//! run end to end against `paperclip --mode host`.

pub mod analyzer;
pub mod prompt;
pub mod server;

pub use analyzer::{Analyzer, KeywordAnalyzer, OllamaAnalyzer};
pub use server::HostServer;
