//! Request broker between UI contexts and the native host.
//!
//! `engine` holds the single-flight state machine, `router` handles UI
//! requests, and `runtime` drives both on tokio.

pub mod engine;
pub mod router;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::BrokerSettings;
pub use runtime::{BrokerRuntime, HostCommand};
