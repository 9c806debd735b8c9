//! Component error types. Transient conditions are not modeled as errors
//! under `tokio` — they are suspension points, not failures. Only the
//! genuinely exceptional outcomes spec.md §7 names get an error type.

use thiserror::Error;

/// Raised by `ConsumerSet::attach` when the configured cap is already hit.
#[derive(Debug, Error)]
#[error("consumer set at capacity ({cap})")]
pub struct CapacityExceeded {
    pub cap: usize,
}

/// Raised by the registry when an edge or service admission would exceed
/// its configured hard cap.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("edge table at capacity ({cap})")]
    EdgeCapacityExceeded { cap: usize },
    #[error("service table at capacity ({cap})")]
    ServiceCapacityExceeded { cap: usize },
}

/// Startup failure: binding a listener. This is the only error kind that
/// propagates out of `main` and exits the process.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
