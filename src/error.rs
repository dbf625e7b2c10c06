//! Error taxonomy.
//!
//! Transport faults carry a `retryable` flag so the controller's backoff
//! loop can distinguish transient failures (timeouts, 5xx, connection
//! resets) from fatal ones without re-parsing messages. Index skew is its
//! own variant because it is always recovered locally via resync.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure.
    #[error("transport error: {message}")]
    Transport { message: String, retryable: bool },

    /// The server reported `"Expected person X, got Y"`; recovered via
    /// resync, never fatal.
    #[error("server expected person {expected}, got {submitted}")]
    IndexSkew { expected: u64, submitted: u64 },

    /// Malformed or undecodable server response.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The server declared the game failed.
    #[error("game failed: {0}")]
    Game(String),

    /// Local feasibility was already broken before any decision; under the
    /// reserve rule this is a programming error.
    #[error("quota shortfall {slack} exceeds remaining capacity {remaining}")]
    Infeasible { slack: u64, remaining: u64 },

    /// An accept would push `admitted` past capacity; programming error.
    #[error("accept would exceed capacity {capacity}")]
    CapacityOverflow { capacity: u64 },

    /// Without a durable log, resume is compromised; fatal.
    #[error("event log write failed: {0}")]
    LogWrite(#[source] std::io::Error),

    #[error("event log read failed: {0}")]
    LogRead(#[source] std::io::Error),

    #[error("event log line did not encode: {0}")]
    LogFormat(#[source] serde_json::Error),

    /// A resume request could not be satisfied from the given log.
    #[error("cannot resume: {0}")]
    Resume(String),
}

impl Error {
    /// Whether the controller should retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport { retryable: true, .. })
    }
}
