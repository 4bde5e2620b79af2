//! Error taxonomy shared by every layer of the node.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Static configuration is unusable (bad key encoding, empty ids, ...)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connect, subscribe or publish was rejected by the transport
    #[error("transport {op} failed: {reason}")]
    Transport { op: &'static str, reason: String },

    /// A reply arrived but did not have the expected shape
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The service answered with a status code we do not handle
    #[error("unexpected status {status} during {stage}")]
    UnexpectedStatus { stage: &'static str, status: u16 },

    /// No reply within the bounded wait
    #[error("timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: &'static str, waited_ms: u64 },

    /// Sensor reading cannot be reported
    #[error("invalid reading: {0}")]
    Validation(&'static str),
}

impl Error {
    pub fn transport(op: &'static str, reason: impl core::fmt::Display) -> Self {
        Self::Transport {
            op,
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same operation without new input can succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Configuration(_) | Self::Validation(_))
    }
}
