//! Error types for wireprofile.

use thiserror::Error;

/// Main error type for profile aggregation and record output.
#[derive(Error, Debug)]
pub enum Error {
    /// Incompatible or invalid writer options, or a header ordering violation.
    #[error("configuration error: {0}")]
    Config(String),

    /// A record could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The terminal sink rejected the write.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// I/O failure on the file sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The writer was already closed.
    #[error("writer is closed")]
    Closed,

    /// Writing a profile failed during the final flush. Profiles still held in
    /// the store have not been persisted.
    #[error("final flush failed for profile {address}: {source}")]
    Flush {
        address: String,
        #[source]
        source: Box<Error>,
    },
}

/// Errors raised by a [`ChannelSink`](crate::writer::ChannelSink).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink was closed before or while the record was being enqueued.
    #[error("channel sink is closed")]
    Closed,
}

/// Failure of a collaborator lookup. Never surfaced past the merge step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{resolver}: {reason}")]
pub struct ResolveError {
    pub resolver: &'static str,
    pub reason: String,
}

impl ResolveError {
    pub fn new(resolver: &'static str, reason: impl Into<String>) -> Self {
        Self {
            resolver,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
