//! Error types for the push core.

use crate::channel::ChannelId;
use crate::scope::Scope;
use thiserror::Error;

/// Errors surfaced to registration and send callers.
#[derive(Debug, Error)]
pub enum PushError {
    /// Channel name contains characters outside the safe set.
    #[error("invalid channel name: {0}")]
    InvalidChannelName(String),

    /// Scope string or scope/identity combination is not allowed.
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// The name is already registered in a different scope.
    #[error("channel {name} is already registered in {scope} scope")]
    ChannelTaken {
        /// The requested channel name.
        name: String,
        /// The scope that currently holds the name.
        scope: Scope,
    },

    /// The name has no current registration.
    #[error("channel {0} is not registered")]
    NotRegistered(String),

    /// A connection presented a channel id that was never issued.
    #[error("unknown channel id: {0}")]
    UnknownChannel(ChannelId),

    /// Connection cap reached.
    #[error("maximum connections reached: {0}")]
    ConnectionLimit(usize),

    /// Payload could not be encoded to the wire format.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors produced by a [`Transport`](crate::connection::Transport)
/// implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A write was attempted while a previous write on the same connection
    /// had not completed. Recoverable by bounded retry.
    #[error("write already in progress")]
    WriteContention,

    /// The underlying connection is gone.
    #[error("transport closed")]
    Closed,

    /// Any other transport-level failure. Not retried.
    #[error("transport error: {0}")]
    Io(String),
}

/// Terminal failure of one delivery attempt chain.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Write contention persisted through the whole retry budget.
    #[error("write contention persisted after {attempts} attempts")]
    RetriesExhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// The connection closed before the message could be written.
    #[error("connection closed during delivery")]
    ConnectionClosed,

    /// The transport reported an error that is not retried.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The delivery task itself died.
    #[error("delivery task failed")]
    TaskFailed,
}
