//! Live connections and the transport seam.

use crate::channel::ChannelId;
use crate::error::TransportError;
use crate::user::UserId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Fixed close reason used when a scope teardown force-closes connections.
pub const REASON_EXPIRED: &str = "Expired";

/// Fixed close reason used when a handshake presents an unissued channel id.
pub const REASON_UNKNOWN_CHANNEL: &str = "Unknown channel";

/// WebSocket-style close codes carried on lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseCode {
    /// Normal closure (1000).
    Normal,
    /// Endpoint going away (1001).
    GoingAway,
    /// Policy violation (1008). Used to refuse unknown channel ids.
    PolicyViolation,
    /// Abnormal closure (1006), e.g. network failure.
    Abnormal,
}

impl CloseCode {
    /// Numeric wire code.
    pub fn code(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::PolicyViolation => 1008,
            CloseCode::Abnormal => 1006,
        }
    }

    /// Map a wire code back to a known close code.
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1008 => CloseCode::PolicyViolation,
            _ => CloseCode::Abnormal,
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Server-to-client write half of one live connection.
///
/// `send_text` may fail with [`TransportError::WriteContention`] on
/// implementations that refuse a write while a previous one is in flight;
/// the delivery engine recovers with bounded retry. Everything else is
/// reported as-is.
pub trait Transport: fmt::Debug + Send + Sync + 'static {
    /// Write one text frame.
    fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Close the underlying connection.
    fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError>;
}

/// Connection lifecycle state. No transition out of `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake received, not yet admitted to a bucket.
    Pending,
    /// Live and eligible for delivery.
    Open,
    /// Gone. Terminal.
    Closed,
}

const STATE_PENDING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Unique identifier of a connection.
pub type ConnectionId = String;

/// One transport connection tagged with a single channel identifier for its
/// whole lifetime.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier.
    pub id: ConnectionId,
    channel_id: ChannelId,
    user: RwLock<Option<UserId>>,
    state: AtomicU8,
    transport: Box<dyn Transport>,
}

impl Connection {
    /// Create a connection in the pending state.
    pub(crate) fn pending(channel_id: ChannelId, transport: Box<dyn Transport>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id,
            user: RwLock::new(None),
            state: AtomicU8::new(STATE_PENDING),
            transport,
        }
    }

    /// The channel id this connection presented at handshake.
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Identity the connection was tagged with at accept time, if any.
    pub fn user(&self) -> Option<UserId> {
        self.user.read().clone()
    }

    pub(crate) fn set_user(&self, user: Option<UserId>) {
        *self.user.write() = user;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            STATE_PENDING => ConnectionState::Pending,
            STATE_OPEN => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }

    /// Whether the connection is currently open.
    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN
    }

    /// Transition `Pending -> Open`. Returns false if the connection is in
    /// any other state.
    pub(crate) fn open(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_PENDING,
                STATE_OPEN,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Transition to `Closed`. Returns true only for the caller that
    /// actually performed the transition.
    pub(crate) fn mark_closed(&self) -> bool {
        self.state.swap(STATE_CLOSED, Ordering::AcqRel) != STATE_CLOSED
    }

    /// Write one text frame, refusing when not open.
    pub(crate) fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.transport.send_text(text)
    }

    /// Close the underlying transport.
    pub(crate) fn close_transport(
        &self,
        code: CloseCode,
        reason: &str,
    ) -> Result<(), TransportError> {
        self.transport.close(code, reason)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Transport test double shared by the crate's tests.

    use super::{CloseCode, Transport};
    use crate::error::TransportError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    /// Observable side of a [`MockTransport`].
    #[derive(Debug, Default)]
    pub(crate) struct MockState {
        /// Text frames written so far.
        pub sent: Mutex<Vec<String>>,
        /// Close calls with their code and reason.
        pub closed: Mutex<Vec<(CloseCode, String)>>,
        /// How many upcoming sends fail with write contention.
        pub contend_remaining: AtomicU32,
        /// When set, every send fails with a non-retryable error.
        pub hard_fail: AtomicBool,
    }

    /// In-memory transport recording everything written to it.
    #[derive(Debug)]
    pub(crate) struct MockTransport {
        pub state: Arc<MockState>,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self {
                state: Arc::new(MockState::default()),
            }
        }

        /// Fail the next `n` sends with write contention, then succeed.
        pub(crate) fn contending(n: u32) -> Self {
            let t = Self::new();
            t.state.contend_remaining.store(n, Ordering::Relaxed);
            t
        }

        /// Fail every send with write contention.
        pub(crate) fn always_contending() -> Self {
            Self::contending(u32::MAX)
        }

        /// Fail every send with a non-retryable transport error.
        pub(crate) fn failing() -> Self {
            let t = Self::new();
            t.state.hard_fail.store(true, Ordering::Relaxed);
            t
        }

        pub(crate) fn observer(&self) -> Arc<MockState> {
            self.state.clone()
        }
    }

    impl Transport for MockTransport {
        fn send_text(&self, text: &str) -> Result<(), TransportError> {
            if self.state.hard_fail.load(Ordering::Relaxed) {
                return Err(TransportError::Io("mock transport failure".to_string()));
            }
            let remaining = self.state.contend_remaining.load(Ordering::Relaxed);
            if remaining > 0 {
                if remaining != u32::MAX {
                    self.state
                        .contend_remaining
                        .store(remaining - 1, Ordering::Relaxed);
                }
                return Err(TransportError::WriteContention);
            }
            self.state.sent.lock().push(text.to_string());
            Ok(())
        }

        fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
            self.state.closed.lock().push((code, reason.to_string()));
            Ok(())
        }
    }
}
