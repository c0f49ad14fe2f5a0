//! Lifecycle events published for external observers.

use crate::connection::CloseCode;
use crate::user::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of the event bus. Slow observers that fall behind skip events
/// (`RecvError::Lagged`).
pub const EVENT_BUS_CAPACITY: usize = 1024;

/// A connection lifecycle event.
///
/// Observers are external collaborators (audit logging, presence tracking);
/// this crate only publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// A connection reached the open state.
    Opened {
        /// Logical channel name.
        channel: String,
        /// Identity owning the connection's channel id, when known.
        user: Option<UserId>,
    },
    /// A connection left the open state.
    Closed {
        /// Logical channel name.
        channel: String,
        /// Identity owning the connection's channel id, when known.
        user: Option<UserId>,
        /// Close code reported to or by the client.
        code: CloseCode,
    },
    /// A live registration changed hands between identities.
    IdentitySwitched {
        /// Logical channel name.
        channel: String,
        /// Identity before the switch.
        previous: Option<UserId>,
        /// Identity after the switch.
        current: Option<UserId>,
    },
}

impl PushEvent {
    /// The logical channel name the event concerns.
    pub fn channel(&self) -> &str {
        match self {
            PushEvent::Opened { channel, .. }
            | PushEvent::Closed { channel, .. }
            | PushEvent::IdentitySwitched { channel, .. } => channel,
        }
    }
}

/// Broadcast bus carrying [`PushEvent`]s to any number of observers.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<PushEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Having no observers is not an error.
    pub fn publish(&self, event: PushEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
