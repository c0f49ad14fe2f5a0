//! # Fanout Core
//!
//! Scoped channel registry and push delivery engine for real-time
//! server-to-client fan-out.
//!
//! A producer sends one message to a logical **channel**; every live
//! connection currently attached to that channel receives it. Channels are
//! bound to one of three lifetimes, a message can be addressed to a specific
//! user identity across all of its sessions, and deliveries are retried
//! against transports that refuse overlapping writes.
//!
//! ## Features
//!
//! - **Channel Registry**: scoped name registration with cross-scope
//!   uniqueness and unguessable channel identifiers
//! - **User Registry**: identity-to-connection resolution across concurrent
//!   sessions
//! - **Connection Hub**: per-channel connection buckets, broadcast delivery
//!   with bounded retry, lifecycle events
//! - **Push Facade**: one entry point for producers, with per-connection and
//!   per-identity delivery outcomes
//! - **Snapshot**: export/import of the state that survives a restart
//!
//! ## Channel Scopes
//!
//! - `global` - lives as long as the process
//! - `session` - bound to one logical client session
//! - `view` - bound to one rendered page instance
//!
//! A channel name is unique across all three scopes visible to its caller at
//! any one time; the same name re-registered by the same scope instance is a
//! no-op returning the original identifier.
//!
//! ## Example
//!
//! ```rust
//! use fanout_core::{PushContext, Scope, ScopeContext, SessionId, UserId};
//!
//! let push = PushContext::new();
//! let ctx = ScopeContext::new(SessionId::generate());
//!
//! // Register a session-scoped channel for a logged-in user.
//! let channel_id = push
//!     .register("chat", Scope::Session, Some(&UserId::from("alice")), Some(&ctx))
//!     .unwrap();
//! assert_eq!(channel_id.name(), "chat");
//!
//! // Re-registration on the next page render returns the same id.
//! let again = push
//!     .register("chat", Scope::Session, Some(&UserId::from("alice")), Some(&ctx))
//!     .unwrap();
//! assert_eq!(channel_id, again);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  PushContext                      │
//! │                                                   │
//! │  ChannelRegistry      UserRegistry                │
//! │   name+scope -> id     identity <-> token <-> id  │
//! │         │                    ▲                    │
//! │         ▼                    │                    │
//! │  ┌──────────────────────────────────────────┐    │
//! │  │             ConnectionHub                 │    │
//! │  │  channel id -> { live connections }       │    │
//! │  │  broadcast / retry / lifecycle events     │    │
//! │  └──────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Delivery never blocks the sender: `broadcast` hands back one awaitable
//! handle per connection, and contended writes retry on their own tasks.

pub mod channel;
pub mod connection;
pub mod error;
pub mod event;
pub mod hub;
pub mod push;
pub mod registry;
pub mod scope;
pub mod snapshot;
pub mod user;

// Re-export main types
pub use channel::{validate_name, ChannelId, CHANNEL_ID_SEPARATOR};
pub use connection::{
    CloseCode, Connection, ConnectionId, ConnectionState, Transport, REASON_EXPIRED,
    REASON_UNKNOWN_CHANNEL,
};
pub use error::{DeliveryError, PushError, TransportError};
pub use event::{EventBus, PushEvent, EVENT_BUS_CAPACITY};
pub use hub::{
    ConnectionHub, Delivery, DeliveryOutcome, HubConfig, HubStats, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MAX_SEND_ATTEMPTS, DEFAULT_RETRY_INTERVAL,
};
pub use push::{PushContext, SendOutcome, UserSendOutcome};
pub use registry::ChannelRegistry;
pub use scope::{Scope, ScopeContext, SessionId, ViewId};
pub use snapshot::Snapshot;
pub use user::{SessionUserToken, UserId, UserRegistry};
