//! The outward-facing push facade.

use crate::channel::{self, ChannelId};
use crate::error::PushError;
use crate::event::{EventBus, PushEvent};
use crate::hub::{ConnectionHub, Delivery, HubConfig};
use crate::registry::ChannelRegistry;
use crate::scope::{Scope, ScopeContext, SessionId, ViewId};
use crate::snapshot::Snapshot;
use crate::user::{UserId, UserRegistry};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Result of one `send` call.
#[derive(Debug)]
pub struct SendOutcome {
    /// The channel id the name resolved to, when it resolved at all.
    pub channel: Option<ChannelId>,
    /// One handle per live connection the message was dispatched to.
    pub deliveries: Vec<Delivery>,
}

impl SendOutcome {
    fn unresolved() -> Self {
        Self {
            channel: None,
            deliveries: Vec::new(),
        }
    }

    /// Whether nothing was dispatched.
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}

/// Per-identity result of a user-targeted send.
#[derive(Debug)]
pub struct UserSendOutcome {
    /// The targeted identity.
    pub user: UserId,
    /// Handles for every connection owned by that identity, across all of
    /// its sessions.
    pub deliveries: Vec<Delivery>,
}

/// The single entry point producers use, and the explicitly constructed
/// application context owning the three registries.
///
/// Everything is owned state behind `Arc`s, wired at construction; nothing
/// here is an ambient static.
#[derive(Debug)]
pub struct PushContext {
    channels: Arc<ChannelRegistry>,
    users: Arc<UserRegistry>,
    hub: Arc<ConnectionHub>,
    events: Arc<EventBus>,
}

impl PushContext {
    /// Build a context with default hub tunables.
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Build a context with explicit hub tunables.
    pub fn with_config(config: HubConfig) -> Self {
        let events = Arc::new(EventBus::new());
        let users = Arc::new(UserRegistry::new());
        let hub = Arc::new(ConnectionHub::with_config(
            users.clone(),
            events.clone(),
            config,
        ));
        let channels = Arc::new(ChannelRegistry::new(
            users.clone(),
            hub.clone(),
            events.clone(),
        ));
        Self {
            channels,
            users,
            hub,
            events,
        }
    }

    /// Register a channel, validating the name format first.
    pub fn register(
        &self,
        name: &str,
        scope: Scope,
        user: Option<&UserId>,
        ctx: Option<&ScopeContext>,
    ) -> Result<ChannelId, PushError> {
        channel::validate_name(name)?;
        self.channels.register(name, scope, user, ctx)
    }

    /// Re-associate a registration between identities without changing its
    /// channel id.
    pub fn switch_identity(
        &self,
        name: &str,
        scope: Scope,
        old: Option<&UserId>,
        new: Option<&UserId>,
        ctx: Option<&ScopeContext>,
    ) -> Result<(), PushError> {
        channel::validate_name(name)?;
        self.channels.switch_identity(name, scope, old, new, ctx)
    }

    /// Send `payload` to every live connection of the channel `name`
    /// resolves to.
    ///
    /// Resolution walks the most specific still-active scope first: view,
    /// then session, then global. Encoding failure is reported before any
    /// delivery is attempted; a name nobody listens on is a silent no-op.
    pub fn send<T>(
        &self,
        name: &str,
        payload: &T,
        scope: Option<&ScopeContext>,
    ) -> Result<SendOutcome, PushError>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string(payload)?;
        let Some(id) = self.channels.resolve(name, scope) else {
            debug!(name, "Send resolved to no channel");
            return Ok(SendOutcome::unresolved());
        };
        let deliveries = self.hub.broadcast(&id, &text);
        Ok(SendOutcome {
            channel: Some(id),
            deliveries,
        })
    }

    /// Send `payload` to every channel id `user` currently owns under
    /// `name`, regardless of how many sessions or connections that is.
    pub fn send_to_user<T>(
        &self,
        name: &str,
        payload: &T,
        user: &UserId,
    ) -> Result<UserSendOutcome, PushError>
    where
        T: Serialize + ?Sized,
    {
        let mut outcomes = self.send_to_users(name, payload, std::slice::from_ref(user))?;
        Ok(outcomes.remove(0))
    }

    /// Send `payload` to several identities, with outcomes grouped per
    /// identity so callers can tell which recipients were reachable.
    pub fn send_to_users<T>(
        &self,
        name: &str,
        payload: &T,
        users: &[UserId],
    ) -> Result<Vec<UserSendOutcome>, PushError>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string(payload)?;
        Ok(users
            .iter()
            .map(|user| {
                let deliveries = self
                    .users
                    .resolve_channel_ids(user, name)
                    .iter()
                    .flat_map(|id| self.hub.broadcast(id, &text))
                    .collect();
                UserSendOutcome {
                    user: user.clone(),
                    deliveries,
                }
            })
            .collect())
    }

    /// Session teardown hook.
    pub fn end_session(&self, session: &SessionId) {
        self.channels.end_session(session);
    }

    /// View teardown hook.
    pub fn end_view(&self, view: &ViewId) {
        self.channels.end_view(view);
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PushEvent> {
        self.events.subscribe()
    }

    /// The connection hub, for transport adapters.
    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    /// Export the state that survives a restart.
    pub fn export_snapshot(&self) -> Snapshot {
        let (identities, user_channels) = self.users.export();
        Snapshot {
            global_channels: self.channels.export_global(),
            identities,
            user_channels,
        }
    }

    /// Restore a previously exported snapshot, re-registering every channel
    /// id with the hub so its empty bucket exists again.
    pub fn import_snapshot(&self, snapshot: Snapshot) {
        for ids in snapshot.user_channels.values().flat_map(|m| m.values()) {
            for id in ids {
                self.hub.register_channel_id(id);
            }
        }
        self.channels.import_global(snapshot.global_channels);
        self.users
            .import(snapshot.identities, snapshot.user_channels);
    }
}

impl Default for PushContext {
    fn default() -> Self {
        Self::new()
    }
}
