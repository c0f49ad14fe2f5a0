//! User identity bookkeeping.
//!
//! Lets a producer address "every channel currently owned by user U under
//! name C" without knowing how many live sessions or connections U holds.

use crate::channel::ChannelId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Application-supplied identity of "who" owns a channel registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap an application identity value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// String form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Per-session random token binding one identity to one session.
///
/// Decouples the long-lived identity structures from the originating session
/// object, so identity resolution stays usable from background delivery
/// threads after the session context is no longer active.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionUserToken(String);

impl SessionUserToken {
    /// Generate a fresh token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// String form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionUserToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default)]
struct UserState {
    /// Identity -> session tokens of its concurrent logins.
    users: HashMap<UserId, HashSet<SessionUserToken>>,
    /// Session token -> channel ids owned per logical channel name.
    user_channels: HashMap<SessionUserToken, HashMap<String, HashSet<ChannelId>>>,
}

/// Registry of identity <-> session-token <-> channel-id associations.
///
/// All compound updates happen under a single write lock, so two threads
/// racing to register the same identity never lose an entry.
#[derive(Debug, Default)]
pub struct UserRegistry {
    state: RwLock<UserState>,
}

impl UserRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `token` belongs to `user`. Idempotent; an identity may
    /// hold many tokens at once.
    pub fn register_session_identity(&self, user: &UserId, token: &SessionUserToken) {
        let mut state = self.state.write();
        let fresh = state
            .users
            .entry(user.clone())
            .or_default()
            .insert(token.clone());
        if fresh {
            debug!(user = %user, "Session identity registered");
        }
    }

    /// Record that `token`'s identity owns `id` under logical name `name`.
    pub fn associate_channel(&self, token: &SessionUserToken, name: &str, id: ChannelId) {
        let mut state = self.state.write();
        state
            .user_channels
            .entry(token.clone())
            .or_default()
            .entry(name.to_string())
            .or_default()
            .insert(id);
    }

    /// Drop a single channel association from `token`.
    pub fn dissociate_channel(&self, token: &SessionUserToken, name: &str, id: &ChannelId) {
        let mut state = self.state.write();
        if let Some(channels) = state.user_channels.get_mut(token) {
            if let Some(ids) = channels.get_mut(name) {
                ids.remove(id);
                if ids.is_empty() {
                    channels.remove(name);
                }
            }
        }
    }

    /// Every channel id `user` currently owns under `name`, aggregated
    /// across all of the identity's session tokens.
    pub fn resolve_channel_ids(&self, user: &UserId, name: &str) -> HashSet<ChannelId> {
        let state = self.state.read();
        let mut out = HashSet::new();
        if let Some(tokens) = state.users.get(user) {
            for token in tokens {
                if let Some(ids) = state
                    .user_channels
                    .get(token)
                    .and_then(|channels| channels.get(name))
                {
                    out.extend(ids.iter().cloned());
                }
            }
        }
        out
    }

    /// Reverse lookup: which identity owns `id` under `name`.
    ///
    /// Linear scan over identities; the number of concurrently distinct
    /// identities in one process stays small relative to request rate.
    pub fn resolve_identity(&self, name: &str, id: &ChannelId) -> Option<UserId> {
        let state = self.state.read();
        for (user, tokens) in &state.users {
            for token in tokens {
                let owned = state
                    .user_channels
                    .get(token)
                    .and_then(|channels| channels.get(name))
                    .is_some_and(|ids| ids.contains(id));
                if owned {
                    return Some(user.clone());
                }
            }
        }
        None
    }

    /// Remove `token` from `user`; removes the identity itself when its
    /// token set empties. Channel associations keyed by this exact token are
    /// dropped with it; other sessions of the same identity keep theirs.
    pub fn deregister_session_identity(&self, user: &UserId, token: &SessionUserToken) {
        let mut state = self.state.write();
        if let Some(tokens) = state.users.get_mut(user) {
            tokens.remove(token);
            if tokens.is_empty() {
                state.users.remove(user);
                debug!(user = %user, "Identity removed, no sessions left");
            }
        }
        state.user_channels.remove(token);
    }

    /// Number of distinct identities currently known.
    pub fn identity_count(&self) -> usize {
        self.state.read().users.len()
    }

    /// Dump the full association state for the restart snapshot.
    pub(crate) fn export(
        &self,
    ) -> (
        HashMap<UserId, HashSet<SessionUserToken>>,
        HashMap<SessionUserToken, HashMap<String, HashSet<ChannelId>>>,
    ) {
        let state = self.state.read();
        (state.users.clone(), state.user_channels.clone())
    }

    /// Merge previously exported association state back in.
    pub(crate) fn import(
        &self,
        users: HashMap<UserId, HashSet<SessionUserToken>>,
        user_channels: HashMap<SessionUserToken, HashMap<String, HashSet<ChannelId>>>,
    ) {
        let mut state = self.state.write();
        for (user, tokens) in users {
            state.users.entry(user).or_default().extend(tokens);
        }
        for (token, channels) in user_channels {
            let entry = state.user_channels.entry(token).or_default();
            for (name, ids) in channels {
                entry.entry(name).or_default().extend(ids);
            }
        }
    }
}
