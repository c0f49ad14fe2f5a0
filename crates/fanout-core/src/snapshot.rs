//! Restart-recovery snapshot.
//!
//! The only state expected to survive a process restart: global-scope
//! channel registrations and the identity/channel associations, enough to
//! rebuild every empty connection bucket on restore. Connections themselves
//! never survive a restart.

use crate::channel::ChannelId;
use crate::error::PushError;
use crate::user::{SessionUserToken, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Serializable registry state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Global-scope registrations, name to issued id.
    pub global_channels: HashMap<String, ChannelId>,
    /// Identity to its session-user tokens.
    pub identities: HashMap<UserId, HashSet<SessionUserToken>>,
    /// Session-user token to owned channel ids per logical name.
    pub user_channels: HashMap<SessionUserToken, HashMap<String, HashSet<ChannelId>>>,
}

impl Snapshot {
    /// Whether the snapshot carries anything at all.
    pub fn is_empty(&self) -> bool {
        self.global_channels.is_empty() && self.identities.is_empty() && self.user_channels.is_empty()
    }

    /// Encode to the opaque wire form.
    pub fn to_json(&self) -> Result<String, PushError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the opaque wire form.
    pub fn from_json(json: &str) -> Result<Self, PushError> {
        Ok(serde_json::from_str(json)?)
    }
}
