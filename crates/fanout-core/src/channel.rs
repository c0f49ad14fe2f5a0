//! Channel names and channel identifiers.

use crate::error::PushError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the channel name and the random suffix in a channel id.
pub const CHANNEL_ID_SEPARATOR: char = '?';

/// Check a developer-assigned channel name against the safe character set:
/// ASCII alphanumerics, `_` and `-`, non-empty.
pub fn validate_name(name: &str) -> Result<(), PushError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(PushError::InvalidChannelName(name.to_string()))
    }
}

/// The unique token issued for one instantiation of a channel.
///
/// Wire form is `name?suffix`. The suffix doubles as the client-visible
/// connection address, so it is generated rather than assigned and is not
/// guessable from previous ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Issue a fresh identifier for `name`.
    pub(crate) fn issue(name: &str) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}{}{}", name, CHANNEL_ID_SEPARATOR, suffix))
    }

    /// Parse an identifier presented by a client, e.g. from a URL path
    /// segment.
    pub fn parse(s: &str) -> Result<Self, PushError> {
        let Some((name, suffix)) = s.split_once(CHANNEL_ID_SEPARATOR) else {
            return Err(PushError::InvalidChannelName(s.to_string()));
        };
        validate_name(name)?;
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PushError::InvalidChannelName(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The channel name this id was issued for.
    pub fn name(&self) -> &str {
        match self.0.split_once(CHANNEL_ID_SEPARATOR) {
            Some((name, _)) => name,
            None => &self.0,
        }
    }

    /// Full wire form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("chat").is_ok());
        assert!(validate_name("chat_room-2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("chat room").is_err());
        assert!(validate_name("chat/7").is_err());
        assert!(validate_name("chät").is_err());
    }

    #[test]
    fn test_issue_format() {
        let id = ChannelId::issue("chat");
        assert_eq!(id.name(), "chat");
        assert!(id.as_str().starts_with("chat?"));
        let suffix = id.as_str().split_once('?').unwrap().1;
        assert!(!suffix.is_empty());
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_issued_ids_are_distinct() {
        let a = ChannelId::issue("chat");
        let b = ChannelId::issue("chat");
        assert_ne!(a, b);
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = ChannelId::issue("news");
        let parsed = ChannelId::parse(id.as_str()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ChannelId::parse("chat").is_err());
        assert!(ChannelId::parse("chat?").is_err());
        assert!(ChannelId::parse("?abc123").is_err());
        assert!(ChannelId::parse("bad name?abc123").is_err());
        assert!(ChannelId::parse("chat?abc 123").is_err());
    }
}
