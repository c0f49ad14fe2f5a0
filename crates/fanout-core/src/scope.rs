//! Channel scopes and scope-instance identifiers.

use crate::error::PushError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifetime class of a channel, ordered longest to shortest lived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Lives as long as the process.
    Global,
    /// Bound to one logical client session.
    Session,
    /// Bound to one rendered page instance.
    View,
}

impl Scope {
    /// Canonical lowercase name of the scope.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Session => "session",
            Scope::View => "view",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = PushError;

    /// Matches the three scope names case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("global") {
            Ok(Scope::Global)
        } else if s.eq_ignore_ascii_case("session") {
            Ok(Scope::Session)
        } else if s.eq_ignore_ascii_case("view") {
            Ok(Scope::View)
        } else {
            Err(PushError::InvalidScope(format!("unknown scope: {}", s)))
        }
    }
}

/// Identifier of one logical client session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh session identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// String form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of one rendered page instance within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(String);

impl ViewId {
    /// Generate a fresh view identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// String form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ViewId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The scope instances visible to a registration or send call.
///
/// Global registrations do not need one; session-scoped calls need the
/// session, view-scoped calls need both.
#[derive(Debug, Clone)]
pub struct ScopeContext {
    /// The calling session.
    pub session: SessionId,
    /// The calling view, when the caller is inside a page render.
    pub view: Option<ViewId>,
}

impl ScopeContext {
    /// Context for a session without an active view.
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            view: None,
        }
    }

    /// Context for a view within a session.
    pub fn with_view(session: SessionId, view: ViewId) -> Self {
        Self {
            session,
            view: Some(view),
        }
    }
}
