//! Session identity and dispatch context.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Endpoint;

/// Opaque identity of the host session this client runs in.
///
/// Supplied by the host environment and never generated by the core. It is
/// sent as a connection header and in session-change notifications, and is
/// compared against incoming notifications to tell whether they are about us.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a host-assigned session id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `other` names this session.
    #[must_use]
    pub fn is(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Origin handed to subscribers along with each decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    /// Endpoint the message arrived from.
    pub endpoint: Endpoint,
    /// Identity of the local session.
    pub session_id: SessionId,
}

impl DispatchContext {
    /// Create a new dispatch context.
    #[must_use]
    pub const fn new(endpoint: Endpoint, session_id: SessionId) -> Self {
        Self {
            endpoint,
            session_id,
        }
    }

    /// Whether `session_id` refers to the local session.
    #[must_use]
    pub fn is_local_session(&self, session_id: &str) -> bool {
        self.session_id.is(session_id)
    }
}
