// # Identity Trait
//
// Defines the interface to the authentication collaborator.
//
// Session issuance and credential checks live outside this core. All it
// needs is the user id of the caller, or a clear `Unauthenticated`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque user identifier issued by the auth collaborator
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a raw identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty (never a valid identity)
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Trait for identity providers
///
/// # Returns
///
/// - `Ok(UserId)`: The current identity
/// - `Err(Error::Unauthenticated)`: No valid identity
#[async_trait]
pub trait Identity: Send + Sync {
    /// The user id of the current session
    async fn current_user_id(&self) -> Result<UserId, crate::Error>;
}
