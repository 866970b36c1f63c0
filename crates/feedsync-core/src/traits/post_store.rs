// # Post Store Trait
//
// Defines the interface to the external post store collaborator.
//
// ## Purpose
//
// Posts are owned by the post store. This core only references them:
// it needs to know which posts exist (for toggle validation), their
// creation order (for the feed), and a short summary for observers.
//
// ## Timestamps
//
// `created_at` is always assigned by the store, never by a client.
// Client clocks are untrusted and would make feed ordering depend on
// whoever published the post.
//
// ## Implementations
//
// - In-memory: `store::MemoryPostStore`
// - Future: document databases, SQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::traits::identity::UserId;

/// Opaque unique post identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    /// Wrap a raw identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty (never valid for lookups)
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PostId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A published post as held by the post store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Store-assigned identifier
    pub id: PostId,
    /// Post title
    pub title: String,
    /// Post body
    pub content: String,
    /// Identity that published the post
    pub author_id: UserId,
    /// Server-assigned creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Trait for post store implementations
///
/// The store is an external collaborator: this core never writes post
/// bodies except through [`PostStore::create_post`] on behalf of the
/// publishing identity.
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Create a new post
    ///
    /// The store assigns both `id` and `created_at`.
    ///
    /// # Returns
    ///
    /// - `Ok(Post)`: The stored post
    /// - `Err(Error)`: Storage error
    async fn create_post(
        &self,
        title: &str,
        content: &str,
        author_id: &UserId,
    ) -> Result<Post, crate::Error>;

    /// List all posts, newest first
    ///
    /// Ties on `created_at` are broken by ascending `id`.
    async fn list_posts(&self) -> Result<Vec<Post>, crate::Error>;

    /// Fetch a single post
    ///
    /// # Returns
    ///
    /// - `Ok(Post)`: The post
    /// - `Err(Error::NotFound)`: No such post
    async fn get_post(&self, post_id: &PostId) -> Result<Post, crate::Error>;

    /// Delete a post
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Deleted
    /// - `Err(Error::NotFound)`: No such post
    async fn delete_post(&self, post_id: &PostId) -> Result<(), crate::Error>;
}
