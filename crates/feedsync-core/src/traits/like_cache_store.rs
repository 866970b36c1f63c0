// # Like Cache Store Trait
//
// Defines the interface for persisting a device's local like cache.
//
// ## Purpose
//
// The local like cache lets the UI render "liked" immediately at session
// start. What it persists is a belief, not a fact: loaded entries are
// re-derived from the engagement store on refresh and never trusted as
// authoritative. Losing this data costs one extra round trip, nothing more.
//
// ## Implementations
//
// - In-memory: `cache::MemoryLikeCacheStore`
// - File-based: `cache::FileLikeCacheStore` (JSON, atomic writes, backup)

use async_trait::async_trait;

use crate::traits::identity::UserId;
use crate::traits::post_store::PostId;

/// Trait for like cache persistence
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait LikeCacheStore: Send + Sync {
    /// Load the posts `user_id` was last known to like on this device
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<PostId>)`: Persisted liked posts (empty if none)
    /// - `Err(Error)`: Storage error
    async fn load(&self, user_id: &UserId) -> Result<Vec<PostId>, crate::Error>;

    /// Replace the persisted liked posts for `user_id`
    async fn save(&self, user_id: &UserId, liked: &[PostId]) -> Result<(), crate::Error>;

    /// Forget everything persisted for `user_id`
    async fn clear(&self, user_id: &UserId) -> Result<(), crate::Error>;
}
