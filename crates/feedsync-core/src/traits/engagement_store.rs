// # Engagement Store Trait
//
// Defines the interface to the authoritative like-membership store.
//
// ## Purpose
//
// The engagement store is the single source of truth for who likes which
// post. The count is derived from the membership set; it is never written
// on its own, so `like_count == liked_by.len()` holds for every reader.
//
// ## Atomicity
//
// Every write is atomic per post. Concurrent writes by different users on
// the same post must all land; concurrent writes by the same user on the
// same post serialize into one well-defined outcome.
//
// The reconciliation engine adds a per-post single-writer lock on top, so
// implementations only need per-call atomicity, not cross-call ordering.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::traits::identity::UserId;
use crate::traits::post_store::PostId;

/// Outcome of a committed like write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeResult {
    /// The post written
    pub post_id: PostId,
    /// The user whose membership was written
    pub user_id: UserId,
    /// Authoritative membership of `user_id` after the write
    pub liked: bool,
    /// Authoritative count after the write
    pub like_count: u64,
    /// Per-post revision after the write
    pub revision: u64,
    /// Whether the write changed membership (false for idempotent no-ops)
    pub changed: bool,
}

/// Read-only snapshot of a post's like membership
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Users who currently like the post
    pub liked_by: BTreeSet<UserId>,
    /// Number of likes (always `liked_by.len()`)
    pub like_count: u64,
    /// Per-post revision
    pub revision: u64,
}

impl Membership {
    /// Whether `user_id` currently likes the post
    pub fn contains(&self, user_id: &UserId) -> bool {
        self.liked_by.contains(user_id)
    }
}

/// Trait for engagement store implementations
///
/// # Errors
///
/// - `NotFound`: the post does not exist in the post store at write time
/// - `Unauthenticated`: the user id is empty
///
/// Any other error propagates unchanged to the caller of the toggle.
///
/// # Cancellation
///
/// Writes are dropped when the toggle timeout fires. A write that still
/// lands afterwards is picked up by reading `get_membership` back, so that
/// read must reflect every committed write.
#[async_trait]
pub trait EngagementStore: Send + Sync {
    /// Flip `user_id`'s membership on `post_id`
    ///
    /// Adds the user (count + 1) if absent, removes it (count - 1) if present.
    async fn toggle_like(&self, post_id: &PostId, user_id: &UserId)
    -> Result<LikeResult, crate::Error>;

    /// Write `user_id`'s membership on `post_id` to an absolute value
    ///
    /// Idempotent: writing the current value changes nothing and reports
    /// `changed == false` with the current revision.
    async fn set_like(
        &self,
        post_id: &PostId,
        user_id: &UserId,
        liked: bool,
    ) -> Result<LikeResult, crate::Error>;

    /// Read-only membership snapshot
    ///
    /// Posts nobody has liked yet report an empty membership.
    async fn get_membership(&self, post_id: &PostId) -> Result<Membership, crate::Error>;

    /// Drop all membership for a deleted post
    async fn remove_post(&self, post_id: &PostId) -> Result<(), crate::Error>;
}
