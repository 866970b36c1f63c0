// # Memory Engagement Store
//
// In-memory implementation of EngagementStore.
//
// ## Data Model
//
// Each post's likes are a `BTreeSet<UserId>` plus a revision counter.
// The count reported to readers is the set's length, so the invariant
// `like_count == |liked_by|` holds by construction.
//
// ## Atomicity
//
// Post existence is checked against the post store, then the membership
// mutation runs under a synchronous lock with no await in between. A
// caller cancelled mid-call either commits the whole write or none of it.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::Error;
use crate::traits::engagement_store::{EngagementStore, LikeResult, Membership};
use crate::traits::identity::UserId;
use crate::traits::post_store::{PostId, PostStore};

#[derive(Debug, Default)]
struct LikeSet {
    liked_by: BTreeSet<UserId>,
    revision: u64,
}

impl LikeSet {
    fn write(&mut self, post_id: &PostId, user_id: &UserId, liked: bool) -> LikeResult {
        let changed = if liked {
            self.liked_by.insert(user_id.clone())
        } else {
            self.liked_by.remove(user_id)
        };
        if changed {
            self.revision += 1;
        }
        LikeResult {
            post_id: post_id.clone(),
            user_id: user_id.clone(),
            liked,
            like_count: self.liked_by.len() as u64,
            revision: self.revision,
            changed,
        }
    }

    fn membership(&self) -> Membership {
        Membership {
            liked_by: self.liked_by.clone(),
            like_count: self.liked_by.len() as u64,
            revision: self.revision,
        }
    }
}

/// In-memory engagement store
///
/// Holds a reference to the post store so writes can reject posts that
/// do not exist at write time.
#[derive(Clone)]
pub struct MemoryEngagementStore {
    posts: Arc<dyn PostStore>,
    likes: Arc<Mutex<HashMap<PostId, LikeSet>>>,
}

impl MemoryEngagementStore {
    /// Create an empty engagement store backed by `posts`
    pub fn new(posts: Arc<dyn PostStore>) -> Self {
        Self {
            posts,
            likes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn table(&self) -> Result<MutexGuard<'_, HashMap<PostId, LikeSet>>, Error> {
        self.likes
            .lock()
            .map_err(|_| Error::other("engagement table lock poisoned"))
    }

    async fn write(
        &self,
        post_id: &PostId,
        user_id: &UserId,
        liked: Option<bool>,
    ) -> Result<LikeResult, Error> {
        if user_id.is_empty() {
            return Err(Error::unauthenticated("user id is empty"));
        }
        // NotFound propagates from the post store unchanged
        self.posts.get_post(post_id).await?;

        let mut table = self.table()?;
        let set = table.entry(post_id.clone()).or_default();
        let target = liked.unwrap_or_else(|| !set.liked_by.contains(user_id));
        Ok(set.write(post_id, user_id, target))
    }
}

#[async_trait]
impl EngagementStore for MemoryEngagementStore {
    async fn toggle_like(&self, post_id: &PostId, user_id: &UserId) -> Result<LikeResult, Error> {
        self.write(post_id, user_id, None).await
    }

    async fn set_like(
        &self,
        post_id: &PostId,
        user_id: &UserId,
        liked: bool,
    ) -> Result<LikeResult, Error> {
        self.write(post_id, user_id, Some(liked)).await
    }

    async fn get_membership(&self, post_id: &PostId) -> Result<Membership, Error> {
        let table = self.table()?;
        Ok(table
            .get(post_id)
            .map(LikeSet::membership)
            .unwrap_or_default())
    }

    async fn remove_post(&self, post_id: &PostId) -> Result<(), Error> {
        self.table()?.remove(post_id);
        Ok(())
    }
}
