// # Feed Session
//
// One identity on one device: the surface a UI binds to.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use super::FeedController;
use crate::cache::LocalLikeCache;
use crate::error::{Error, Result};
use crate::feed::{FeedSubscription, PostSummary};
use crate::traits::{Identity, LikeResult, PostId, UserId};

/// A controller bound to one identity and its local like cache
#[derive(Clone)]
pub struct FeedSession {
    controller: FeedController,
    identity: Arc<dyn Identity>,
    cache: LocalLikeCache,
}

impl std::fmt::Debug for FeedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSession").finish_non_exhaustive()
    }
}

impl FeedSession {
    pub(crate) fn new(
        controller: FeedController,
        identity: Arc<dyn Identity>,
        cache: LocalLikeCache,
    ) -> Self {
        Self {
            controller,
            identity,
            cache,
        }
    }

    /// Owner of the local like cache
    pub fn user_id(&self) -> &UserId {
        self.cache.user_id()
    }

    pub fn cache(&self) -> &LocalLikeCache {
        &self.cache
    }

    /// Toggle the current user's like on a post
    ///
    /// The local cache flips immediately; the returned result is the
    /// authoritative outcome after reconciliation. A post that no longer
    /// exists is dropped from the cache.
    pub async fn toggle_like(&self, post_id: &PostId) -> Result<LikeResult> {
        let outcome = self
            .controller
            .toggle_like_for(self.identity.as_ref(), &self.cache, post_id)
            .await;
        if let Err(Error::NotFound(_)) = &outcome {
            self.cache.forget(post_id);
        }
        outcome
    }

    /// Cached "liked" state, for immediate feedback only
    pub fn is_liked_locally(&self, post_id: &PostId) -> bool {
        self.cache.is_liked(post_id)
    }

    pub fn subscribe_feed(&self) -> Result<FeedSubscription> {
        self.controller.subscribe_feed()
    }

    /// Rebuild the local cache from authoritative memberships
    ///
    /// Covers every post in the feed plus every post the cache tracks.
    /// Entries written while the memberships are read are newer and stay.
    /// Returns the number of posts the user likes.
    pub async fn refresh_likes(&self) -> Result<usize> {
        let user_id = self.user_id().clone();
        let since = self.cache.generation();

        let mut post_ids: BTreeSet<PostId> = self
            .controller
            .snapshot()
            .posts
            .into_iter()
            .map(|post| post.id)
            .collect();
        post_ids.extend(self.cache.tracked_posts());

        let mut liked = Vec::new();
        for post_id in post_ids {
            match self.controller.membership(&post_id).await {
                Ok(membership) if membership.contains(&user_id) => liked.push((post_id, true)),
                Ok(_) => {}
                // Deleted since it was cached
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        self.cache.rebuild(since, liked);
        let count = self.cache.liked_posts().len();
        debug!("Refreshed likes for {}: {} liked post(s)", user_id, count);
        Ok(count)
    }

    /// Save settled likes to the device store, if the cache has one
    pub async fn persist_likes(&self) -> Result<()> {
        self.cache.persist().await
    }

    /// Forget this device's likes, e.g. on sign-out
    pub async fn clear_likes(&self) -> Result<()> {
        self.cache.clear().await
    }

    pub async fn publish_post(&self, title: &str, content: &str) -> Result<PostSummary> {
        self.controller
            .publish_post(self.identity.as_ref(), title, content)
            .await
    }

    pub async fn retire_post(&self, post_id: &PostId) -> Result<()> {
        self.controller
            .retire_post(self.identity.as_ref(), post_id)
            .await
    }
}
