//! Feed controller
//!
//! Application-facing façade wiring the collaborator stores, the
//! reconciliation engine and the feed hub together.
//!
//! ## Lifecycle
//!
//! 1. Create with [`FeedController::new`] (loads the initial feed)
//! 2. Consume the event receiver (optional)
//! 3. Open a [`FeedSession`] per identity/device
//! 4. Call [`FeedController::shutdown`] to end every subscription
//!
//! ## Threading
//!
//! The controller is cheap to clone and safe to share between tasks. Writes
//! to different posts run in parallel; writes to one post are serialized.

mod session;

pub use session::FeedSession;

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cache::LocalLikeCache;
use crate::config::FeedSyncConfig;
use crate::error::{Error, Result};
use crate::events::{ControllerEvent, EventEmitter};
use crate::feed::hub::FeedHub;
use crate::feed::{FeedSnapshot, FeedSubscription, FeedView, PostSummary};
use crate::reconcile::{CommitSink, ReconciliationEngine};
use crate::traits::{
    EngagementStore, Identity, LikeCacheStore, LikeResult, Membership, PostId, PostStore, UserId,
};

/// Live feed façade
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use feedsync_core::config::FeedSyncConfig;
/// use feedsync_core::controller::FeedController;
/// use feedsync_core::store::{MemoryEngagementStore, MemoryPostStore, StaticIdentity};
/// use feedsync_core::traits::PostStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let posts: Arc<dyn PostStore> = Arc::new(MemoryPostStore::new());
///     let engagement = Arc::new(MemoryEngagementStore::new(Arc::clone(&posts)));
///     let (controller, _events) =
///         FeedController::new(posts, engagement, FeedSyncConfig::default()).await?;
///
///     let session = controller
///         .open_session(Arc::new(StaticIdentity::new("u1")), None)
///         .await?;
///     let post = session.publish_post("Hello", "First post").await?;
///     session.toggle_like(&post.id).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct FeedController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    posts: Arc<dyn PostStore>,
    engagement: Arc<dyn EngagementStore>,
    hub: Arc<FeedHub>,
    engine: ReconciliationEngine,
    config: FeedSyncConfig,
}

impl FeedController {
    /// Create a controller over the given stores
    ///
    /// # Returns
    ///
    /// A tuple of (controller, event_receiver) where event_receiver yields
    /// controller events
    pub async fn new(
        posts: Arc<dyn PostStore>,
        engagement: Arc<dyn EngagementStore>,
        config: FeedSyncConfig,
    ) -> Result<(Self, mpsc::Receiver<ControllerEvent>)> {
        config.validate()?;

        let (events, rx) = EventEmitter::channel(config.event_channel_capacity);

        let listed = posts
            .list_posts()
            .await
            .map_err(|e| Error::post_store(format!("loading initial feed: {}", e)))?;

        let mut summaries = Vec::new();
        for post in listed {
            let membership = engagement.get_membership(&post.id).await?;
            summaries.push(PostSummary::from_post(&post, membership.like_count));
        }
        let posts_count = summaries.len();

        let hub = FeedHub::new(
            FeedView::from_summaries(summaries, None),
            &config.feed,
            events.clone(),
        );
        let sink: Arc<dyn CommitSink> = hub.clone();
        let engine = ReconciliationEngine::new(
            Arc::clone(&posts),
            Arc::clone(&engagement),
            sink,
            &config.engine,
            events.clone(),
        );

        info!("Feed controller started with {} post(s)", posts_count);
        events.emit(ControllerEvent::Started { posts_count });

        let controller = Self {
            inner: Arc::new(ControllerInner {
                posts,
                engagement,
                hub,
                engine,
                config,
            }),
        };
        Ok((controller, rx))
    }

    /// The configuration this controller runs with
    pub fn config(&self) -> &FeedSyncConfig {
        &self.inner.config
    }

    /// Subscribe to the live feed
    pub fn subscribe_feed(&self) -> Result<FeedSubscription> {
        self.inner.hub.subscribe()
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.hub.subscriber_count()
    }

    /// Current authoritative feed, untruncated
    pub fn snapshot(&self) -> FeedSnapshot {
        self.inner.hub.snapshot()
    }

    /// Authoritative like membership of a post
    pub async fn membership(&self, post_id: &PostId) -> Result<Membership> {
        self.inner.engagement.get_membership(post_id).await
    }

    /// Bind an identity and an existing cache into a session
    pub fn session(&self, identity: Arc<dyn Identity>, cache: LocalLikeCache) -> FeedSession {
        FeedSession::new(self.clone(), identity, cache)
    }

    /// Open a session for the identity's current user
    ///
    /// With a `store`, the local like cache is loaded from it and can be
    /// persisted back with [`FeedSession::persist_likes`].
    pub async fn open_session(
        &self,
        identity: Arc<dyn Identity>,
        store: Option<Arc<dyn LikeCacheStore>>,
    ) -> Result<FeedSession> {
        let user_id = resolve_user(identity.as_ref()).await?;
        let cache = match store {
            Some(store) => LocalLikeCache::load(user_id, store).await?,
            None => LocalLikeCache::new(user_id),
        };
        debug!("Opened session for {}", cache.user_id());
        Ok(self.session(identity, cache))
    }

    /// Create a post as the identity's user and add it to the feed
    pub async fn publish_post(
        &self,
        identity: &dyn Identity,
        title: &str,
        content: &str,
    ) -> Result<PostSummary> {
        let author = resolve_user(identity).await?;
        let post = self.inner.posts.create_post(title, content, &author).await?;
        let summary = self.inner.engine.announce_post(&post).await?;
        info!("Published post {} by {}", post.id, author);
        Ok(summary)
    }

    /// Delete a post; only its author may do so
    ///
    /// A post the post store already lost but the feed still shows is
    /// removed from the feed.
    pub async fn retire_post(&self, identity: &dyn Identity, post_id: &PostId) -> Result<()> {
        require_post_id(post_id)?;
        let user_id = resolve_user(identity).await?;

        let author_id = match self.inner.posts.get_post(post_id).await {
            Ok(post) => post.author_id,
            Err(Error::NotFound(_)) => match self.inner.hub.summary(post_id) {
                Some(summary) => summary.author_id,
                None => return Err(Error::not_found(format!("post {}", post_id))),
            },
            Err(e) => return Err(e),
        };
        if author_id != user_id {
            return Err(Error::permission_denied(format!(
                "{} is not the author of post {}",
                user_id, post_id
            )));
        }

        self.inner.engine.retire_post(post_id).await
    }

    /// Close the feed; every live subscription ends with a terminal error
    pub fn shutdown(&self) {
        self.inner.hub.close();
    }

    pub(crate) async fn toggle_like_for(
        &self,
        identity: &dyn Identity,
        cache: &LocalLikeCache,
        post_id: &PostId,
    ) -> Result<LikeResult> {
        require_post_id(post_id)?;
        let user_id = resolve_user(identity).await?;
        if &user_id != cache.user_id() {
            return Err(Error::unauthenticated(format!(
                "session cache belongs to {}, current user is {}",
                cache.user_id(),
                user_id
            )));
        }
        self.inner.engine.toggle(post_id, cache).await
    }
}

fn require_post_id(post_id: &PostId) -> Result<()> {
    if post_id.is_empty() {
        return Err(Error::invalid_input("post id cannot be empty"));
    }
    Ok(())
}

async fn resolve_user(identity: &dyn Identity) -> Result<UserId> {
    let user_id = identity.current_user_id().await.map_err(|e| match e {
        Error::Unauthenticated(_) => e,
        other => Error::unauthenticated(format!("identity unavailable: {}", other)),
    })?;
    if user_id.is_empty() {
        return Err(Error::unauthenticated("empty user id"));
    }
    Ok(user_id)
}
