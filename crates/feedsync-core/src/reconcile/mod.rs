//! Like reconciliation engine
//!
//! The engine turns a user's "toggle like" intent into exactly one
//! authoritative outcome and keeps the local like cache in line with it.
//!
//! ## Architecture
//!
//! ```text
//!  toggle(post, cache) ──► in-flight batch per (post, user)
//!                               │ first request spawns a driver
//!                               ▼
//!                     ┌───────────────────┐   per-post lock   ┌─────────────────┐
//!                     │      driver       │──────────────────►│ EngagementStore │
//!                     └───────────────────┘                   └─────────────────┘
//!                               │ commit (under lock)
//!                               ▼
//!                         CommitSink (feed hub fan-out)
//! ```
//!
//! ## Toggle State Machine
//!
//! 1. `Requested`: intent captured; the first request of a batch updates
//!    the cache optimistically
//! 2. `Applying`: the write runs under the post's lock, bounded by the
//!    toggle timeout
//! 3. `Confirmed`: every cache in the batch is reconciled with the
//!    authoritative membership
//! 4. `Rejected`: the optimistic guess is rolled back (or, if part of the
//!    batch already committed, reconciled with that commit) and the error
//!    goes to every caller
//!
//! A write that times out may still land in a remote store. After a
//! timeout the membership is read back under the post's lock; if it shows
//! the write landed, the count is published and caches are reconciled with
//! it instead of rolled back.
//!
//! ## Coalescing
//!
//! Toggles by the same user on the same post that arrive while a write is
//! in flight join its batch instead of writing again. When the write lands,
//! an odd number of joined toggles means the user ended up wanting the
//! opposite of what was just committed; that is written as an absolute
//! `set_like`, so a concurrent write from another device cannot turn it
//! into a double toggle. An even number cancels out.

mod locks;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEntry, LocalLikeCache};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{ControllerEvent, EventEmitter, ToggleState};
use crate::feed::PostSummary;
use crate::traits::{EngagementStore, LikeResult, Post, PostId, PostStore, UserId};
use locks::PostLocks;

/// Receiver of commits, called while the post's lock is held
///
/// Calls arrive in commit order per post. Implementations must not block.
pub trait CommitSink: Send + Sync {
    /// A like write changed membership
    fn like_committed(&self, result: &LikeResult);

    /// A post became visible
    fn post_announced(&self, summary: PostSummary);

    /// A post was deleted and its membership dropped
    ///
    /// Returns whether the post was visible.
    fn post_retired(&self, post_id: &PostId) -> bool;
}

#[derive(Debug, Clone, Copy)]
enum LikeWrite {
    Toggle,
    Set(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ToggleKey {
    post_id: PostId,
    user_id: UserId,
}

struct Waiter {
    reply: oneshot::Sender<Result<LikeResult>>,
    cache: LocalLikeCache,
}

/// Requests for one (post, user) pair resolved by a single driver
struct Batch {
    /// Cache that received the optimistic guess
    origin: LocalLikeCache,
    /// Origin's entry before the guess
    prior: Option<CacheEntry>,
    /// Toggles that joined after the current write was dispatched
    pending_toggles: usize,
    waiters: Vec<Waiter>,
}

impl Batch {
    fn caches(&self) -> Vec<&LocalLikeCache> {
        let mut caches: Vec<&LocalLikeCache> = vec![&self.origin];
        for waiter in &self.waiters {
            if !caches.iter().any(|c| c.same_cache(&waiter.cache)) {
                caches.push(&waiter.cache);
            }
        }
        caches
    }
}

/// Applies like toggles with per-post serialization and coalescing
///
/// Cheap to clone; clones share locks and in-flight batches.
#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    posts: Arc<dyn PostStore>,
    store: Arc<dyn EngagementStore>,
    sink: Arc<dyn CommitSink>,
    locks: PostLocks,
    in_flight: Mutex<HashMap<ToggleKey, Batch>>,
    toggle_timeout: Duration,
    events: EventEmitter,
}

impl ReconciliationEngine {
    pub(crate) fn new(
        posts: Arc<dyn PostStore>,
        store: Arc<dyn EngagementStore>,
        sink: Arc<dyn CommitSink>,
        config: &EngineConfig,
        events: EventEmitter,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                posts,
                store,
                sink,
                locks: PostLocks::default(),
                in_flight: Mutex::new(HashMap::new()),
                toggle_timeout: config.toggle_timeout(),
                events,
            }),
        }
    }

    /// Toggle the cache owner's like on `post_id`
    ///
    /// Resolves once the batch this request belongs to is Confirmed or
    /// Rejected. The write itself runs on a spawned task, so dropping this
    /// future does not abandon the request.
    pub async fn toggle(&self, post_id: &PostId, cache: &LocalLikeCache) -> Result<LikeResult> {
        let key = ToggleKey {
            post_id: post_id.clone(),
            user_id: cache.user_id().clone(),
        };
        let (reply, outcome) = oneshot::channel();

        let start_driver = self.inner.enqueue(&key, cache, reply);
        self.inner.transition(&key, ToggleState::Requested);

        if start_driver {
            let inner = Arc::clone(&self.inner);
            let driver_key = key.clone();
            tokio::spawn(async move { inner.drive(driver_key).await });
        }

        outcome
            .await
            .map_err(|_| Error::other(format!("toggle on {} was abandoned", key.post_id)))?
    }

    /// Publish a newly created post under its lock
    ///
    /// The announced count is read under the lock, so likes that raced
    /// ahead of the announcement are not lost. A post retired before its
    /// announcement is not published and yields `NotFound`.
    pub async fn announce_post(&self, post: &Post) -> Result<PostSummary> {
        let inner = &self.inner;
        let announce = async {
            let _slot = inner.locks.lock(&post.id).await;
            inner.posts.get_post(&post.id).await?;
            let membership = inner.store.get_membership(&post.id).await?;
            let summary = PostSummary::from_post(post, membership.like_count);
            inner.sink.post_announced(summary.clone());
            Ok::<PostSummary, Error>(summary)
        };
        let announced = tokio::time::timeout(inner.toggle_timeout, announce)
            .await
            .map_err(|_| Error::timeout(format!("announcing post {}", post.id)))?;

        if let Err(Error::NotFound(_)) = &announced {
            warn!("Post {} was retired before it was announced", post.id);
            inner.locks.forget(&post.id);
        }
        announced
    }

    /// Delete a post, drop its membership and publish the removal under its lock
    ///
    /// A post already missing from the post store but still in the feed is
    /// taken out of the feed. `NotFound` only when neither holds it.
    pub async fn retire_post(&self, post_id: &PostId) -> Result<()> {
        let inner = &self.inner;
        let retire = async {
            let _slot = inner.locks.lock(post_id).await;
            let deleted = match inner.posts.delete_post(post_id).await {
                Ok(()) => true,
                Err(Error::NotFound(_)) => false,
                Err(e) => return Err(e),
            };
            inner.store.remove_post(post_id).await?;
            let removed = inner.sink.post_retired(post_id);
            if !deleted && !removed {
                return Err(Error::not_found(format!("post {}", post_id)));
            }
            if !deleted {
                warn!("Post {} was already deleted, removed it from the feed", post_id);
            }
            Ok::<(), Error>(())
        };
        tokio::time::timeout(inner.toggle_timeout, retire)
            .await
            .map_err(|_| Error::timeout(format!("retiring post {}", post_id)))??;

        inner.locks.forget(post_id);
        info!("Retired post {}", post_id);
        Ok(())
    }
}

impl EngineInner {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<ToggleKey, Batch>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, key: &ToggleKey, state: ToggleState) {
        debug!("Toggle {} by {} -> {:?}", key.post_id, key.user_id, state);
        self.events.emit(ControllerEvent::ToggleStateChanged {
            post_id: key.post_id.clone(),
            user_id: key.user_id.clone(),
            state,
        });
    }

    /// Join the in-flight batch for `key`, or open one
    ///
    /// Returns `true` when a new batch was opened and needs a driver.
    fn enqueue(
        &self,
        key: &ToggleKey,
        cache: &LocalLikeCache,
        reply: oneshot::Sender<Result<LikeResult>>,
    ) -> bool {
        let mut in_flight = self.in_flight();

        if let Some(batch) = in_flight.get_mut(key) {
            batch.pending_toggles += 1;
            batch.waiters.push(Waiter {
                reply,
                cache: cache.clone(),
            });
            debug!(
                "Coalesced toggle on {} by {} ({} pending)",
                key.post_id, key.user_id, batch.pending_toggles
            );
            return false;
        }

        let prior = cache.entry(&key.post_id);
        let guess = !prior.is_some_and(|entry| entry.belief.liked);
        cache.mark_optimistic(&key.post_id, guess);

        in_flight.insert(
            key.clone(),
            Batch {
                origin: cache.clone(),
                prior,
                pending_toggles: 0,
                waiters: vec![Waiter {
                    reply,
                    cache: cache.clone(),
                }],
            },
        );
        true
    }

    /// Resolve the batch for `key` and answer every waiter
    async fn drive(self: Arc<Self>, key: ToggleKey) {
        let mut write = LikeWrite::Toggle;
        let mut last_commit: Option<LikeResult> = None;

        let (batch, outcome) = loop {
            self.transition(&key, ToggleState::Applying);
            let applied = self.apply(&key, write).await;

            if let Err(Error::Timeout(_)) = &applied {
                let expected = match &last_commit {
                    Some(commit) => commit.liked,
                    None => self.prior_liked(&key),
                };
                if let Some(observed) = self.observe_after_timeout(&key, expected).await {
                    last_commit = Some(observed);
                }
            }

            let mut in_flight = self.in_flight();
            match applied {
                Ok(result) => {
                    let rerun = in_flight
                        .get_mut(&key)
                        .filter(|batch| batch.pending_toggles % 2 == 1);
                    if let Some(batch) = rerun {
                        batch.pending_toggles = 0;
                        write = LikeWrite::Set(!result.liked);
                        last_commit = Some(result);
                        continue;
                    }
                    let batch = in_flight.remove(&key);
                    let outcome = Ok(result);
                    if let Some(batch) = &batch {
                        Self::settle_caches(&key, batch, &outcome, last_commit.as_ref());
                    }
                    break (batch, outcome);
                }
                Err(e) => {
                    let batch = in_flight.remove(&key);
                    let outcome = Err(e);
                    if let Some(batch) = &batch {
                        Self::settle_caches(&key, batch, &outcome, last_commit.as_ref());
                    }
                    break (batch, outcome);
                }
            }
        };

        let Some(batch) = batch else {
            error!("In-flight batch for {} by {} vanished", key.post_id, key.user_id);
            return;
        };

        let terminal = match &outcome {
            Ok(result) => {
                debug!(
                    "Toggle {} by {} confirmed for {} request(s): liked={} count={}",
                    key.post_id,
                    key.user_id,
                    batch.waiters.len(),
                    result.liked,
                    result.like_count
                );
                ToggleState::Confirmed
            }
            Err(e) => {
                warn!(
                    "Toggle {} by {} rejected for {} request(s): {}",
                    key.post_id,
                    key.user_id,
                    batch.waiters.len(),
                    e
                );
                self.events.emit(ControllerEvent::ToggleFailed {
                    post_id: key.post_id.clone(),
                    user_id: key.user_id.clone(),
                    error: e.to_string(),
                });
                ToggleState::Rejected
            }
        };

        for waiter in batch.waiters {
            self.transition(&key, terminal);
            // Caller went away; the outcome is already in its cache
            let _ = waiter.reply.send(outcome.clone());
        }
    }

    /// The origin cache's belief before the batch's optimistic guess
    fn prior_liked(&self, key: &ToggleKey) -> bool {
        self.in_flight()
            .get(key)
            .and_then(|batch| batch.prior)
            .is_some_and(|entry| entry.belief.liked)
    }

    /// Read back membership after a timed-out write
    ///
    /// Returns the membership as a commit when it differs from `expected`,
    /// i.e. the write landed after all; that commit is published under the
    /// lock. `None` when nothing changed or the read fails too.
    async fn observe_after_timeout(&self, key: &ToggleKey, expected: bool) -> Option<LikeResult> {
        let observe = async {
            let mut slot = self.locks.lock(&key.post_id).await;
            let membership = self.store.get_membership(&key.post_id).await?;
            let liked = membership.contains(&key.user_id);

            let observed = LikeResult {
                post_id: key.post_id.clone(),
                user_id: key.user_id.clone(),
                liked,
                like_count: membership.like_count,
                revision: membership.revision,
                changed: liked != expected,
            };
            if slot.last_revision.is_some_and(|last| observed.revision < last) {
                return Ok::<Option<LikeResult>, Error>(None);
            }
            slot.last_revision = Some(observed.revision);
            // Publishes only if the feed's count is behind
            self.sink.like_committed(&observed);
            Ok(observed.changed.then_some(observed))
        };

        match tokio::time::timeout(self.toggle_timeout, observe).await {
            Ok(Ok(observed)) => {
                if let Some(result) = &observed {
                    warn!(
                        "Timed-out like on {} by {} landed: liked={} count={}",
                        key.post_id, key.user_id, result.liked, result.like_count
                    );
                }
                observed
            }
            Ok(Err(e)) => {
                warn!("Could not read back {} after timeout: {}", key.post_id, e);
                None
            }
            Err(_) => {
                warn!("Reading back {} after timeout also timed out", key.post_id);
                None
            }
        }
    }

    /// Bring every cache in the batch in line with the outcome
    ///
    /// Runs while the in-flight table is locked, so a new batch on the same
    /// key cannot capture a half-settled cache entry as its prior.
    fn settle_caches(
        key: &ToggleKey,
        batch: &Batch,
        outcome: &Result<LikeResult>,
        last_commit: Option<&LikeResult>,
    ) {
        let settled = match outcome {
            Ok(result) => Some(result.liked),
            Err(_) => last_commit.map(|result| result.liked),
        };

        match settled {
            Some(liked) => {
                for cache in batch.caches() {
                    cache.reconcile(&key.post_id, liked);
                }
            }
            None => batch.origin.restore(&key.post_id, batch.prior),
        }
    }

    /// One write under the post's lock, bounded by the toggle timeout
    async fn apply(&self, key: &ToggleKey, write: LikeWrite) -> Result<LikeResult> {
        let commit = async {
            let mut slot = self.locks.lock(&key.post_id).await;

            let result = match write {
                LikeWrite::Toggle => self.store.toggle_like(&key.post_id, &key.user_id).await?,
                LikeWrite::Set(liked) => {
                    self.store
                        .set_like(&key.post_id, &key.user_id, liked)
                        .await?
                }
            };

            if slot.is_stale(&result) {
                error!(
                    "Stale commit on {}: revision {} after {:?}",
                    key.post_id, result.revision, slot.last_revision
                );
                return Err(Error::conflict(format!(
                    "post {} revision {} arrived out of order",
                    key.post_id, result.revision
                )));
            }
            slot.last_revision = Some(result.revision);

            if result.changed {
                self.sink.like_committed(&result);
            }
            Ok::<LikeResult, Error>(result)
        };

        tokio::time::timeout(self.toggle_timeout, commit)
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "like on {} by {} did not resolve within {:?}",
                    key.post_id, key.user_id, self.toggle_timeout
                ))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryEngagementStore, MemoryPostStore};
    use crate::traits::{Membership, PostStore};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        commits: StdMutex<Vec<LikeResult>>,
    }

    impl CommitSink for RecordingSink {
        fn like_committed(&self, result: &LikeResult) {
            self.commits.lock().unwrap().push(result.clone());
        }

        fn post_announced(&self, _summary: PostSummary) {}

        fn post_retired(&self, _post_id: &PostId) -> bool {
            true
        }
    }

    /// Commits every write, then never answers
    struct LateAckStore {
        inner: MemoryEngagementStore,
    }

    #[async_trait]
    impl EngagementStore for LateAckStore {
        async fn toggle_like(&self, post_id: &PostId, user_id: &UserId) -> Result<LikeResult> {
            self.inner.toggle_like(post_id, user_id).await?;
            std::future::pending().await
        }

        async fn set_like(&self, post_id: &PostId, user_id: &UserId, liked: bool) -> Result<LikeResult> {
            self.inner.set_like(post_id, user_id, liked).await?;
            std::future::pending().await
        }

        async fn get_membership(&self, post_id: &PostId) -> Result<Membership> {
            self.inner.get_membership(post_id).await
        }

        async fn remove_post(&self, post_id: &PostId) -> Result<()> {
            self.inner.remove_post(post_id).await
        }
    }

    async fn posts_with_one_post() -> (Arc<dyn PostStore>, PostId) {
        let posts: Arc<dyn PostStore> = Arc::new(MemoryPostStore::new());
        let post = posts
            .create_post("title", "body", &UserId::new("author"))
            .await
            .unwrap();
        (posts, post.id)
    }

    fn engine_over(
        posts: Arc<dyn PostStore>,
        store: Arc<dyn EngagementStore>,
        config: &EngineConfig,
    ) -> (ReconciliationEngine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let (events, _rx) = EventEmitter::channel(64);
        let engine = ReconciliationEngine::new(posts, store, sink.clone(), config, events);
        (engine, sink)
    }

    async fn engine() -> (ReconciliationEngine, Arc<RecordingSink>, PostId) {
        let (posts, post) = posts_with_one_post().await;
        let store = Arc::new(MemoryEngagementStore::new(Arc::clone(&posts)));
        let (engine, sink) = engine_over(posts, store, &EngineConfig::default());
        (engine, sink, post)
    }

    #[tokio::test]
    async fn test_toggle_confirms_and_reconciles_cache() {
        let (engine, sink, post) = engine().await;
        let cache = LocalLikeCache::new(UserId::new("u1"));

        let result = engine.toggle(&post, &cache).await.unwrap();

        assert!(result.liked);
        assert_eq!(result.like_count, 1);
        assert!(cache.is_liked(&post));
        assert_eq!(
            cache.belief(&post).map(|b| b.source),
            Some(crate::cache::BeliefSource::Authoritative)
        );
        assert_eq!(sink.commits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_toggle_restores_prior_entry() {
        let (engine, sink, _post) = engine().await;
        let cache = LocalLikeCache::new(UserId::new("u1"));
        let missing = PostId::new("missing");

        let err = engine.toggle(&missing, &cache).await.unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(cache.belief(&missing), None);
        assert!(sink.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retire_forgets_lock_slot() {
        let (engine, _sink, post) = engine().await;
        let cache = LocalLikeCache::new(UserId::new("u1"));
        engine.toggle(&post, &cache).await.unwrap();
        assert_eq!(engine.inner.locks.len(), 1);

        engine.retire_post(&post).await.unwrap();
        assert_eq!(engine.inner.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_write_landing_after_timeout_is_reconciled() {
        let (posts, post) = posts_with_one_post().await;
        let store = Arc::new(LateAckStore {
            inner: MemoryEngagementStore::new(Arc::clone(&posts)),
        });
        let config = EngineConfig {
            toggle_timeout_ms: 50,
        };
        let (engine, sink) = engine_over(posts, store, &config);
        let cache = LocalLikeCache::new(UserId::new("u1"));

        let err = engine.toggle(&post, &cache).await.unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        // The store has the like, so the cache and the feed follow it
        assert!(cache.is_liked(&post));
        assert_eq!(
            cache.belief(&post).map(|b| b.source),
            Some(crate::cache::BeliefSource::Authoritative)
        );
        let commits = sink.commits.lock().unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].like_count, 1);
    }

    #[tokio::test]
    async fn test_announce_of_deleted_post_is_not_found() {
        let (posts, post_id) = posts_with_one_post().await;
        let post = posts.get_post(&post_id).await.unwrap();
        let store = Arc::new(MemoryEngagementStore::new(Arc::clone(&posts)));
        let (engine, _sink) = engine_over(Arc::clone(&posts), store, &EngineConfig::default());

        posts.delete_post(&post_id).await.unwrap();
        let err = engine.announce_post(&post).await.unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(engine.inner.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_retire_deletes_from_post_store() {
        let (posts, post_id) = posts_with_one_post().await;
        let store = Arc::new(MemoryEngagementStore::new(Arc::clone(&posts)));
        let (engine, _sink) = engine_over(Arc::clone(&posts), store, &EngineConfig::default());

        engine.retire_post(&post_id).await.unwrap();

        assert!(matches!(
            posts.get_post(&post_id).await,
            Err(Error::NotFound(_))
        ));
    }
}
