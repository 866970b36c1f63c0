//! Local like cache
//!
//! Per-device record of the posts the current identity believes it likes.
//! It exists only to render "liked" immediately; the engagement store is
//! the source of truth and always wins on disagreement.
//!
//! ## Entry lifecycle
//!
//! ```text
//!  load() ──► Persisted ──┐
//!                         ├─► mark_optimistic() ──► Optimistic ──► reconcile() ──► Authoritative
//!  (absent) ──────────────┘                                  └──► restore()   ──► (prior entry)
//! ```
//!
//! Persisted entries are never trusted across sessions: `rebuild()` replaces
//! them with authoritative memberships on refresh/reconnect.
//!
//! Every write stamps its entry with the cache's next generation. A refresh
//! captures [`LocalLikeCache::generation`] before it reads memberships and
//! hands it to `rebuild()`, which keeps entries written after that point.

pub mod file;
pub mod memory;

pub use file::FileLikeCacheStore;
pub use memory::MemoryLikeCacheStore;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::config::LikeCacheConfig;
use crate::error::Result;
use crate::traits::{LikeCacheStore, PostId, UserId};

/// Open the like cache store named by the configuration
pub async fn open_store(config: &LikeCacheConfig) -> Result<Arc<dyn LikeCacheStore>> {
    config.validate()?;
    match config {
        LikeCacheConfig::Memory => Ok(Arc::new(MemoryLikeCacheStore::new())),
        LikeCacheConfig::File { path } => Ok(Arc::new(FileLikeCacheStore::new(path).await?)),
    }
}

/// Where a cached belief came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeliefSource {
    /// Loaded from device storage at session start
    Persisted,
    /// Guessed locally before the engagement store answered
    Optimistic,
    /// Reported by the engagement store
    Authoritative,
}

/// A cached "liked" belief for one post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeBelief {
    /// Believed membership
    pub liked: bool,
    /// Provenance of the belief
    pub source: BeliefSource,
}

/// A belief plus the generation that wrote it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CacheEntry {
    pub(crate) belief: LikeBelief,
    pub(crate) generation: u64,
}

#[derive(Default)]
struct Entries {
    beliefs: HashMap<PostId, CacheEntry>,
    generation: u64,
}

impl Entries {
    fn record(&mut self, post_id: PostId, belief: LikeBelief) -> Option<CacheEntry> {
        self.generation += 1;
        self.beliefs.insert(
            post_id,
            CacheEntry {
                belief,
                generation: self.generation,
            },
        )
    }
}

/// Per-identity, per-device like cache
///
/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct LocalLikeCache {
    user_id: UserId,
    entries: Arc<RwLock<Entries>>,
    store: Option<Arc<dyn LikeCacheStore>>,
}

impl LocalLikeCache {
    /// An empty, unpersisted cache for `user_id`
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            entries: Arc::new(RwLock::new(Entries::default())),
            store: None,
        }
    }

    /// Load the cache for `user_id` from device storage
    ///
    /// Loaded entries are marked [`BeliefSource::Persisted`].
    pub async fn load(user_id: UserId, store: Arc<dyn LikeCacheStore>) -> Result<Self> {
        let liked = store.load(&user_id).await?;
        debug!("Loaded {} persisted like(s) for {}", liked.len(), user_id);

        let beliefs = liked
            .into_iter()
            .map(|post_id| {
                (
                    post_id,
                    CacheEntry {
                        belief: LikeBelief {
                            liked: true,
                            source: BeliefSource::Persisted,
                        },
                        generation: 0,
                    },
                )
            })
            .collect();

        Ok(Self {
            user_id,
            entries: Arc::new(RwLock::new(Entries {
                beliefs,
                generation: 0,
            })),
            store: Some(store),
        })
    }

    /// The identity this cache belongs to
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Whether two handles share the same entries
    pub fn same_cache(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached belief, for immediate UI feedback only
    pub fn is_liked(&self, post_id: &PostId) -> bool {
        self.read()
            .beliefs
            .get(post_id)
            .is_some_and(|entry| entry.belief.liked)
    }

    /// The full cached belief, if any
    pub fn belief(&self, post_id: &PostId) -> Option<LikeBelief> {
        self.read().beliefs.get(post_id).map(|entry| entry.belief)
    }

    pub(crate) fn entry(&self, post_id: &PostId) -> Option<CacheEntry> {
        self.read().beliefs.get(post_id).copied()
    }

    /// Generation of the latest write
    ///
    /// Capture it before reading memberships for [`rebuild`](Self::rebuild).
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Record a guess before the engagement store confirms it
    pub fn mark_optimistic(&self, post_id: &PostId, liked: bool) {
        self.write().record(
            post_id.clone(),
            LikeBelief {
                liked,
                source: BeliefSource::Optimistic,
            },
        );
    }

    /// Overwrite the belief with the authoritative value
    ///
    /// Returns `true` when the previous belief disagreed.
    pub fn reconcile(&self, post_id: &PostId, authoritative_liked: bool) -> bool {
        let previous = self.write().record(
            post_id.clone(),
            LikeBelief {
                liked: authoritative_liked,
                source: BeliefSource::Authoritative,
            },
        );
        let disagreed = previous.is_some_and(|entry| entry.belief.liked != authoritative_liked);
        if disagreed {
            debug!(
                "Corrected local like for {} on {} to {}",
                self.user_id, post_id, authoritative_liked
            );
        }
        disagreed
    }

    /// Put back an entry captured before an optimistic update
    ///
    /// The entry keeps the generation it was originally written at.
    pub(crate) fn restore(&self, post_id: &PostId, prior: Option<CacheEntry>) {
        let mut entries = self.write();
        match prior {
            Some(entry) => {
                entries.beliefs.insert(post_id.clone(), entry);
            }
            None => {
                entries.beliefs.remove(post_id);
            }
        }
    }

    /// Drop the entry for a post
    pub fn forget(&self, post_id: &PostId) {
        if self.write().beliefs.remove(post_id).is_some() {
            debug!("Forgot local like for {} on {}", self.user_id, post_id);
        }
    }

    /// Replace settled entries with memberships read after `since`
    ///
    /// Optimistic entries belong to in-flight toggles and are left for
    /// those toggles to reconcile. Entries written after generation `since`
    /// are newer than the memberships and are kept. Any other entry not
    /// covered by `authoritative` is dropped.
    pub fn rebuild<I>(&self, since: u64, authoritative: I)
    where
        I: IntoIterator<Item = (PostId, bool)>,
    {
        let mut entries = self.write();
        entries.beliefs.retain(|_, entry| {
            entry.belief.source == BeliefSource::Optimistic || entry.generation > since
        });
        for (post_id, liked) in authoritative {
            if entries.beliefs.contains_key(&post_id) {
                continue;
            }
            entries.record(
                post_id,
                LikeBelief {
                    liked,
                    source: BeliefSource::Authoritative,
                },
            );
        }
    }

    /// Every post with a cached entry
    pub fn tracked_posts(&self) -> Vec<PostId> {
        let mut posts: Vec<PostId> = self.read().beliefs.keys().cloned().collect();
        posts.sort();
        posts
    }

    /// Settled liked posts (in-flight optimistic guesses excluded)
    pub fn liked_posts(&self) -> Vec<PostId> {
        let mut posts: Vec<PostId> = self
            .read()
            .beliefs
            .iter()
            .filter(|(_, entry)| {
                entry.belief.liked && entry.belief.source != BeliefSource::Optimistic
            })
            .map(|(post_id, _)| post_id.clone())
            .collect();
        posts.sort();
        posts
    }

    /// Write settled liked posts to device storage
    ///
    /// No-op for an unpersisted cache.
    pub async fn persist(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let liked = self.liked_posts();
        store.save(&self.user_id, &liked).await?;
        debug!("Persisted {} like(s) for {}", liked.len(), self.user_id);
        Ok(())
    }

    /// Drop every settled entry here and in device storage
    ///
    /// In-flight optimistic entries stay until their toggles resolve.
    pub async fn clear(&self) -> Result<()> {
        self.write()
            .beliefs
            .retain(|_, entry| entry.belief.source == BeliefSource::Optimistic);
        if let Some(store) = &self.store {
            store.clear(&self.user_id).await?;
        }
        debug!("Cleared local likes for {}", self.user_id);
        Ok(())
    }
}
