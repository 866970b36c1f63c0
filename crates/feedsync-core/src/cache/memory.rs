// # Memory Like Cache Store
//
// In-memory implementation of LikeCacheStore.
//
// ## Purpose
//
// Session-scoped persistence: survives a `LocalLikeCache` being rebuilt
// within one process, but not a restart. Losing it is harmless; the next
// refresh re-derives every like from the engagement store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::like_cache_store::LikeCacheStore;
use crate::traits::{PostId, UserId};

/// In-memory like cache store
///
/// Stores each user's liked posts in a HashMap protected by a RwLock.
#[derive(Debug, Clone, Default)]
pub struct MemoryLikeCacheStore {
    inner: Arc<RwLock<HashMap<UserId, Vec<PostId>>>>,
}

impl MemoryLikeCacheStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with persisted likes
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether nothing is persisted
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl LikeCacheStore for MemoryLikeCacheStore {
    async fn load(&self, user_id: &UserId) -> Result<Vec<PostId>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(user_id).cloned().unwrap_or_default())
    }

    async fn save(&self, user_id: &UserId, liked: &[PostId]) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.insert(user_id.clone(), liked.to_vec());
        Ok(())
    }

    async fn clear(&self, user_id: &UserId) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.remove(user_id);
        Ok(())
    }
}
