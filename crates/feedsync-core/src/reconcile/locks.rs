//! Per-post single-writer locks
//!
//! One async mutex per post. Holding it is the only way to write likes,
//! announce, or retire that post, so all feed-visible changes to a post
//! are committed and published in one order. Posts never contend with
//! each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

use crate::traits::{LikeResult, PostId};

/// State guarded by a post's lock
#[derive(Debug, Default)]
pub(crate) struct PostSlot {
    /// Revision of the last commit seen under this lock
    pub(crate) last_revision: Option<u64>,
}

impl PostSlot {
    /// Whether `result` is older than a commit already seen under this lock
    pub(crate) fn is_stale(&self, result: &LikeResult) -> bool {
        match self.last_revision {
            Some(last) => {
                result.revision < last || (result.changed && result.revision <= last)
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PostLocks {
    slots: Mutex<HashMap<PostId, Arc<tokio::sync::Mutex<PostSlot>>>>,
}

impl PostLocks {
    /// Wait for exclusive access to `post_id`
    pub(crate) async fn lock(&self, post_id: &PostId) -> OwnedMutexGuard<PostSlot> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(post_id.clone()).or_default())
        };
        slot.lock_owned().await
    }

    /// Drop the slot of a retired post
    pub(crate) fn forget(&self, post_id: &PostId) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(post_id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
