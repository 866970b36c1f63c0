//! Ordered feed view and the delta vocabulary
//!
//! A [`FeedView`] is the ordered set of post summaries an observer sees:
//! newest `created_at` first, ties broken by ascending post id. The hub
//! keeps one unbounded view; each subscription keeps its own (optionally
//! truncated) copy and applies deltas to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use crate::traits::{Post, PostId, UserId};

/// Maximum characters of content carried in a summary
pub const EXCERPT_CHARS: usize = 150;

/// What an observer sees of a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: PostId,
    pub title: String,
    /// First [`EXCERPT_CHARS`] characters of the content
    pub excerpt: String,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
    pub like_count: u64,
}

impl PostSummary {
    /// Summarize a stored post with its current like count
    pub fn from_post(post: &Post, like_count: u64) -> Self {
        Self {
            id: post.id.clone(),
            title: post.title.clone(),
            excerpt: post.content.chars().take(EXCERPT_CHARS).collect(),
            author_id: post.author_id.clone(),
            created_at: post.created_at,
            like_count,
        }
    }
}

/// A committed change to the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedChange {
    /// A post was published
    PostAdded { post: PostSummary },
    /// A post's like count changed
    LikeCountChanged { post_id: PostId, like_count: u64 },
    /// A post was deleted
    PostRemoved { post_id: PostId },
}

impl FeedChange {
    /// The post this change concerns
    pub fn post_id(&self) -> &PostId {
        match self {
            FeedChange::PostAdded { post } => &post.id,
            FeedChange::LikeCountChanged { post_id, .. } => post_id,
            FeedChange::PostRemoved { post_id } => post_id,
        }
    }
}

/// A change stamped with its position in commit order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDelta {
    /// Commit sequence number, strictly increasing
    pub seq: u64,
    pub change: FeedChange,
}

/// Point-in-time view delivered at subscription start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    /// Sequence number of the last change reflected in `posts`
    pub seq: u64,
    /// Posts, newest first
    pub posts: Vec<PostSummary>,
}

/// Items of a feed subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedEvent {
    /// Full view, always the first item
    Snapshot(FeedSnapshot),
    /// Incremental change after the snapshot
    Delta(FeedDelta),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct FeedKey {
    newest_first: Reverse<DateTime<Utc>>,
    id: PostId,
}

impl FeedKey {
    fn of(summary: &PostSummary) -> Self {
        Self {
            newest_first: Reverse(summary.created_at),
            id: summary.id.clone(),
        }
    }
}

/// Ordered, optionally truncated set of post summaries
#[derive(Debug, Clone, Default)]
pub struct FeedView {
    entries: BTreeMap<FeedKey, PostSummary>,
    index: HashMap<PostId, FeedKey>,
    limit: Option<usize>,
}

impl FeedView {
    /// An empty view holding at most `limit` posts (unbounded if `None`)
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Build a view from summaries in any order
    pub fn from_summaries<I>(summaries: I, limit: Option<usize>) -> Self
    where
        I: IntoIterator<Item = PostSummary>,
    {
        let mut view = Self::new(limit);
        for summary in summaries {
            view.insert(summary);
        }
        view
    }

    /// Copy of the newest `limit` posts
    pub fn truncated(&self, limit: Option<usize>) -> Self {
        Self::from_summaries(
            self.entries
                .values()
                .take(limit.unwrap_or(usize::MAX))
                .cloned(),
            limit,
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, post_id: &PostId) -> Option<&PostSummary> {
        self.index.get(post_id).and_then(|key| self.entries.get(key))
    }

    /// Posts in feed order
    pub fn posts(&self) -> Vec<PostSummary> {
        self.entries.values().cloned().collect()
    }

    /// Insert or replace a post; returns whether it is inside the window
    pub fn insert(&mut self, summary: PostSummary) -> bool {
        let id = summary.id.clone();
        if let Some(old_key) = self.index.remove(&id) {
            self.entries.remove(&old_key);
        }
        let key = FeedKey::of(&summary);
        self.index.insert(id.clone(), key.clone());
        self.entries.insert(key, summary);

        if let Some(limit) = self.limit {
            while self.entries.len() > limit {
                if let Some((_, evicted)) = self.entries.pop_last() {
                    self.index.remove(&evicted.id);
                }
            }
        }
        self.index.contains_key(&id)
    }

    /// Update a post's like count; returns whether a post in view changed
    pub fn set_like_count(&mut self, post_id: &PostId, like_count: u64) -> bool {
        let Some(key) = self.index.get(post_id) else {
            return false;
        };
        match self.entries.get_mut(key) {
            Some(summary) if summary.like_count != like_count => {
                summary.like_count = like_count;
                true
            }
            _ => false,
        }
    }

    /// Remove a post; returns whether it was in view
    pub fn remove(&mut self, post_id: &PostId) -> bool {
        match self.index.remove(post_id) {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }

    /// Apply a change; returns whether it touched a post in view
    pub fn apply(&mut self, change: &FeedChange) -> bool {
        match change {
            FeedChange::PostAdded { post } => self.insert(post.clone()),
            FeedChange::LikeCountChanged { post_id, like_count } => {
                self.set_like_count(post_id, *like_count)
            }
            FeedChange::PostRemoved { post_id } => self.remove(post_id),
        }
    }
}
