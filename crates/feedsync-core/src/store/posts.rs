// # Memory Post Store
//
// In-memory implementation of PostStore.
//
// ## Purpose
//
// Stands in for the managed document store the application publishes to.
// Used by the daemon, the demos, and every test.
//
// ## Timestamps
//
// `created_at` is assigned here and is strictly increasing: if the wall
// clock stalls or steps back, the next post is stamped one microsecond
// after the previous one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::identity::UserId;
use crate::traits::post_store::{Post, PostId, PostStore};

/// In-memory post store
///
/// # Example
///
/// ```rust,no_run
/// use feedsync_core::store::MemoryPostStore;
/// use feedsync_core::traits::{PostStore, UserId};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryPostStore::new();
///     let post = store.create_post("Hello", "First post", &UserId::new("u1")).await?;
///     assert_eq!(store.get_post(&post.id).await?.title, "Hello");
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryPostStore {
    inner: Arc<RwLock<PostTable>>,
}

#[derive(Debug, Default)]
struct PostTable {
    posts: HashMap<PostId, Post>,
    next_id: u64,
    last_created_at: Option<DateTime<Utc>>,
}

impl PostTable {
    fn allocate_id(&mut self) -> PostId {
        loop {
            self.next_id += 1;
            let id = PostId::new(format!("post-{:06}", self.next_id));
            if !self.posts.contains_key(&id) {
                return id;
            }
        }
    }

    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamped = match self.last_created_at {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(stamped);
        stamped
    }
}

impl MemoryPostStore {
    /// Create a new empty post store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a fully-formed post (fixtures, imports)
    ///
    /// The post keeps its own id and timestamp. Later posts are still
    /// stamped after the newest seeded one.
    pub async fn insert_post(&self, post: Post) {
        let mut table = self.inner.write().await;
        if table.last_created_at.is_none_or(|last| post.created_at > last) {
            table.last_created_at = Some(post.created_at);
        }
        table.posts.insert(post.id.clone(), post);
    }

    /// Number of stored posts
    pub async fn len(&self) -> usize {
        self.inner.read().await.posts.len()
    }

    /// Whether the store holds no posts
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.posts.is_empty()
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn create_post(
        &self,
        title: &str,
        content: &str,
        author_id: &UserId,
    ) -> Result<Post, Error> {
        if author_id.is_empty() {
            return Err(Error::unauthenticated("author id is empty"));
        }
        if title.trim().is_empty() {
            return Err(Error::invalid_input("post title cannot be empty"));
        }
        if content.trim().is_empty() {
            return Err(Error::invalid_input("post content cannot be empty"));
        }

        let mut table = self.inner.write().await;
        let post = Post {
            id: table.allocate_id(),
            title: title.to_string(),
            content: content.to_string(),
            author_id: author_id.clone(),
            created_at: table.stamp(),
        };
        table.posts.insert(post.id.clone(), post.clone());

        tracing::debug!("Created post {} at {}", post.id, post.created_at);
        Ok(post)
    }

    async fn list_posts(&self) -> Result<Vec<Post>, Error> {
        let table = self.inner.read().await;
        let mut posts: Vec<Post> = table.posts.values().cloned().collect();
        posts.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(posts)
    }

    async fn get_post(&self, post_id: &PostId) -> Result<Post, Error> {
        let table = self.inner.read().await;
        table
            .posts
            .get(post_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("post {}", post_id)))
    }

    async fn delete_post(&self, post_id: &PostId) -> Result<(), Error> {
        let mut table = self.inner.write().await;
        match table.posts.remove(post_id) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(format!("post {}", post_id))),
        }
    }
}
