//! Test doubles and common utilities for feed contract tests
//!
//! The doubles wrap the in-memory engagement store so they keep its
//! contract, and add the failure modes the contracts need: failing writes,
//! writes or reads held behind a gate, stale revisions, and post creation
//! paused between the store write and the announcement.

#![allow(dead_code)]

use async_trait::async_trait;
use feedsync_core::config::FeedSyncConfig;
use feedsync_core::controller::{FeedController, FeedSession};
use feedsync_core::error::{Error, Result};
use feedsync_core::events::ControllerEvent;
use feedsync_core::feed::{FeedDelta, FeedEvent, FeedSnapshot, FeedSubscription};
use feedsync_core::store::{MemoryEngagementStore, MemoryPostStore, StaticIdentity};
use feedsync_core::traits::{
    EngagementStore, LikeResult, Membership, Post, PostId, PostStore, UserId,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio_stream::StreamExt;

/// Engagement store double with call counters, a failure switch and an
/// optional write gate
pub struct ControlledEngagementStore {
    inner: MemoryEngagementStore,
    toggle_calls: Arc<AtomicUsize>,
    set_calls: Arc<AtomicUsize>,
    writes_started: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
    /// When set, every write waits for one permit
    gate: Option<Arc<Semaphore>>,
    /// While on, every membership read is taken, then held for one permit
    hold_reads: Arc<AtomicBool>,
    read_gate: Arc<Semaphore>,
    reads_held: Arc<AtomicUsize>,
}

impl ControlledEngagementStore {
    pub fn new(posts: Arc<dyn PostStore>) -> Self {
        Self {
            inner: MemoryEngagementStore::new(posts),
            toggle_calls: Arc::new(AtomicUsize::new(0)),
            set_calls: Arc::new(AtomicUsize::new(0)),
            writes_started: Arc::new(AtomicUsize::new(0)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            gate: None,
            hold_reads: Arc::new(AtomicBool::new(false)),
            read_gate: Arc::new(Semaphore::new(0)),
            reads_held: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Hold every write until [`release`](Self::release) hands out a permit
    pub fn gated(posts: Arc<dyn PostStore>) -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new(posts)
        }
    }

    /// Create a store that shares counters and switches with another
    pub fn sharing_counters_with(other: &Arc<Self>) -> Self {
        Self {
            inner: other.inner.clone(),
            toggle_calls: Arc::clone(&other.toggle_calls),
            set_calls: Arc::clone(&other.set_calls),
            writes_started: Arc::clone(&other.writes_started),
            fail_writes: Arc::clone(&other.fail_writes),
            gate: other.gate.clone(),
            hold_reads: Arc::clone(&other.hold_reads),
            read_gate: Arc::clone(&other.read_gate),
            reads_held: Arc::clone(&other.reads_held),
        }
    }

    pub fn toggle_calls(&self) -> usize {
        self.toggle_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn writes_started(&self) -> usize {
        self.writes_started.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Let `n` gated writes proceed
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Answer membership reads late until [`release_reads`](Self::release_reads)
    ///
    /// A held read returns what the store held when it was taken.
    pub fn hold_reads(&self, hold: bool) {
        self.hold_reads.store(hold, Ordering::SeqCst);
    }

    pub fn release_reads(&self, n: usize) {
        self.read_gate.add_permits(n);
    }

    /// Wait until `n` membership reads are held
    pub async fn wait_for_held_reads(&self, n: usize) {
        for _ in 0..200 {
            if self.reads_held.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} held read(s)", n);
    }

    /// Wait until `n` writes have reached the store
    pub async fn wait_for_writes(&self, n: usize) {
        for _ in 0..200 {
            if self.writes_started() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {} write(s) to start, saw {}",
            n,
            self.writes_started()
        );
    }

    async fn before_write(&self) -> Result<()> {
        self.writes_started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| Error::other("gate closed"))?;
            permit.forget();
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::other("engagement store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl EngagementStore for ControlledEngagementStore {
    async fn toggle_like(&self, post_id: &PostId, user_id: &UserId) -> Result<LikeResult> {
        self.toggle_calls.fetch_add(1, Ordering::SeqCst);
        self.before_write().await?;
        self.inner.toggle_like(post_id, user_id).await
    }

    async fn set_like(&self, post_id: &PostId, user_id: &UserId, liked: bool) -> Result<LikeResult> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.before_write().await?;
        self.inner.set_like(post_id, user_id, liked).await
    }

    async fn get_membership(&self, post_id: &PostId) -> Result<Membership> {
        let membership = self.inner.get_membership(post_id).await?;
        if self.hold_reads.load(Ordering::SeqCst) {
            self.reads_held.fetch_add(1, Ordering::SeqCst);
            let permit = self
                .read_gate
                .acquire()
                .await
                .map_err(|_| Error::other("read gate closed"))?;
            permit.forget();
        }
        Ok(membership)
    }

    async fn remove_post(&self, post_id: &PostId) -> Result<()> {
        self.inner.remove_post(post_id).await
    }
}

/// Post store that stops after each create, before returning the post
///
/// The post is already stored while the create is paused.
pub struct PausingPostStore {
    inner: MemoryPostStore,
    resume: Semaphore,
    paused: AtomicUsize,
}

impl PausingPostStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryPostStore::new(),
            resume: Semaphore::new(0),
            paused: AtomicUsize::new(0),
        }
    }

    /// Let one paused create return
    pub fn resume_create(&self) {
        self.resume.add_permits(1);
    }

    /// Wait until a create is paused
    pub async fn wait_for_paused_create(&self) {
        for _ in 0..200 {
            if self.paused.load(Ordering::SeqCst) >= 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no create was paused");
    }
}

#[async_trait]
impl PostStore for PausingPostStore {
    async fn create_post(&self, title: &str, content: &str, author_id: &UserId) -> Result<Post> {
        let post = self.inner.create_post(title, content, author_id).await?;
        self.paused.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .resume
            .acquire()
            .await
            .map_err(|_| Error::other("resume gate closed"))?;
        permit.forget();
        Ok(post)
    }

    async fn list_posts(&self) -> Result<Vec<Post>> {
        self.inner.list_posts().await
    }

    async fn get_post(&self, post_id: &PostId) -> Result<Post> {
        self.inner.get_post(post_id).await
    }

    async fn delete_post(&self, post_id: &PostId) -> Result<()> {
        self.inner.delete_post(post_id).await
    }
}

/// Engagement store that reports every write with revision 1
///
/// After the first commit every later one looks out of order.
pub struct StaleRevisionStore {
    inner: MemoryEngagementStore,
}

impl StaleRevisionStore {
    pub fn new(posts: Arc<dyn PostStore>) -> Self {
        Self {
            inner: MemoryEngagementStore::new(posts),
        }
    }
}

#[async_trait]
impl EngagementStore for StaleRevisionStore {
    async fn toggle_like(&self, post_id: &PostId, user_id: &UserId) -> Result<LikeResult> {
        let mut result = self.inner.toggle_like(post_id, user_id).await?;
        result.revision = 1;
        Ok(result)
    }

    async fn set_like(&self, post_id: &PostId, user_id: &UserId, liked: bool) -> Result<LikeResult> {
        let mut result = self.inner.set_like(post_id, user_id, liked).await?;
        result.revision = 1;
        Ok(result)
    }

    async fn get_membership(&self, post_id: &PostId) -> Result<Membership> {
        self.inner.get_membership(post_id).await
    }

    async fn remove_post(&self, post_id: &PostId) -> Result<()> {
        self.inner.remove_post(post_id).await
    }
}

/// A controller wired to a fresh post store
pub struct Fixture {
    pub posts: Arc<MemoryPostStore>,
    pub controller: FeedController,
    pub events: mpsc::Receiver<ControllerEvent>,
}

impl Fixture {
    /// Controller over plain in-memory stores
    pub async fn new(config: FeedSyncConfig, seed: &[(&str, i64)]) -> Self {
        let posts = seeded_posts(seed).await;
        let engagement = Arc::new(MemoryEngagementStore::new(posts.clone()));
        Self::with_engagement(posts, engagement, config).await
    }

    pub async fn with_engagement(
        posts: Arc<MemoryPostStore>,
        engagement: Arc<dyn EngagementStore>,
        config: FeedSyncConfig,
    ) -> Self {
        let (controller, events) = FeedController::new(posts.clone(), engagement, config)
            .await
            .expect("controller construction succeeds");
        Self {
            posts,
            controller,
            events,
        }
    }

    /// Session for `user` with an unpersisted cache
    pub async fn session(&self, user: &str) -> FeedSession {
        self.controller
            .open_session(Arc::new(StaticIdentity::new(user)), None)
            .await
            .expect("session opens")
    }

    /// Drain the events emitted so far
    pub fn drain_events(&mut self) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Post store seeded with `(id, created_at seconds)` posts by "author"
pub async fn seeded_posts(seed: &[(&str, i64)]) -> Arc<MemoryPostStore> {
    let posts = Arc::new(MemoryPostStore::new());
    for (id, secs) in seed {
        posts.insert_post(post(id, *secs)).await;
    }
    posts
}

pub fn post(id: &str, secs: i64) -> Post {
    Post {
        id: PostId::new(id),
        title: format!("Title of {}", id),
        content: format!("Content of {}", id),
        author_id: UserId::new("author"),
        created_at: timestamp(secs),
    }
}

pub fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("valid timestamp")
}

/// Config with a short toggle timeout
pub fn config_with_timeout(ms: u64) -> FeedSyncConfig {
    let mut config = FeedSyncConfig::default();
    config.engine.toggle_timeout_ms = ms;
    config
}

/// Next item, or panic after one second
pub async fn next_event(subscription: &mut FeedSubscription) -> Result<FeedEvent> {
    tokio::time::timeout(Duration::from_secs(1), subscription.next())
        .await
        .expect("subscription yields within a second")
        .expect("subscription has not ended")
}

pub async fn expect_snapshot(subscription: &mut FeedSubscription) -> FeedSnapshot {
    match next_event(subscription).await {
        Ok(FeedEvent::Snapshot(snapshot)) => snapshot,
        other => panic!("expected snapshot, got {:?}", other),
    }
}

pub async fn expect_delta(subscription: &mut FeedSubscription) -> FeedDelta {
    match next_event(subscription).await {
        Ok(FeedEvent::Delta(delta)) => delta,
        other => panic!("expected delta, got {:?}", other),
    }
}

pub fn ids(snapshot: &FeedSnapshot) -> Vec<String> {
    snapshot
        .posts
        .iter()
        .map(|post| post.id.as_str().to_string())
        .collect()
}
