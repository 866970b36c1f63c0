//! Minimal embedding example for feedsync-core
//!
//! Two people on their own devices like a post while a third screen watches
//! the feed. The application owns the controller lifecycle and plugs in its
//! own notion of "who is signed in".

use async_trait::async_trait;
use feedsync_core::config::FeedSyncConfig;
use feedsync_core::controller::FeedController;
use feedsync_core::feed::{FeedChange, FeedEvent};
use feedsync_core::store::{MemoryEngagementStore, MemoryPostStore};
use feedsync_core::traits::{Identity, PostStore, UserId};
use feedsync_core::{Error, Result};
use std::sync::{Arc, RwLock};
use tokio_stream::StreamExt;

/// Sign-in state shared with the application's login screen
struct SignedInUser {
    current: RwLock<Option<UserId>>,
}

impl SignedInUser {
    fn signed_in(user: &str) -> Self {
        Self {
            current: RwLock::new(Some(UserId::new(user))),
        }
    }

    fn sign_out(&self) {
        if let Ok(mut current) = self.current.write() {
            *current = None;
        }
    }
}

#[async_trait]
impl Identity for SignedInUser {
    async fn current_user_id(&self) -> Result<UserId> {
        self.current
            .read()
            .map_err(|_| Error::other("sign-in state poisoned"))?
            .clone()
            .ok_or_else(|| Error::unauthenticated("nobody is signed in"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let posts: Arc<dyn PostStore> = Arc::new(MemoryPostStore::new());
    let engagement = Arc::new(MemoryEngagementStore::new(Arc::clone(&posts)));

    let mut config = FeedSyncConfig::default();
    config.feed.snapshot_limit = Some(6);
    let (controller, _events) = FeedController::new(posts, engagement, config).await?;

    let alice = Arc::new(SignedInUser::signed_in("alice"));
    let bob = Arc::new(SignedInUser::signed_in("bob"));
    let alice_session = controller.open_session(alice.clone(), None).await?;
    let bob_session = controller.open_session(bob.clone(), None).await?;

    let post = alice_session
        .publish_post("Hello feed", "The first post on this board.")
        .await?;

    let mut screen = controller.subscribe_feed()?;

    let (a, b) = tokio::join!(
        alice_session.toggle_like(&post.id),
        bob_session.toggle_like(&post.id)
    );
    println!("alice liked: {}, bob liked: {}", a?.liked, b?.liked);

    // Second tap from bob takes it back
    bob_session.toggle_like(&post.id).await?;

    let mut seen = 0;
    while seen < 4 {
        let Some(event) = screen.next().await else {
            break;
        };
        seen += 1;
        match event? {
            FeedEvent::Snapshot(snapshot) => {
                println!("snapshot @{}: {} post(s)", snapshot.seq, snapshot.posts.len())
            }
            FeedEvent::Delta(delta) => match delta.change {
                FeedChange::LikeCountChanged {
                    post_id,
                    like_count,
                } => println!("@{} {} has {} like(s)", delta.seq, post_id, like_count),
                other => println!("@{} {:?}", delta.seq, other),
            },
        }
    }

    bob.sign_out();
    match bob_session.toggle_like(&post.id).await {
        Err(Error::Unauthenticated(reason)) => println!("bob is signed out: {}", reason),
        other => println!("unexpected: {:?}", other),
    }

    let membership = controller.membership(&post.id).await?;
    println!(
        "final: {} like(s) from {:?}",
        membership.like_count, membership.liked_by
    );

    screen.unsubscribe();
    controller.shutdown();
    Ok(())
}
