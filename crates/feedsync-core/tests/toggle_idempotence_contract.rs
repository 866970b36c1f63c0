//! Contract Test: Toggle Idempotence & Coalescing
//!
//! Toggles by one user on one post compose like a boolean flip, whether
//! they resolve one after another or pile up while a write is in flight.
//!
//! Constraints verified:
//! - toggle-toggle = identity, toggle x3 = toggle
//! - Rapid toggles during an in-flight write are coalesced: only the final
//!   intent is applied, every caller gets the same outcome
//! - Joined toggles do not flip the local cache while the write is in flight
//!
//! If this test fails, double clicks can double-toggle.

mod common;

use common::*;
use feedsync_core::config::FeedSyncConfig;
use feedsync_core::events::{ControllerEvent, ToggleState};
use feedsync_core::feed::FeedChange;
use feedsync_core::traits::PostId;
use std::sync::Arc;
use tokio_test::{assert_pending, task};

#[tokio::test]
async fn toggle_twice_is_identity() {
    // Scenario A
    let fixture = Fixture::new(FeedSyncConfig::default(), &[("p", 100)]).await;
    let session = fixture.session("u").await;
    let post = PostId::new("p");

    let first = session.toggle_like(&post).await.unwrap();
    assert!(first.liked);
    assert_eq!(first.like_count, 1);
    let membership = fixture.controller.membership(&post).await.unwrap();
    assert!(membership.contains(session.user_id()));

    let second = session.toggle_like(&post).await.unwrap();
    assert!(!second.liked);
    assert_eq!(second.like_count, 0);

    let membership = fixture.controller.membership(&post).await.unwrap();
    assert!(membership.liked_by.is_empty());
    assert!(!session.is_liked_locally(&post));
}

#[tokio::test]
async fn toggle_three_times_is_one_toggle() {
    let fixture = Fixture::new(FeedSyncConfig::default(), &[("p", 100)]).await;
    let session = fixture.session("u").await;
    let post = PostId::new("p");

    for _ in 0..3 {
        session.toggle_like(&post).await.unwrap();
    }

    let membership = fixture.controller.membership(&post).await.unwrap();
    assert_eq!(membership.like_count, 1);
    assert!(session.is_liked_locally(&post));
}

async fn gated_fixture() -> (Fixture, Arc<ControlledEngagementStore>) {
    let posts = seeded_posts(&[("p", 100)]).await;
    let store = Arc::new(ControlledEngagementStore::gated(posts.clone()));
    let fixture = Fixture::with_engagement(
        posts,
        Arc::new(ControlledEngagementStore::sharing_counters_with(&store)),
        FeedSyncConfig::default(),
    )
    .await;
    (fixture, store)
}

#[tokio::test]
async fn even_number_of_joined_toggles_cancels_out() {
    let (fixture, store) = gated_fixture().await;
    let session = fixture.session("u").await;
    let post = PostId::new("p");

    let mut first = task::spawn(session.toggle_like(&post));
    assert_pending!(first.poll());
    store.wait_for_writes(1).await;
    assert!(session.is_liked_locally(&post), "optimistic like shown");

    let mut second = task::spawn(session.toggle_like(&post));
    let mut third = task::spawn(session.toggle_like(&post));
    assert_pending!(second.poll());
    assert_pending!(third.poll());
    assert!(session.is_liked_locally(&post), "joined toggles do not flicker");

    store.release(10);

    let results = [first.await.unwrap(), second.await.unwrap(), third.await.unwrap()];
    for result in &results {
        assert!(result.liked);
        assert_eq!(result.like_count, 1);
    }
    assert_eq!(store.toggle_calls(), 1);
    assert_eq!(store.set_calls(), 0);
    assert!(session.is_liked_locally(&post));
}

#[tokio::test]
async fn odd_number_of_joined_toggles_applies_final_intent() {
    let (fixture, store) = gated_fixture().await;
    let session = fixture.session("u").await;
    let post = PostId::new("p");
    let mut subscription = fixture.controller.subscribe_feed().unwrap();
    expect_snapshot(&mut subscription).await;

    let mut first = task::spawn(session.toggle_like(&post));
    assert_pending!(first.poll());
    store.wait_for_writes(1).await;

    let mut second = task::spawn(session.toggle_like(&post));
    assert_pending!(second.poll());

    store.release(10);

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert_eq!(first, second);
    assert!(!first.liked);
    assert_eq!(first.like_count, 0);

    // One toggle, then one absolute write for the final intent
    assert_eq!(store.toggle_calls(), 1);
    assert_eq!(store.set_calls(), 1);
    assert!(!session.is_liked_locally(&post));

    // Both commits reach the feed in order
    let delta = expect_delta(&mut subscription).await;
    assert_eq!(
        delta.change,
        FeedChange::LikeCountChanged {
            post_id: post.clone(),
            like_count: 1
        }
    );
    let delta = expect_delta(&mut subscription).await;
    assert_eq!(
        delta.change,
        FeedChange::LikeCountChanged {
            post_id: post.clone(),
            like_count: 0
        }
    );
}

#[tokio::test]
async fn every_request_reaches_a_terminal_state() {
    let (mut fixture, store) = gated_fixture().await;
    let session = fixture.session("u").await;
    let post = PostId::new("p");

    let mut first = task::spawn(session.toggle_like(&post));
    assert_pending!(first.poll());
    store.wait_for_writes(1).await;
    let mut second = task::spawn(session.toggle_like(&post));
    assert_pending!(second.poll());

    store.release(10);
    first.await.unwrap();
    second.await.unwrap();

    let states: Vec<ToggleState> = fixture
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            ControllerEvent::ToggleStateChanged { state, .. } => Some(state),
            _ => None,
        })
        .collect();

    let count = |wanted: ToggleState| states.iter().filter(|s| **s == wanted).count();
    assert_eq!(count(ToggleState::Requested), 2);
    assert_eq!(count(ToggleState::Confirmed), 2);
    assert_eq!(count(ToggleState::Rejected), 0);
    // Toggle write plus the final-intent write
    assert_eq!(count(ToggleState::Applying), 2);
    assert_eq!(states.last(), Some(&ToggleState::Confirmed));
    let terminal = states.iter().filter(|s| s.is_terminal()).count();
    assert_eq!(terminal, count(ToggleState::Requested));
}
