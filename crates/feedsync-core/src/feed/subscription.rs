//! Per-observer feed stream
//!
//! A subscription yields its snapshot first, then every later change that
//! touches its window. It keeps its own copy of the view so a truncated
//! window ("latest N posts") filters deltas the same way the observer's
//! rendering does.

use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll, ready};
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::debug;

use super::hub::FeedHub;
use super::view::{FeedDelta, FeedEvent, FeedSnapshot, FeedView};
use crate::error::{Error, Result};

/// A live feed subscription
///
/// Implements [`Stream`]: the first item is a [`FeedEvent::Snapshot`],
/// followed by [`FeedEvent::Delta`]s with strictly increasing `seq`. If the
/// observer falls too far behind or the feed closes, the stream yields one
/// `Err(Error::SubscriptionLost)` and then ends; call
/// [`resubscribe`](Self::resubscribe) for a fresh snapshot.
///
/// Dropping the subscription releases it.
pub struct FeedSubscription {
    id: u64,
    pending_snapshot: Option<FeedSnapshot>,
    view: FeedView,
    last_seq: u64,
    deltas: Option<BroadcastStream<FeedDelta>>,
    hub: Weak<FeedHub>,
    released: bool,
}

impl FeedSubscription {
    pub(crate) fn new(
        id: u64,
        view: FeedView,
        seq: u64,
        rx: broadcast::Receiver<FeedDelta>,
        hub: Weak<FeedHub>,
    ) -> Self {
        Self {
            id,
            pending_snapshot: Some(FeedSnapshot {
                seq,
                posts: view.posts(),
            }),
            view,
            last_seq: seq,
            deltas: Some(BroadcastStream::new(rx)),
            hub,
            released: false,
        }
    }

    /// Identifier used in controller events
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the stream can still yield items
    pub fn is_active(&self) -> bool {
        self.pending_snapshot.is_some() || self.deltas.is_some()
    }

    /// The observer's window after everything yielded so far
    pub fn view(&self) -> &FeedView {
        &self.view
    }

    /// Sequence number of the last change reflected in [`view`](Self::view)
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Stop receiving changes
    ///
    /// Takes effect immediately: nothing is yielded afterwards, and the
    /// controller's subscriber count drops. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        self.release();
    }

    /// Open a fresh subscription on the same feed
    pub fn resubscribe(&self) -> Result<FeedSubscription> {
        let hub = self
            .hub
            .upgrade()
            .ok_or_else(|| Error::subscription_lost("feed is closed"))?;
        hub.subscribe()
    }

    fn release(&mut self) {
        self.pending_snapshot = None;
        self.deltas = None;
        if self.released {
            return;
        }
        self.released = true;
        match self.hub.upgrade() {
            Some(hub) => hub.subscriber_left(self.id),
            None => debug!("Subscriber {} released after feed shutdown", self.id),
        }
    }
}

impl Stream for FeedSubscription {
    type Item = Result<FeedEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if let Some(snapshot) = this.pending_snapshot.take() {
            return Poll::Ready(Some(Ok(FeedEvent::Snapshot(snapshot))));
        }

        loop {
            let Some(deltas) = this.deltas.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(Pin::new(deltas).poll_next(cx)) {
                Some(Ok(delta)) => {
                    if delta.seq <= this.last_seq {
                        continue;
                    }
                    this.last_seq = delta.seq;
                    // Changes outside this observer's window are not delivered
                    if this.view.apply(&delta.change) {
                        return Poll::Ready(Some(Ok(FeedEvent::Delta(delta))));
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    if let Some(hub) = this.hub.upgrade() {
                        hub.subscriber_lagged(this.id, skipped);
                    }
                    this.release();
                    return Poll::Ready(Some(Err(Error::subscription_lost(format!(
                        "subscriber {} missed {} change(s)",
                        this.id, skipped
                    )))));
                }
                None => {
                    this.release();
                    return Poll::Ready(Some(Err(Error::subscription_lost("feed is closed"))));
                }
            }
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("id", &self.id)
            .field("last_seq", &self.last_seq)
            .field("posts", &self.view.len())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::events::EventEmitter;
    use crate::feed::view::{FeedChange, PostSummary};
    use crate::traits::{PostId, UserId};
    use chrono::DateTime;
    use std::sync::Arc;
    use tokio_stream::StreamExt;

    fn summary(id: &str, secs: i64) -> PostSummary {
        PostSummary {
            id: PostId::new(id),
            title: id.to_string(),
            excerpt: String::new(),
            author_id: UserId::new("author"),
            created_at: DateTime::from_timestamp(secs, 0).unwrap(),
            like_count: 0,
        }
    }

    fn hub_with(config: FeedConfig, posts: Vec<PostSummary>) -> Arc<FeedHub> {
        let (events, _rx) = EventEmitter::channel(64);
        FeedHub::new(FeedView::from_summaries(posts, None), &config, events)
    }

    #[tokio::test]
    async fn test_snapshot_then_deltas() {
        let hub = hub_with(FeedConfig::default(), vec![summary("p1", 100)]);
        let mut sub = hub.subscribe().unwrap();

        hub.publish(FeedChange::LikeCountChanged {
            post_id: PostId::new("p1"),
            like_count: 1,
        });

        match sub.next().await {
            Some(Ok(FeedEvent::Snapshot(snapshot))) => {
                assert_eq!(snapshot.seq, 0);
                assert_eq!(snapshot.posts.len(), 1);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
        match sub.next().await {
            Some(Ok(FeedEvent::Delta(delta))) => assert_eq!(delta.seq, 1),
            other => panic!("expected delta, got {:?}", other),
        }
        assert_eq!(sub.view().get(&PostId::new("p1")).map(|p| p.like_count), Some(1));
    }

    #[tokio::test]
    async fn test_window_filters_changes_outside_it() {
        let config = FeedConfig {
            snapshot_limit: Some(1),
            ..FeedConfig::default()
        };
        let hub = hub_with(config, vec![summary("old", 100), summary("new", 200)]);
        let mut sub = hub.subscribe().unwrap();

        hub.publish(FeedChange::LikeCountChanged {
            post_id: PostId::new("old"),
            like_count: 4,
        });
        hub.publish(FeedChange::LikeCountChanged {
            post_id: PostId::new("new"),
            like_count: 2,
        });

        assert!(matches!(sub.next().await, Some(Ok(FeedEvent::Snapshot(_)))));
        match sub.next().await {
            Some(Ok(FeedEvent::Delta(delta))) => {
                assert_eq!(delta.seq, 2);
                assert_eq!(delta.change.post_id(), &PostId::new("new"));
            }
            other => panic!("expected delta, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lag_is_terminal() {
        let config = FeedConfig {
            broadcast_capacity: 2,
            ..FeedConfig::default()
        };
        let hub = hub_with(config, vec![summary("p1", 100)]);
        let mut sub = hub.subscribe().unwrap();
        assert!(matches!(sub.next().await, Some(Ok(FeedEvent::Snapshot(_)))));

        for count in 1..=5 {
            hub.publish(FeedChange::LikeCountChanged {
                post_id: PostId::new("p1"),
                like_count: count,
            });
        }

        assert!(matches!(
            sub.next().await,
            Some(Err(Error::SubscriptionLost(_)))
        ));
        assert!(sub.next().await.is_none());
        assert!(!sub.is_active());
        assert_eq!(hub.subscriber_count(), 0);

        let mut fresh = sub.resubscribe().unwrap();
        match fresh.next().await {
            Some(Ok(FeedEvent::Snapshot(snapshot))) => {
                assert_eq!(snapshot.seq, 5);
                assert_eq!(snapshot.posts[0].like_count, 5);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_feed_ends_with_error() {
        let hub = hub_with(FeedConfig::default(), vec![]);
        let mut sub = hub.subscribe().unwrap();
        assert!(matches!(sub.next().await, Some(Ok(FeedEvent::Snapshot(_)))));

        hub.close();

        assert!(matches!(
            sub.next().await,
            Some(Err(Error::SubscriptionLost(_)))
        ));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_receiver() {
        let hub = hub_with(FeedConfig::default(), vec![]);
        let mut sub = hub.subscribe().unwrap();
        assert_eq!(hub.subscriber_count(), 1);

        sub.unsubscribe();
        sub.unsubscribe();

        assert_eq!(hub.subscriber_count(), 0);
        assert!(sub.next().await.is_none());
    }
}
