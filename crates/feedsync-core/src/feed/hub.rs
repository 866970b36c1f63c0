//! Feed hub: sequencing and fan-out of committed changes
//!
//! One mutex guards the authoritative view, the sequence counter and the
//! broadcast sender. Every change is applied, numbered and sent under it,
//! and every new subscription copies the view and registers its receiver
//! under it, so a snapshot plus the deltas after it never miss or repeat a
//! change.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::subscription::FeedSubscription;
use super::view::{FeedChange, FeedDelta, FeedSnapshot, FeedView, PostSummary};
use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::events::{ControllerEvent, EventEmitter};
use crate::reconcile::CommitSink;
use crate::traits::{LikeResult, PostId};

struct HubState {
    view: FeedView,
    seq: u64,
    /// `None` once the feed is closed
    tx: Option<broadcast::Sender<FeedDelta>>,
}

pub(crate) struct FeedHub {
    state: Mutex<HubState>,
    snapshot_limit: Option<usize>,
    events: EventEmitter,
    next_subscriber_id: AtomicU64,
}

impl FeedHub {
    pub(crate) fn new(view: FeedView, config: &FeedConfig, events: EventEmitter) -> Arc<Self> {
        let (tx, _) = broadcast::channel(config.broadcast_capacity);
        Arc::new(Self {
            state: Mutex::new(HubState {
                view,
                seq: 0,
                tx: Some(tx),
            }),
            snapshot_limit: config.snapshot_limit,
            events,
            next_subscriber_id: AtomicU64::new(1),
        })
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply, number and broadcast a change
    ///
    /// Returns the assigned sequence number, or `None` if the change did not
    /// touch the feed (unknown post) or the feed is closed.
    pub(crate) fn publish(&self, change: FeedChange) -> Option<u64> {
        let mut state = self.state();
        if state.tx.is_none() {
            debug!("Feed closed, dropping change for {}", change.post_id());
            return None;
        }
        if !state.view.apply(&change) {
            debug!("Change for {} does not touch the feed", change.post_id());
            return None;
        }

        state.seq += 1;
        let seq = state.seq;
        if let Some(tx) = &state.tx {
            // No receivers is fine; the view still moved
            let _ = tx.send(FeedDelta { seq, change });
        }
        Some(seq)
    }

    /// Register a new observer
    pub(crate) fn subscribe(self: &Arc<Self>) -> Result<FeedSubscription> {
        let (view, seq, rx) = {
            let state = self.state();
            let Some(tx) = &state.tx else {
                return Err(Error::subscription_lost("feed is closed"));
            };
            (
                state.view.truncated(self.snapshot_limit),
                state.seq,
                tx.subscribe(),
            )
        };

        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        info!(
            "Subscriber {} joined at seq {} with {} post(s)",
            id,
            seq,
            view.len()
        );
        self.events
            .emit(ControllerEvent::SubscriberJoined { subscriber_id: id });

        Ok(FeedSubscription::new(id, view, seq, rx, Arc::downgrade(self)))
    }

    /// Number of live subscriptions
    pub(crate) fn subscriber_count(&self) -> usize {
        self.state()
            .tx
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// The full authoritative view
    pub(crate) fn snapshot(&self) -> FeedSnapshot {
        let state = self.state();
        FeedSnapshot {
            seq: state.seq,
            posts: state.view.posts(),
        }
    }

    /// A post in the authoritative view
    pub(crate) fn summary(&self, post_id: &PostId) -> Option<PostSummary> {
        self.state().view.get(post_id).cloned()
    }

    /// Stop fan-out; every live subscription ends with a terminal error
    pub(crate) fn close(&self) {
        if self.state().tx.take().is_some() {
            info!("Feed closed");
        }
    }

    pub(crate) fn subscriber_left(&self, subscriber_id: u64) {
        info!("Subscriber {} left", subscriber_id);
        self.events
            .emit(ControllerEvent::SubscriberLeft { subscriber_id });
    }

    pub(crate) fn subscriber_lagged(&self, subscriber_id: u64, skipped: u64) {
        warn!(
            "Subscriber {} fell behind by {} change(s), terminating its subscription",
            subscriber_id, skipped
        );
        self.events.emit(ControllerEvent::SubscriberLagged {
            subscriber_id,
            skipped,
        });
    }
}

impl CommitSink for FeedHub {
    fn like_committed(&self, result: &LikeResult) {
        self.publish(FeedChange::LikeCountChanged {
            post_id: result.post_id.clone(),
            like_count: result.like_count,
        });
    }

    fn post_announced(&self, summary: PostSummary) {
        let post_id = summary.id.clone();
        if self.publish(FeedChange::PostAdded { post: summary }).is_some() {
            self.events.emit(ControllerEvent::PostPublished { post_id });
        }
    }

    fn post_retired(&self, post_id: &PostId) -> bool {
        let removed = self
            .publish(FeedChange::PostRemoved {
                post_id: post_id.clone(),
            })
            .is_some();
        if removed {
            self.events.emit(ControllerEvent::PostRetired {
                post_id: post_id.clone(),
            });
        }
        removed
    }
}
