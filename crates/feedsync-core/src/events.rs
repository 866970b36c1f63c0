//! Controller events
//!
//! Externally visible lifecycle events for monitoring and logging. These
//! are separate from feed deltas: deltas go to observers, events go to
//! whoever operates the controller.

use tokio::sync::mpsc;
use tracing::warn;

use crate::traits::{PostId, UserId};

/// States of one like-toggle request
///
/// ```text
/// Requested ──► Applying ──┬──► Confirmed
///                          └──► Rejected
/// ```
///
/// Every `Requested` terminates in exactly one of `Confirmed` or `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToggleState {
    /// Intent captured, optimistic cache updated
    Requested,
    /// Dispatched to the engagement store
    Applying,
    /// Authoritative result received and reconciled
    Confirmed,
    /// The engagement store failed; optimistic state rolled back
    Rejected,
}

impl ToggleState {
    /// Whether this state ends the request
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Rejected)
    }
}

/// Events emitted by the FeedController
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Controller loaded its initial view
    Started { posts_count: usize },

    /// A toggle request moved to a new state
    ToggleStateChanged {
        post_id: PostId,
        user_id: UserId,
        state: ToggleState,
    },

    /// A toggle request was rejected
    ToggleFailed {
        post_id: PostId,
        user_id: UserId,
        error: String,
    },

    /// A new post entered the feed
    PostPublished { post_id: PostId },

    /// A post left the feed
    PostRetired { post_id: PostId },

    /// An observer subscribed
    SubscriberJoined { subscriber_id: u64 },

    /// An observer unsubscribed or was dropped
    SubscriberLeft { subscriber_id: u64 },

    /// An observer fell behind and its subscription was terminated
    SubscriberLagged { subscriber_id: u64, skipped: u64 },
}

/// Non-blocking sender for controller events
#[derive(Debug, Clone)]
pub(crate) struct EventEmitter {
    tx: mpsc::Sender<ControllerEvent>,
}

impl EventEmitter {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<ControllerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Emit an event, dropping it (with a warning) if the channel is full
    pub(crate) fn emit(&self, event: ControllerEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    "Controller event channel full, dropping {:?}. Consider increasing event_channel_capacity.",
                    event
                );
            }
            // Nobody listening; events are optional
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
