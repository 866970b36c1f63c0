//! Live feed: ordered view, deltas and subscriptions

pub(crate) mod hub;
mod subscription;
pub mod view;

pub use subscription::FeedSubscription;
pub use view::{
    EXCERPT_CHARS, FeedChange, FeedDelta, FeedEvent, FeedSnapshot, FeedView, PostSummary,
};
