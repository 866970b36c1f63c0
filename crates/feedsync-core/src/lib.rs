// # feedsync-core
//
// Core library for live feed synchronization with like reconciliation.
//
// ## Architecture Overview
//
// - **PostStore**: External store owning post content and creation order
// - **EngagementStore**: Authoritative like membership, one set per post
// - **LocalLikeCache**: Per-device guess of "do I like this", never trusted
// - **ReconciliationEngine**: Turns toggle intents into exactly one
//   authoritative outcome, serialized per post
// - **FeedSubscription**: Snapshot followed by ordered deltas
// - **FeedController**: Façade wiring the above for an application
//
// ## Design Principles
//
// 1. **Count is derived**: a post's like count is the size of its membership
//    set, never a separately incremented number
// 2. **Single writer per post**: every like write, announcement and removal
//    for a post happens under that post's lock
// 3. **Commit order is delivery order**: the feed hub numbers and fans out
//    changes in the order they were committed
// 4. **Library-First**: the daemon is a thin shell around this crate

pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod feed;
pub mod reconcile;
pub mod store;
pub mod traits;

// Re-export core types for convenience
pub use cache::{FileLikeCacheStore, LocalLikeCache, MemoryLikeCacheStore};
pub use config::{FeedSyncConfig, LikeCacheConfig};
pub use controller::{FeedController, FeedSession};
pub use error::{Error, Result};
pub use events::{ControllerEvent, ToggleState};
pub use feed::{FeedChange, FeedDelta, FeedEvent, FeedSnapshot, FeedSubscription, PostSummary};
pub use reconcile::ReconciliationEngine;
pub use traits::{EngagementStore, Identity, LikeCacheStore, PostStore};
