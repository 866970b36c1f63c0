//! Collaborator traits for the feed synchronization core
//!
//! This module defines the abstract interfaces the core is wired against.
//!
//! - [`PostStore`]: External store owning post content and creation order
//! - [`EngagementStore`]: Authoritative like membership and counts
//! - [`Identity`]: Current user of a session
//! - [`LikeCacheStore`]: Best-effort persistence for the local like cache

pub mod engagement_store;
pub mod identity;
pub mod like_cache_store;
pub mod post_store;

pub use engagement_store::{EngagementStore, LikeResult, Membership};
pub use identity::{Identity, UserId};
pub use like_cache_store::LikeCacheStore;
pub use post_store::{Post, PostId, PostStore};
