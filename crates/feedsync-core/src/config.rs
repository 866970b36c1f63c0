//! Configuration types for the feed synchronization core
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main FeedSync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSyncConfig {
    /// Reconciliation engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Feed fan-out settings
    #[serde(default)]
    pub feed: FeedConfig,

    /// Device-local like cache storage
    #[serde(default)]
    pub cache: LikeCacheConfig,

    /// Capacity of the controller event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl FeedSyncConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            engine: EngineConfig::default(),
            feed: FeedConfig::default(),
            cache: LikeCacheConfig::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.engine.validate()?;
        self.feed.validate()?;
        self.cache.validate()?;

        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }

        Ok(())
    }
}

impl Default for FeedSyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on one like write, lock wait included (in milliseconds)
    ///
    /// A toggle that does not resolve in time is rejected with a timeout
    /// error and its optimistic cache entry is rolled back.
    #[serde(default = "default_toggle_timeout_ms")]
    pub toggle_timeout_ms: u64,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.toggle_timeout_ms == 0 {
            return Err(crate::Error::config("Toggle timeout must be > 0"));
        }
        Ok(())
    }

    /// The toggle timeout as a duration
    pub fn toggle_timeout(&self) -> Duration {
        Duration::from_millis(self.toggle_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            toggle_timeout_ms: default_toggle_timeout_ms(),
        }
    }
}

/// Feed fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Keep only the newest N posts in each observer's window
    ///
    /// `None` shows every post.
    #[serde(default)]
    pub snapshot_limit: Option<usize>,

    /// Deltas buffered per observer before it is dropped as lagged
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl FeedConfig {
    /// Validate the feed configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.snapshot_limit == Some(0) {
            return Err(crate::Error::config("Snapshot limit must be > 0 when set"));
        }
        if self.broadcast_capacity == 0 {
            return Err(crate::Error::config("Broadcast capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            snapshot_limit: None,
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

/// Like cache storage configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LikeCacheConfig {
    /// In-memory store (lost on exit)
    #[default]
    Memory,

    /// File-based store
    File {
        /// Path to the cache file
        path: String,
    },
}

impl LikeCacheConfig {
    /// Validate the cache configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            LikeCacheConfig::File { path } if path.trim().is_empty() => Err(
                crate::Error::config("File like cache path cannot be empty"),
            ),
            _ => Ok(()),
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            LikeCacheConfig::Memory => "memory",
            LikeCacheConfig::File { .. } => "file",
        }
    }
}

fn default_toggle_timeout_ms() -> u64 {
    5000
}

fn default_broadcast_capacity() -> usize {
    1024
}

fn default_event_channel_capacity() -> usize {
    1000
}
