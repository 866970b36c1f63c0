// # feedsyncd - Feed Synchronization Daemon
//
// Thin integration layer: reads configuration from the environment, starts
// the runtime, wires in-memory collaborator stores into a FeedController
// and logs the live feed until asked to stop. All feed and like logic lives
// in feedsync-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Session
// - `FEEDSYNC_USER_ID`: Identity of the daemon's own session (default: feedsyncd)
//
// ### Engine
// - `FEEDSYNC_TOGGLE_TIMEOUT_MS`: Bound on one like write, in milliseconds
//
// ### Feed
// - `FEEDSYNC_SNAPSHOT_LIMIT`: Keep only the newest N posts per observer
// - `FEEDSYNC_BROADCAST_CAPACITY`: Deltas buffered per observer
//
// ### Like Cache
// - `FEEDSYNC_CACHE_TYPE`: Type of like cache store (memory, file)
// - `FEEDSYNC_CACHE_PATH`: Path to the cache file (for file store)
//
// ### Logging
// - `FEEDSYNC_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export FEEDSYNC_USER_ID=operator
// export FEEDSYNC_SNAPSHOT_LIMIT=6
// export FEEDSYNC_CACHE_TYPE=file
// export FEEDSYNC_CACHE_PATH=/var/lib/feedsync/likes.json
//
// feedsyncd
// ```

use anyhow::{Context, Result};
use feedsync_core::cache;
use feedsync_core::config::{FeedSyncConfig, LikeCacheConfig};
use feedsync_core::controller::{FeedController, FeedSession};
use feedsync_core::events::ControllerEvent;
use feedsync_core::feed::{FeedChange, FeedEvent};
use feedsync_core::store::{MemoryEngagementStore, MemoryPostStore, StaticIdentity};
use feedsync_core::traits::PostStore;
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Upper bound on draining background tasks after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum FeedSyncExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<FeedSyncExitCode> for ExitCode {
    fn from(code: FeedSyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    user_id: String,
    toggle_timeout_ms: Option<u64>,
    snapshot_limit: Option<usize>,
    broadcast_capacity: Option<usize>,
    cache_type: String,
    cache_path: Option<String>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            user_id: env::var("FEEDSYNC_USER_ID").unwrap_or_else(|_| "feedsyncd".to_string()),
            toggle_timeout_ms: parse_var("FEEDSYNC_TOGGLE_TIMEOUT_MS")?,
            snapshot_limit: parse_var("FEEDSYNC_SNAPSHOT_LIMIT")?,
            broadcast_capacity: parse_var("FEEDSYNC_BROADCAST_CAPACITY")?,
            cache_type: env::var("FEEDSYNC_CACHE_TYPE").unwrap_or_else(|_| "memory".to_string()),
            cache_path: env::var("FEEDSYNC_CACHE_PATH").ok(),
            log_level: env::var("FEEDSYNC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            anyhow::bail!("FEEDSYNC_USER_ID cannot be empty");
        }

        match self.cache_type.as_str() {
            "memory" => {}
            "file" => {
                if self.cache_path.as_ref().is_none_or(|p| p.trim().is_empty()) {
                    anyhow::bail!(
                        "FEEDSYNC_CACHE_PATH is required when FEEDSYNC_CACHE_TYPE=file. \
                        Set it via: export FEEDSYNC_CACHE_PATH=/var/lib/feedsync/likes.json"
                    );
                }
            }
            _ => anyhow::bail!(
                "FEEDSYNC_CACHE_TYPE '{}' is not supported. \
                Supported types: memory, file",
                self.cache_type
            ),
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "FEEDSYNC_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        // Range checks shared with library users
        self.to_feedsync_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    fn to_feedsync_config(&self) -> FeedSyncConfig {
        let mut config = FeedSyncConfig::default();
        if let Some(ms) = self.toggle_timeout_ms {
            config.engine.toggle_timeout_ms = ms;
        }
        config.feed.snapshot_limit = self.snapshot_limit;
        if let Some(capacity) = self.broadcast_capacity {
            config.feed.broadcast_capacity = capacity;
        }
        config.cache = match (self.cache_type.as_str(), &self.cache_path) {
            ("file", Some(path)) => LikeCacheConfig::File { path: path.clone() },
            _ => LikeCacheConfig::Memory,
        };
        config
    }

    fn log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Parse an optional numeric environment variable
///
/// Unset means `None`; a value that does not parse is an error.
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} '{}' is not a valid number: {}", name, raw, e)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(anyhow::anyhow!("{}: {}", name, e)),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return FeedSyncExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return FeedSyncExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return FeedSyncExitCode::ConfigError.into();
    }

    info!("Starting feedsyncd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return FeedSyncExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config).await {
            error!("Daemon error: {:#}", e);
            FeedSyncExitCode::RuntimeError
        } else {
            FeedSyncExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> Result<()> {
    let feed_config = config.to_feedsync_config();
    info!(
        "Like cache: {}, toggle timeout: {:?}, snapshot limit: {:?}",
        feed_config.cache.type_name(),
        feed_config.engine.toggle_timeout(),
        feed_config.feed.snapshot_limit
    );

    let posts: Arc<dyn PostStore> = Arc::new(MemoryPostStore::new());
    let engagement = Arc::new(MemoryEngagementStore::new(Arc::clone(&posts)));
    let cache_store = cache::open_store(&feed_config.cache)
        .await
        .context("opening like cache store")?;

    let (controller, events) = FeedController::new(posts, engagement, feed_config)
        .await
        .context("starting feed controller")?;

    let session = controller
        .open_session(
            Arc::new(StaticIdentity::new(config.user_id.as_str())),
            Some(cache_store),
        )
        .await
        .context("opening daemon session")?;
    let liked = session
        .refresh_likes()
        .await
        .context("refreshing cached likes")?;
    info!("Session for {} ready, {} liked post(s)", session.user_id(), liked);

    let event_task = tokio::spawn(log_events(events));
    let feed_task = tokio::spawn(log_feed(controller.clone()));

    info!("Daemon initialized successfully");

    let signal = wait_for_shutdown_signal().await?;
    info!("Received shutdown signal: {}", signal);
    info!("Shutting down daemon");

    shutdown(&controller, &session).await?;

    // Closing the feed ends the feed logger; dropping the controller ends
    // the event stream once in-flight toggles finish
    drop(controller);
    drop(session);
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = feed_task.await;
        let _ = event_task.await;
    })
    .await;
    if drained.is_err() {
        warn!("Background tasks did not finish within {:?}", SHUTDOWN_TIMEOUT);
    }

    Ok(())
}

async fn shutdown(controller: &FeedController, session: &FeedSession) -> Result<()> {
    session
        .persist_likes()
        .await
        .context("persisting likes on shutdown")?;
    controller.shutdown();
    Ok(())
}

/// Log every controller event until the controller is gone
async fn log_events(mut events: mpsc::Receiver<ControllerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ControllerEvent::ToggleFailed {
                post_id,
                user_id,
                error,
            } => warn!("Toggle on {} by {} failed: {}", post_id, user_id, error),
            ControllerEvent::SubscriberLagged {
                subscriber_id,
                skipped,
            } => warn!("Subscriber {} lagged by {} change(s)", subscriber_id, skipped),
            ControllerEvent::ToggleStateChanged {
                post_id,
                user_id,
                state,
            } if state.is_terminal() => {
                info!("Toggle on {} by {} ended {:?}", post_id, user_id, state)
            }
            other => debug!("Controller event: {:?}", other),
        }
    }
    debug!("Controller event stream closed");
}

/// Follow the feed, resubscribing after a retryable loss
async fn log_feed(controller: FeedController) {
    let mut subscription = match controller.subscribe_feed() {
        Ok(subscription) => subscription,
        Err(e) => {
            error!("Could not subscribe to the feed: {}", e);
            return;
        }
    };

    loop {
        let Some(item) = subscription.next().await else {
            return;
        };
        match item {
            Ok(FeedEvent::Snapshot(snapshot)) => {
                info!(
                    "Feed snapshot at seq {}: {} post(s)",
                    snapshot.seq,
                    snapshot.posts.len()
                );
            }
            Ok(FeedEvent::Delta(delta)) => match delta.change {
                FeedChange::PostAdded { post } => {
                    info!("[{}] New post {}: {}", delta.seq, post.id, post.title)
                }
                FeedChange::LikeCountChanged {
                    post_id,
                    like_count,
                } => info!("[{}] {} now has {} like(s)", delta.seq, post_id, like_count),
                FeedChange::PostRemoved { post_id } => {
                    info!("[{}] Post {} removed", delta.seq, post_id)
                }
            },
            Err(e) if e.is_retryable() => match subscription.resubscribe() {
                Ok(fresh) => {
                    warn!("Feed subscription lost ({}), resubscribed", e);
                    subscription = fresh;
                }
                Err(_) => {
                    info!("Feed closed");
                    return;
                }
            },
            Err(e) => {
                error!("Feed subscription failed: {}", e);
                return;
            }
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(signal)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
