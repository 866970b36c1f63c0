// # File Like Cache Store
//
// File-based implementation of LikeCacheStore with crash recovery.
//
// ## Purpose
//
// Keeps a device's liked posts across process restarts so the first
// render after startup can show "liked" before the engagement store
// answers. Entries loaded from here are only ever treated as a guess.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename
// - Corruption detection: JSON validated on load
// - Automatic backup: previous good file kept as `.backup`
// - Recovery: falls back to the backup, then to an empty cache
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "users": {
//     "u1": ["post-000001", "post-000007"]
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::like_cache_store::LikeCacheStore;
use crate::traits::{PostId, UserId};

/// Cache file format version
const CACHE_FILE_VERSION: &str = "1.0";

type UserLikes = HashMap<UserId, Vec<PostId>>;

/// File-based like cache store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use feedsync_core::cache::FileLikeCacheStore;
/// use feedsync_core::traits::{LikeCacheStore, PostId, UserId};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileLikeCacheStore::new("/var/lib/feedsync/likes.json").await?;
///     store.save(&UserId::new("u1"), &[PostId::new("post-000001")]).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileLikeCacheStore {
    path: PathBuf,
    users: Arc<RwLock<UserLikes>>,
}

/// Serializable cache file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CacheFileFormat {
    version: String,
    users: UserLikes,
}

impl FileLikeCacheStore {
    /// Create or load a file-backed store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing cache file
    /// 3. If it is corrupted, load the backup instead
    /// 4. If both fail, start empty
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::cache_store(format!(
                    "Failed to create cache directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let users = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            users: Arc::new(RwLock::new(users)),
        })
    }

    /// Load the cache file, falling back to the backup on corruption
    async fn load_with_recovery(path: &Path) -> Result<UserLikes, Error> {
        match Self::load_file(path).await {
            Ok(users) => {
                tracing::debug!("Loaded like cache: {} user(s)", users.len());
                Ok(users)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Like cache file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No like cache backup found. Starting empty.");
                    return Ok(HashMap::new());
                }

                match Self::load_file(&backup_path).await {
                    Ok(users) => {
                        tracing::info!("Recovered like cache from backup: {} user(s)", users.len());
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore like cache from backup: {}",
                                restore_err
                            );
                        }
                        Ok(users)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Like cache backup also unreadable: {}. Starting empty.",
                            backup_err
                        );
                        Ok(HashMap::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load_file(path: &Path) -> Result<UserLikes, Error> {
        if !path.exists() {
            tracing::debug!("Like cache file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::cache_store(format!(
                "Failed to read like cache {}: {}",
                path.display(),
                e
            ))
        })?;

        let file: CacheFileFormat = serde_json::from_str(&content)?;

        if file.version != CACHE_FILE_VERSION {
            tracing::warn!(
                "Like cache version mismatch: expected {}, got {}. Loading anyway.",
                CACHE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.users)
    }

    /// Write the whole cache atomically
    async fn write_file(&self, users: &UserLikes) -> Result<(), Error> {
        let file = CacheFileFormat {
            version: CACHE_FILE_VERSION.to_string(),
            users: users.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let temp_path = self.temp_path();
        {
            let mut temp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::cache_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            temp.write_all(json.as_bytes()).await?;
            temp.flush().await?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to back up like cache: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::cache_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Like cache written: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl LikeCacheStore for FileLikeCacheStore {
    async fn load(&self, user_id: &UserId) -> Result<Vec<PostId>, Error> {
        let guard = self.users.read().await;
        Ok(guard.get(user_id).cloned().unwrap_or_default())
    }

    async fn save(&self, user_id: &UserId, liked: &[PostId]) -> Result<(), Error> {
        // Held across the write so concurrent saves land in order
        let mut guard = self.users.write().await;
        guard.insert(user_id.clone(), liked.to_vec());
        self.write_file(&guard).await
    }

    async fn clear(&self, user_id: &UserId) -> Result<(), Error> {
        let mut guard = self.users.write().await;
        if guard.remove(user_id).is_none() {
            return Ok(());
        }
        self.write_file(&guard).await
    }
}
