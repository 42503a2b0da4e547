//! Local storage for screenshot assets.
//!
//! Screenshot and pageshot bytes are written under a per-process directory
//! with UUID filenames and served back at `/instant-screenshots/{file}`.
//! A background sweeper unlinks files once they outlive the retention
//! window (48 hours by default).

use crate::error::{GatewayError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Store for screenshot assets on the local filesystem.
#[derive(Debug)]
pub struct AssetStore {
    dir: PathBuf,
}

impl AssetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the backing directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] when the directory cannot be
    /// created.
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| GatewayError::Internal(format!("cannot create asset dir: {e}")))
    }

    /// Persist PNG bytes under a fresh `{prefix}-{uuid}.png` name and
    /// return the filename.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] on write failure.
    pub async fn save_png(&self, prefix: &str, bytes: &[u8]) -> Result<String> {
        let file = format!("{prefix}-{}.png", Uuid::new_v4());
        let path = self.dir.join(&file);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| GatewayError::Internal(format!("cannot write {file}: {e}")))?;
        Ok(file)
    }

    /// Public URL of a stored asset as seen from `host`.
    pub fn public_url(&self, host: &str, file: &str) -> String {
        format!("http://{host}/instant-screenshots/{file}")
    }

    /// Filesystem path for a stored asset name. Rejects anything that
    /// could escape the asset directory.
    pub fn path_of(&self, file: &str) -> Option<PathBuf> {
        if file.is_empty() || file.contains('/') || file.contains('\\') || file.contains("..") {
            return None;
        }
        Some(self.dir.join(file))
    }

    /// Remove assets whose modification time is older than `max_age`.
    /// Returns the number of files unlinked.
    pub async fn sweep_older_than(&self, max_age: Duration) -> usize {
        let mut removed = 0;
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if !is_expired(entry.path().as_path(), max_age).await {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) => {
                    tracing::warn!(path = %entry.path().display(), error = %err, "failed to sweep asset");
                }
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "swept expired screenshot assets");
        }
        removed
    }

    /// Spawn the periodic sweeper task.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        max_age: Duration,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.sweep_older_than(max_age).await;
            }
        })
    }
}

async fn is_expired(path: &Path, max_age: Duration) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    modified
        .elapsed()
        .map(|age| age > max_age)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> AssetStore {
        let dir = std::env::temp_dir().join(format!("webgist-assets-{tag}-{}", Uuid::new_v4()));
        AssetStore::new(dir)
    }

    #[tokio::test]
    async fn save_png_writes_file_with_prefix() {
        let store = temp_store("save");
        store.ensure_dir().await.unwrap();
        let file = store.save_png("screenshot", b"png-bytes").await.unwrap();
        assert!(file.starts_with("screenshot-"));
        assert!(file.ends_with(".png"));
        let on_disk = tokio::fs::read(store.path_of(&file).unwrap()).await.unwrap();
        assert_eq!(on_disk, b"png-bytes");
    }

    #[tokio::test]
    async fn filenames_are_unique() {
        let store = temp_store("unique");
        store.ensure_dir().await.unwrap();
        let a = store.save_png("pageshot", b"a").await.unwrap();
        let b = store.save_png("pageshot", b"b").await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn public_url_includes_host_and_route() {
        let store = AssetStore::new("/tmp/x");
        let url = store.public_url("localhost:1912", "screenshot-abc.png");
        assert_eq!(
            url,
            "http://localhost:1912/instant-screenshots/screenshot-abc.png"
        );
    }

    #[test]
    fn path_of_rejects_traversal() {
        let store = AssetStore::new("/tmp/x");
        assert!(store.path_of("../etc/passwd").is_none());
        assert!(store.path_of("a/b.png").is_none());
        assert!(store.path_of("").is_none());
        assert!(store.path_of("fine.png").is_some());
    }

    #[tokio::test]
    async fn sweep_ignores_recent_files() {
        let store = temp_store("sweep");
        store.ensure_dir().await.unwrap();
        store.save_png("screenshot", b"fresh").await.unwrap();
        let removed = store.sweep_older_than(Duration::from_secs(3600)).await;
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn sweep_removes_old_files() {
        let store = temp_store("sweep-old");
        store.ensure_dir().await.unwrap();
        let file = store.save_png("screenshot", b"old").await.unwrap();
        // Zero max age: everything already written is expired.
        let removed = store.sweep_older_than(Duration::ZERO).await;
        assert_eq!(removed, 1);
        let path = store.path_of(&file).unwrap();
        assert!(tokio::fs::metadata(path).await.is_err());
    }

    #[tokio::test]
    async fn sweep_on_missing_dir_is_a_noop() {
        let store = temp_store("missing");
        assert_eq!(store.sweep_older_than(Duration::ZERO).await, 0);
    }
}
