//! Local-disk audio storage.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{AudioStorage, ExternalError};

/// Deletes recordings stored under `root`.
///
/// Accepts `file://` URLs and bare paths. Paths are resolved relative to `root`
/// and must not escape it. Remote URLs (`http(s)://`, `s3://`, ...) are not owned
/// by this storage and are left alone.
#[derive(Debug, Clone)]
pub struct LocalAudioStorage {
    root: PathBuf,
}

impl LocalAudioStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map an audio URL to a path under `root`, or `None` if it is not local.
    fn resolve(&self, audio_url: &str) -> Result<Option<PathBuf>, ExternalError> {
        let raw = match audio_url.strip_prefix("file://") {
            Some(path) => path,
            None if audio_url.contains("://") => return Ok(None),
            None => audio_url,
        };

        let path = Path::new(raw);
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(ExternalError::Rejected(audio_url.to_string()));
                }
            }
        }
        if resolved == self.root {
            return Err(ExternalError::Rejected(audio_url.to_string()));
        }
        Ok(Some(resolved))
    }
}

#[async_trait]
impl AudioStorage for LocalAudioStorage {
    async fn delete(&self, audio_url: &str) -> Result<(), ExternalError> {
        let Some(path) = self.resolve(audio_url)? else {
            debug!(audio_url, "not a local recording, skipping cleanup");
            return Ok(());
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Already gone (e.g. a redelivered job cleaned up twice).
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ExternalError::Io(format!("{}: {e}", path.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("auditflow-audio-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn deletes_file_under_root_and_tolerates_missing() {
        let root = scratch_dir();
        let file = root.join("call-1.wav");
        std::fs::write(&file, b"RIFF").unwrap();

        let storage = LocalAudioStorage::new(&root);
        storage.delete("file:///call-1.wav").await.unwrap();
        assert!(!file.exists());

        storage.delete("call-1.wav").await.unwrap();
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn absolute_path_inside_root_is_accepted() {
        let root = scratch_dir();
        let file = root.join("call-2.wav");
        std::fs::write(&file, b"RIFF").unwrap();

        let storage = LocalAudioStorage::new(&root);
        storage.delete(&format!("file://{}", file.display())).await.unwrap();
        assert!(!file.exists());
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn traversal_is_rejected_and_remote_urls_skipped() {
        let storage = LocalAudioStorage::new("/var/lib/auditflow/audio");
        assert!(matches!(
            storage.delete("file://../../etc/passwd").await,
            Err(ExternalError::Rejected(_))
        ));
        storage.delete("https://cdn.example.com/call.mp3").await.unwrap();
    }
}
