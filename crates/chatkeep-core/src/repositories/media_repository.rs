use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::error::{RepositoryError, RepositoryResult};
use super::history_repository::BoxFuture;

/// Media collaborator: bytes behind opaque attachment references
pub trait MediaRepository: Send + Sync + 'static {
    fn load(&self, reference: &str) -> BoxFuture<'static, RepositoryResult<Option<Vec<u8>>>>;

    fn store(&self, reference: &str, bytes: Vec<u8>) -> BoxFuture<'static, RepositoryResult<()>>;

    /// Deleting an unknown reference is not an error
    fn delete(&self, reference: &str) -> BoxFuture<'static, RepositoryResult<()>>;
}

/// Blobs on disk, one file per reference named by the SHA-256 of the reference
pub struct FileMediaRepository {
    media_dir: PathBuf,
}

impl FileMediaRepository {
    pub fn new() -> RepositoryResult<Self> {
        let media_dir = dirs::data_dir()
            .ok_or_else(|| RepositoryError::InitializationError {
                message: "Could not determine data directory".to_string(),
            })?
            .join("chatkeep")
            .join("media");

        Ok(Self { media_dir })
    }

    pub fn with_dir(media_dir: impl Into<PathBuf>) -> Self {
        Self {
            media_dir: media_dir.into(),
        }
    }

    fn blob_path(&self, reference: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(reference.as_bytes());
        self.media_dir.join(hex::encode(hasher.finalize().as_slice()))
    }
}

impl MediaRepository for FileMediaRepository {
    fn load(&self, reference: &str) -> BoxFuture<'static, RepositoryResult<Option<Vec<u8>>>> {
        let path = self.blob_path(reference);

        Box::pin(async move {
            tokio::task::spawn_blocking(move || -> RepositoryResult<Option<Vec<u8>>> {
                if !path.exists() {
                    return Ok(None);
                }
                Ok(Some(std::fs::read(&path)?))
            })
            .await?
        })
    }

    fn store(&self, reference: &str, bytes: Vec<u8>) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.blob_path(reference);
        let media_dir = self.media_dir.clone();

        Box::pin(async move {
            tokio::task::spawn_blocking(move || -> RepositoryResult<()> {
                std::fs::create_dir_all(&media_dir)?;
                let temp_path = path.with_extension("tmp");
                std::fs::write(&temp_path, bytes)?;
                std::fs::rename(&temp_path, &path)?;
                Ok(())
            })
            .await?
        })
    }

    fn delete(&self, reference: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.blob_path(reference);

        Box::pin(async move {
            tokio::task::spawn_blocking(move || -> RepositoryResult<()> {
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
                Ok(())
            })
            .await?
        })
    }
}

/// Media store held in memory; records deletions for tests
#[derive(Clone, Default)]
pub struct InMemoryMediaRepository {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

impl InMemoryMediaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// References passed to `delete`, in call order
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.blobs.lock().contains_key(reference)
    }
}

impl MediaRepository for InMemoryMediaRepository {
    fn load(&self, reference: &str) -> BoxFuture<'static, RepositoryResult<Option<Vec<u8>>>> {
        let blobs = self.blobs.clone();
        let reference = reference.to_string();

        Box::pin(async move { Ok(blobs.lock().get(&reference).cloned()) })
    }

    fn store(&self, reference: &str, bytes: Vec<u8>) -> BoxFuture<'static, RepositoryResult<()>> {
        let blobs = self.blobs.clone();
        let reference = reference.to_string();

        Box::pin(async move {
            blobs.lock().insert(reference, bytes);
            Ok(())
        })
    }

    fn delete(&self, reference: &str) -> BoxFuture<'static, RepositoryResult<()>> {
        let blobs = self.blobs.clone();
        let deleted = self.deleted.clone();
        let reference = reference.to_string();

        Box::pin(async move {
            blobs.lock().remove(&reference);
            deleted.lock().push(reference);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_media_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileMediaRepository::with_dir(dir.path());

        repo.store("images/cat.png", vec![1, 2, 3]).await.unwrap();
        assert_eq!(repo.load("images/cat.png").await.unwrap(), Some(vec![1, 2, 3]));

        // the reference never becomes a path component
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].as_ref().unwrap().file_name();
        assert_eq!(name.to_string_lossy().len(), 64);

        repo.delete("images/cat.png").await.unwrap();
        assert_eq!(repo.load("images/cat.png").await.unwrap(), None);
        repo.delete("images/cat.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_media_records_deletes() {
        let repo = InMemoryMediaRepository::new();
        repo.store("a", vec![0]).await.unwrap();
        repo.delete("a").await.unwrap();
        repo.delete("b").await.unwrap();

        assert!(!repo.contains("a"));
        assert_eq!(repo.deleted(), vec!["a".to_string(), "b".to_string()]);
    }
}
