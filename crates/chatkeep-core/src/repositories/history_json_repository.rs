use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{RepositoryError, RepositoryResult};
use super::history_repository::{BoxFuture, HistoryRepository};
use crate::models::{Conversation, HistoryKind, Message};

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct HistoryFile {
    version: u32,
    #[serde(default)]
    conversations: Vec<Conversation>,
}

#[derive(Serialize, Deserialize)]
struct LastChatFile {
    version: u32,
    #[serde(default)]
    messages: Vec<Message>,
}

/// JSON file-based history store
/// Files live in ~/.local/share/chatkeep/ as `{kind}_history.json` and
/// `{kind}_last_chat.json`
pub struct HistoryJsonRepository {
    data_dir: PathBuf,
}

impl HistoryJsonRepository {
    pub fn new() -> RepositoryResult<Self> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| RepositoryError::InitializationError {
                message: "Could not determine data directory".to_string(),
            })?
            .join("chatkeep");

        Ok(Self { data_dir })
    }

    /// Create repository rooted at a custom directory (for testing)
    pub fn with_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn history_path(&self, kind: HistoryKind) -> PathBuf {
        self.data_dir.join(format!("{}_history.json", kind.as_str()))
    }

    fn last_chat_path(&self, kind: HistoryKind) -> PathBuf {
        self.data_dir.join(format!("{}_last_chat.json", kind.as_str()))
    }
}

/// Read and decode a file on the blocking pool; a missing file is None.
async fn read_json<T>(path: PathBuf) -> RepositoryResult<Option<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    tokio::task::spawn_blocking(move || -> RepositoryResult<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    })
    .await?
}

async fn write_json<T>(path: PathBuf, value: T) -> RepositoryResult<()>
where
    T: Serialize + Send + 'static,
{
    tokio::task::spawn_blocking(move || -> RepositoryResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&value)?;

        // Write to file atomically (write to temp, then rename)
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &path)?;

        Ok(())
    })
    .await?
}

fn check_version(version: u32, path: &Path) -> RepositoryResult<()> {
    if version > FORMAT_VERSION {
        return Err(RepositoryError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: version,
            supported: FORMAT_VERSION,
        });
    }
    Ok(())
}

impl HistoryRepository for HistoryJsonRepository {
    fn load_conversations(
        &self,
        kind: HistoryKind,
    ) -> BoxFuture<'static, RepositoryResult<Vec<Conversation>>> {
        let path = self.history_path(kind);

        Box::pin(async move {
            match read_json::<HistoryFile>(path.clone()).await? {
                Some(file) => {
                    check_version(file.version, &path)?;
                    Ok(file.conversations)
                }
                None => Ok(Vec::new()),
            }
        })
    }

    fn save_conversations(
        &self,
        kind: HistoryKind,
        conversations: Vec<Conversation>,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.history_path(kind);

        Box::pin(async move {
            let file = HistoryFile {
                version: FORMAT_VERSION,
                conversations,
            };
            write_json(path, file).await
        })
    }

    fn load_last_open_chat(&self, kind: HistoryKind) -> BoxFuture<'static, RepositoryResult<Vec<Message>>> {
        let path = self.last_chat_path(kind);

        Box::pin(async move {
            match read_json::<LastChatFile>(path.clone()).await? {
                Some(file) => {
                    check_version(file.version, &path)?;
                    Ok(file.messages)
                }
                None => Ok(Vec::new()),
            }
        })
    }

    fn save_last_open_chat(
        &self,
        kind: HistoryKind,
        messages: Vec<Message>,
    ) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.last_chat_path(kind);

        Box::pin(async move {
            let file = LastChatFile {
                version: FORMAT_VERSION,
                messages,
            };
            write_json(path, file).await
        })
    }

    fn clear_last_open_chat(&self, kind: HistoryKind) -> BoxFuture<'static, RepositoryResult<()>> {
        let path = self.last_chat_path(kind);

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
