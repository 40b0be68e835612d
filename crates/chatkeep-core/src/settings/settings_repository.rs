use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use super::core_settings::CoreSettings;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Path error: {0}")]
    PathError(String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

pub trait SettingsRepository: Send + Sync + 'static {
    fn load(&self) -> BoxFuture<'static, SettingsResult<CoreSettings>>;
    fn save(&self, settings: CoreSettings) -> BoxFuture<'static, SettingsResult<()>>;
}

pub struct SettingsJsonRepository {
    file_path: PathBuf,
}

impl SettingsJsonRepository {
    /// Create repository with XDG-compliant path
    pub fn new() -> SettingsResult<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SettingsError::PathError("Cannot determine config directory".into()))?;

        let file_path = config_dir.join("chatkeep").join("settings.json");

        Ok(Self { file_path })
    }

    /// Create repository with custom path (for testing)
    pub fn with_path(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }
}

impl SettingsRepository for SettingsJsonRepository {
    fn load(&self) -> BoxFuture<'static, SettingsResult<CoreSettings>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            let contents = tokio::task::spawn_blocking(move || -> SettingsResult<Option<String>> {
                if !path.exists() {
                    return Ok(None);
                }
                std::fs::read_to_string(&path)
                    .map(Some)
                    .map_err(|e| SettingsError::Io(e.to_string()))
            })
            .await
            .map_err(|e| SettingsError::Io(e.to_string()))??;

            let Some(contents) = contents else {
                return Ok(CoreSettings::default());
            };

            // JSON parsing is CPU-bound, keep on async thread (it's fast)
            serde_json::from_str(&contents).map_err(|e| SettingsError::Parse(e.to_string()))
        })
    }

    fn save(&self, settings: CoreSettings) -> BoxFuture<'static, SettingsResult<()>> {
        let path = self.file_path.clone();

        Box::pin(async move {
            let json = serde_json::to_string_pretty(&settings)
                .map_err(|e| SettingsError::Parse(e.to_string()))?;

            tokio::task::spawn_blocking(move || -> SettingsResult<()> {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
                }

                // Write atomically using temp file + rename
                let temp_path = path.with_extension("json.tmp");
                std::fs::write(&temp_path, &json).map_err(|e| SettingsError::Io(e.to_string()))?;
                std::fs::rename(&temp_path, &path).map_err(|e| SettingsError::Io(e.to_string()))?;

                Ok(())
            })
            .await
            .map_err(|e| SettingsError::Io(e.to_string()))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SettingsJsonRepository::with_path(dir.path().join("settings.json"));
        assert_eq!(repo.load().await.unwrap(), CoreSettings::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SettingsJsonRepository::with_path(dir.path().join("nested/settings.json"));

        let mut settings = CoreSettings::default();
        settings.history.debounce_ms = 10;
        settings.correction.enable_math_correction = false;
        repo.save(settings.clone()).await.unwrap();

        assert_eq!(repo.load().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        let err = SettingsJsonRepository::with_path(path).load().await.unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }
}
