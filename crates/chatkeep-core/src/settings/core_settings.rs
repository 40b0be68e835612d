use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::formatting::CorrectionConfig;

/// Everything the core can be configured with; a missing or partial file
/// yields defaults
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    pub correction: CorrectionConfig,
    pub history: HistorySettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Quiet period before a non-forced save is submitted
    pub debounce_ms: u64,
    /// How long a just-committed fingerprint suppresses identical inserts
    pub duplicate_window_ms: u64,
    /// Overrides the platform data directory
    pub data_dir: Option<PathBuf>,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            duplicate_window_ms: 1500,
            data_dir: None,
        }
    }
}

impl HistorySettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.duplicate_window_ms)
    }
}
