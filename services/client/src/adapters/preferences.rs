//! services/client/src/adapters/preferences.rs
//!
//! File-backed implementation of the `PreferenceStore` port. The "remember me"
//! choice lives in `<data_dir>/preferences.json`.

use quiz_core::ports::{PortError, PortResult, PreferenceStore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const PREFERENCES_FILE: &str = "preferences.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PreferencesRecord {
    #[serde(rename = "rememberMe", default)]
    remember_me: bool,
}

pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(PREFERENCES_FILE),
        }
    }

    /// Loads the stored record. A missing file is the default record.
    fn load(&self) -> PortResult<PreferencesRecord> {
        if !self.path.exists() {
            return Ok(PreferencesRecord::default());
        }
        let contents = fs::read_to_string(&self.path).map_err(|e| {
            PortError::Unexpected(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        match serde_json::from_str(&contents) {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(
                    "Ignoring unreadable preferences at {}: {}",
                    self.path.display(),
                    e
                );
                Ok(PreferencesRecord::default())
            }
        }
    }

    fn save(&self, record: &PreferencesRecord) -> PortResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PortError::Unexpected(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        let contents = serde_json::to_string_pretty(record)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        fs::write(&self.path, contents).map_err(|e| {
            PortError::Unexpected(format!("failed to write {}: {}", self.path.display(), e))
        })
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn remember_me(&self) -> PortResult<bool> {
        Ok(self.load()?.remember_me)
    }

    fn set_remember_me(&self, remember_me: bool) -> PortResult<()> {
        let mut record = self.load()?;
        record.remember_me = remember_me;
        self.save(&record)
    }
}
