use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use notetree_tree::CollisionPolicy;

use crate::util::write_atomic;

const PREFERENCES_VERSION: u32 = 1;
const MIN_DEBOUNCE_MS: u64 = 10;
const MAX_DEBOUNCE_MS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("failed to read preferences {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse preferences {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize preferences {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write preferences {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 同一去抖動視窗內多個事件的合併方式。 / How events inside one debounce window are merged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoalescePolicy {
    /// 任何結構性事件都升級為完整重建。 / Any structural event escalates the window to a full rebuild.
    #[default]
    StructuralWins,
    /// 只看視窗內最後一個事件。 / Only the last event of the window decides.
    LastEventWins,
}

/// 樹狀檢視的偏好設定。 / Preferences of the tree view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreePreferences {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_note_extension")]
    pub note_extension: String,
    #[serde(default)]
    pub collision_policy: CollisionPolicy,
    #[serde(default)]
    pub coalesce_policy: CoalescePolicy,
    #[serde(default = "default_true")]
    pub persist_on_change: bool,
}

fn default_version() -> u32 {
    PREFERENCES_VERSION
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_note_extension() -> String {
    "md".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for TreePreferences {
    fn default() -> Self {
        Self {
            version: PREFERENCES_VERSION,
            debounce_ms: default_debounce_ms(),
            note_extension: default_note_extension(),
            collision_policy: CollisionPolicy::default(),
            coalesce_policy: CoalescePolicy::default(),
            persist_on_change: true,
        }
    }
}

impl TreePreferences {
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = PREFERENCES_VERSION;
        }
        if self.debounce_ms == 0 {
            self.debounce_ms = default_debounce_ms();
        }
        self.debounce_ms = self.debounce_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);

        let extension = self.note_extension.trim().trim_start_matches('.');
        self.note_extension = if extension.is_empty() {
            default_note_extension()
        } else {
            extension.to_string()
        };
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug)]
pub struct PreferencesStore {
    path: PathBuf,
    data: TreePreferences,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>, preferences: TreePreferences) -> Self {
        let mut data = preferences;
        data.sanitize();
        Self {
            path: path.into(),
            data,
        }
    }

    /// 載入偏好設定；檔案不存在時使用預設值。 / Loads preferences, using defaults when the file is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreferencesError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            debug!(path = %path.display(), "no preferences file, using defaults");
            return Ok(Self::new(path, TreePreferences::default()));
        }
        let data = read_preferences(&path)?;
        Ok(Self { path, data })
    }

    pub fn preferences(&self) -> &TreePreferences {
        &self.data
    }

    pub fn save(&self) -> Result<(), PreferencesError> {
        write_preferences(&self.path, &self.data)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn export_to(&self, path: impl AsRef<Path>) -> Result<(), PreferencesError> {
        write_preferences(path.as_ref(), &self.data)
    }

    pub fn import_from(&mut self, source: impl AsRef<Path>) -> Result<(), PreferencesError> {
        self.data = read_preferences(source.as_ref())?;
        self.save()
    }
}

fn read_preferences(path: &Path) -> Result<TreePreferences, PreferencesError> {
    let contents = fs::read_to_string(path).map_err(|source| PreferencesError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut data: TreePreferences =
        serde_json::from_str(&contents).map_err(|source| PreferencesError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    data.sanitize();
    Ok(data)
}

fn write_preferences(path: &Path, data: &TreePreferences) -> Result<(), PreferencesError> {
    let payload =
        serde_json::to_string_pretty(data).map_err(|source| PreferencesError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
    write_atomic(path, payload.as_bytes()).map_err(|source| PreferencesError::Write {
        path: path.to_path_buf(),
        source,
    })
}
