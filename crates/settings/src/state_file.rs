use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::expansion::{ExpansionStateStore, PersistedExpansion};
use crate::util::write_atomic;

/// 展開狀態檔寫入錯誤。 / Errors raised while writing the expansion state file.
#[derive(Debug, Error)]
pub enum StateFileError {
    #[error("failed to serialize expansion state {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write expansion state {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 以 JSON 檔保存展開狀態。 / Persists the expansion state as a JSON blob.
#[derive(Debug, Clone)]
pub struct ExpansionStateFile {
    path: PathBuf,
}

impl ExpansionStateFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 載入狀態；檔案缺漏或損毀時回傳空狀態。 / Loads the blob, falling back to an empty state when missing or unreadable.
    pub fn load(&self) -> PersistedExpansion {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no expansion state on disk");
                return PersistedExpansion::default();
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "expansion state unreadable, starting collapsed"
                );
                return PersistedExpansion::default();
            }
        };

        match serde_json::from_str::<PersistedExpansion>(&contents) {
            Ok(mut state) => {
                state.expanded_nodes.retain(|id| !id.is_empty());
                state
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "expansion state has the wrong shape, starting collapsed"
                );
                PersistedExpansion::default()
            }
        }
    }

    /// 直接載入為狀態物件。 / Loads straight into a store.
    pub fn load_store(&self) -> ExpansionStateStore {
        ExpansionStateStore::from_persisted(self.load())
    }

    pub fn save(&self, state: &PersistedExpansion) -> Result<(), StateFileError> {
        let payload =
            serde_json::to_vec_pretty(state).map_err(|source| StateFileError::Serialize {
                path: self.path.clone(),
                source,
            })?;
        write_atomic(&self.path, &payload).map_err(|source| StateFileError::Write {
            path: self.path.clone(),
            source,
        })
    }

    /// 註冊回呼，使每次變更都寫回磁碟。 / Registers a callback that writes every mutation to disk.
    pub fn attach(&self, store: &mut ExpansionStateStore) {
        let file = self.clone();
        store.set_on_change(move |state| {
            if let Err(err) = file.save(state) {
                warn!(error = %err, "failed to persist expansion state");
            }
        });
    }
}
