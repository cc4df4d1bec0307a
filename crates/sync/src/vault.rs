use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use notetree_tree::Entity;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 列舉實體時可能發生的錯誤。 / Errors raised while listing entities.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("vault root {path} is not a directory")]
    MissingRoot { path: PathBuf },
}

/// 提供扁平實體清單的儲存層。 / Storage layer able to list its entities.
pub trait EntitySource {
    fn list_entities(&self) -> Result<Vec<Entity>, SourceError>;
}

impl EntitySource for Vec<Entity> {
    fn list_entities(&self) -> Result<Vec<Entity>, SourceError> {
        Ok(self.clone())
    }
}

impl<T: EntitySource + ?Sized> EntitySource for &T {
    fn list_entities(&self) -> Result<Vec<Entity>, SourceError> {
        (**self).list_entities()
    }
}

/// 筆記庫路徑與實體名稱之間的對應規則。 / Maps vault paths to entity names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultLayout {
    root: PathBuf,
    extension: String,
}

impl VaultLayout {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// 判斷路徑是否為筆記檔。 / Whether the path carries the note extension.
    pub fn is_note(&self, path: &Path) -> bool {
        path.extension().and_then(OsStr::to_str) == Some(self.extension.as_str())
    }

    /// 將路徑轉為實體；隱藏項目或非筆記檔回傳 `None`。
    /// Converts a path into an entity; hidden entries and foreign files yield `None`.
    pub fn entity_for(&self, path: &Path, is_dir: bool) -> Option<Entity> {
        let relative = path.strip_prefix(&self.root).ok()?;
        if relative.as_os_str().is_empty() || is_hidden(relative) {
            return None;
        }
        let backing = backing_for(relative);
        if is_dir {
            let name = relative.file_name()?.to_str()?;
            return Some(Entity::grouping(name, backing));
        }
        if !self.is_note(relative) {
            return None;
        }
        let stem = relative.file_stem()?.to_str()?;
        Some(Entity::document(stem, backing))
    }
}

fn is_hidden(relative: &Path) -> bool {
    relative.components().any(|component| match component {
        Component::Normal(name) => name.to_str().map_or(true, |name| name.starts_with('.')),
        _ => false,
    })
}

fn backing_for(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// 以目錄作為儲存層的筆記庫。 / A directory of dot-named notes.
#[derive(Debug, Clone)]
pub struct VaultSource {
    layout: VaultLayout,
}

impl VaultSource {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            layout: VaultLayout::new(root, extension),
        }
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }
}

impl EntitySource for VaultSource {
    fn list_entities(&self) -> Result<Vec<Entity>, SourceError> {
        let root = self.layout.root();
        if !root.is_dir() {
            return Err(SourceError::MissingRoot {
                path: root.to_path_buf(),
            });
        }

        let walker = WalkDir::new(root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| !name.starts_with('.'))
            });

        let mut entities = Vec::new();
        for entry in walker {
            // Entries can vanish or turn unreadable while the vault is being edited.
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(
                        path = ?err.path(),
                        error = %err,
                        "skipping unreadable vault entry"
                    );
                    continue;
                }
            };
            if let Some(entity) = self
                .layout
                .entity_for(entry.path(), entry.file_type().is_dir())
            {
                entities.push(entity);
            }
        }
        debug!(root = %root.display(), entities = entities.len(), "listed vault");
        Ok(entities)
    }
}
