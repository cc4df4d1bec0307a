use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use notetree_tree::EntityEventKind;
use thiserror::Error;
use tracing::{debug, trace};

use crate::coordinator::EntityEvent;
use crate::vault::VaultLayout;

/// 監控筆記庫時可能回傳的錯誤。 / Error type for vault monitoring.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
    #[error("monitor channel disconnected")]
    ChannelDisconnected,
}

/// 將 `notify` 事件轉換為實體事件的監視器。 / Recursive watcher translating `notify` events into entity events.
pub struct VaultMonitor {
    _watcher: RecommendedWatcher,
    rx: Receiver<EntityEvent>,
}

impl VaultMonitor {
    /// 建立監視器並開始遞迴監看筆記庫。 / Creates a monitor and starts watching the vault recursively.
    pub fn watch(layout: &VaultLayout) -> Result<Self, MonitorError> {
        let (tx, rx) = mpsc::channel();
        let mapping = layout.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    for mapped in map_event(&mapping, &event) {
                        let _ = tx.send(mapped);
                    }
                }
                Err(err) => debug!(error = %err, "watcher reported an error"),
            },
            Config::default(),
        )?;
        watcher.watch(layout.root(), RecursiveMode::Recursive)?;
        debug!(root = %layout.root().display(), "watching vault");
        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// 在期限內等待事件，逾時回傳 `None`。 / Waits for an event until the timeout, returning `None` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<EntityEvent>, MonitorError> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(MonitorError::ChannelDisconnected),
        }
    }
}

fn map_event(layout: &VaultLayout, event: &notify::Event) -> Vec<EntityEvent> {
    let mut mapped = Vec::new();
    match event.kind {
        EventKind::Create(kind) => {
            for path in &event.paths {
                let is_dir = match kind {
                    CreateKind::Folder => true,
                    CreateKind::File => false,
                    _ => path.is_dir(),
                };
                push(layout, &mut mapped, EntityEventKind::Created, path, is_dir);
            }
        }
        EventKind::Remove(kind) => {
            for path in &event.paths {
                let is_dir = match kind {
                    RemoveKind::Folder => true,
                    RemoveKind::File => false,
                    _ => !layout.is_note(path),
                };
                push(layout, &mut mapped, EntityEventKind::Deleted, path, is_dir);
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => {
            let paths: &[_] = match mode {
                RenameMode::Both if event.paths.len() >= 2 => &event.paths[..2],
                _ => &event.paths[..],
            };
            for path in paths {
                let is_dir = if path.exists() {
                    path.is_dir()
                } else {
                    !layout.is_note(path)
                };
                push(layout, &mut mapped, EntityEventKind::Renamed, path, is_dir);
            }
        }
        EventKind::Modify(_) => {
            for path in &event.paths {
                // Directory metadata and foreign files never reach the coordinator.
                if path.is_dir() || !layout.is_note(path) {
                    continue;
                }
                push(layout, &mut mapped, EntityEventKind::Modified, path, false);
            }
        }
        _ => {}
    }
    trace!(kind = ?event.kind, mapped = mapped.len(), "mapped notify event");
    mapped
}

fn push(
    layout: &VaultLayout,
    out: &mut Vec<EntityEvent>,
    kind: EntityEventKind,
    path: &Path,
    is_dir: bool,
) {
    if let Some(entity) = layout.entity_for(path, is_dir) {
        let event = EntityEvent::new(kind, entity.identifier);
        if !out.contains(&event) {
            out.push(event);
        }
    }
}
