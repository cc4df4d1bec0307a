//! 將儲存層的變更同步到樹狀快照。
//! Keeps a tree snapshot in sync with a mutating storage layer.

pub mod controller;
pub mod coordinator;
pub mod file_monitor;
pub mod vault;

pub use controller::{RefreshOutcome, TreeController, VisibleRow};
pub use coordinator::{ChangeEventCoordinator, Debouncer, EntityEvent, RefreshRequest};
pub use file_monitor::{MonitorError, VaultMonitor};
pub use vault::{EntitySource, SourceError, VaultLayout, VaultSource};
