//! 樹狀檢視的持久化設定：展開狀態與偏好設定。
//! Persisted settings of the tree view: expansion state and preferences.

pub mod expansion;
pub mod preferences;
pub mod state_file;
mod util;

pub use expansion::{ChangeCallback, ExpansionStateStore, PersistedExpansion};
pub use preferences::{CoalescePolicy, PreferencesError, PreferencesStore, TreePreferences};
pub use state_file::{ExpansionStateFile, StateFileError};
