use std::collections::BTreeSet;
use std::fmt;

use notetree_tree::{identifier, TreeSnapshot};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 持久化的展開狀態資料。 / Persisted settings blob for the expansion state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedExpansion {
    #[serde(default)]
    pub expanded_nodes: Vec<String>,
}

/// 狀態變更時呼叫的回呼。 / Callback invoked after every mutation.
pub type ChangeCallback = Box<dyn FnMut(&PersistedExpansion)>;

/// 管理展開節點與目前選取項目。 / Tracks expanded nodes and the active entity.
///
/// The store is owned by the tree controller and outlives every snapshot;
/// it is re-applied to each new snapshot at render time.
#[derive(Default)]
pub struct ExpansionStateStore {
    expanded: BTreeSet<String>,
    active: Option<String>,
    direct_selection: bool,
    on_change: Option<ChangeCallback>,
}

impl fmt::Debug for ExpansionStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpansionStateStore")
            .field("expanded", &self.expanded)
            .field("active", &self.active)
            .field("direct_selection", &self.direct_selection)
            .field("has_callback", &self.on_change.is_some())
            .finish()
    }
}

impl ExpansionStateStore {
    /// 建立空白狀態。 / Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// 由持久化資料建立狀態（不觸發回呼）。 / Builds a store from persisted data without firing callbacks.
    pub fn from_persisted(persisted: PersistedExpansion) -> Self {
        Self {
            expanded: persisted.expanded_nodes.into_iter().collect(),
            ..Self::default()
        }
    }

    /// 註冊變更回呼，後註冊者覆蓋前者。 / Registers the change callback; the last registration wins.
    pub fn set_on_change<F>(&mut self, callback: F)
    where
        F: FnMut(&PersistedExpansion) + 'static,
    {
        self.on_change = Some(Box::new(callback));
    }

    pub fn clear_on_change(&mut self) {
        self.on_change = None;
    }

    pub fn is_expanded(&self, identifier: &str) -> bool {
        self.expanded.contains(identifier)
    }

    pub fn expanded_count(&self) -> usize {
        self.expanded.len()
    }

    /// 切換節點的展開狀態，回傳新狀態。 / Flips a node and returns its new state.
    pub fn toggle(&mut self, identifier: &str) -> bool {
        let expanded = if self.expanded.remove(identifier) {
            false
        } else {
            self.expanded.insert(identifier.to_string());
            true
        };
        debug!(identifier, expanded, "toggled node");
        self.notify();
        expanded
    }

    pub fn expand(&mut self, identifier: &str) {
        self.expanded.insert(identifier.to_string());
        self.notify();
    }

    pub fn collapse(&mut self, identifier: &str) {
        self.expanded.remove(identifier);
        self.notify();
    }

    /// 展開快照中目前存在的每個節點。 / Expands every identifier present in the snapshot.
    ///
    /// Nodes created by a later rebuild start collapsed.
    pub fn expand_all(&mut self, snapshot: &TreeSnapshot) {
        self.expanded
            .extend(snapshot.identifiers().map(str::to_string));
        debug!(expanded = self.expanded.len(), "expanded all nodes");
        self.notify();
    }

    pub fn collapse_all(&mut self) {
        self.expanded.clear();
        debug!("collapsed all nodes");
        self.notify();
    }

    /// 設定目前項目並展開其所有祖先。 / Sets the active entity and expands all of its ancestors.
    ///
    /// `direct` records whether the activation came from a direct selection;
    /// the flag is consumed by the next [`take_direct_selection`](Self::take_direct_selection).
    pub fn set_active(&mut self, identifier: &str, direct: bool) {
        for ancestor in identifier::ancestors(identifier) {
            self.expanded.insert(ancestor.to_string());
        }
        self.active = Some(identifier.to_string());
        self.direct_selection = direct;
        debug!(identifier, direct, "activated node");
        self.notify();
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_active(&self, identifier: &str) -> bool {
        self.active.as_deref() == Some(identifier)
    }

    pub fn clear_active(&mut self) {
        self.active = None;
        self.direct_selection = false;
        self.notify();
    }

    /// 讀取並重設「直接選取」旗標。 / Reads the one-shot direct-selection flag and resets it.
    pub fn take_direct_selection(&mut self) -> bool {
        std::mem::take(&mut self.direct_selection)
    }

    /// 匯出展開的識別碼（字典序）。 / Exports expanded identifiers in lexicographic order.
    pub fn export_state(&self) -> Vec<String> {
        self.expanded.iter().cloned().collect()
    }

    pub fn persisted(&self) -> PersistedExpansion {
        PersistedExpansion {
            expanded_nodes: self.export_state(),
        }
    }

    /// 整批取代展開集合並觸發一次回呼。 / Replaces the expanded set wholesale and fires the callback once.
    pub fn restore_state<I, S>(&mut self, identifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expanded = identifiers.into_iter().map(Into::into).collect();
        debug!(expanded = self.expanded.len(), "restored expansion state");
        self.notify();
    }

    fn notify(&mut self) {
        if let Some(mut callback) = self.on_change.take() {
            callback(&self.persisted());
            self.on_change = Some(callback);
        }
    }
}
