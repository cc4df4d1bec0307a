use notetree_settings::ExpansionStateStore;
use notetree_tree::{
    Entity, EntityEventKind, IncrementalReconciler, NodeIndex, NodeKind, PathTreeBuilder,
    TreeSnapshot,
};
use tracing::{debug, info, warn};

use crate::coordinator::RefreshRequest;
use crate::vault::{EntitySource, SourceError};

/// 刷新後交給呈現層的訊號。 / Signal handed to the rendering layer after a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Only the listed subtrees were rebuilt; everything else is untouched.
    SubtreesReplaced { roots: Vec<String> },
    TreeReplaced,
}

/// 呈現層可直接顯示的一列。 / One row the rendering layer can display as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleRow {
    pub identifier: String,
    pub name: String,
    pub depth: usize,
    pub kind: NodeKind,
    pub expanded: bool,
    pub active: bool,
    pub has_children: bool,
}

/// 擁有快照與展開狀態，並執行刷新要求。
/// Owns the snapshot and the expansion state and carries out refresh requests.
#[derive(Debug)]
pub struct TreeController<S> {
    source: S,
    state: ExpansionStateStore,
    builder: PathTreeBuilder,
    reconciler: IncrementalReconciler,
    snapshot: TreeSnapshot,
}

impl<S: EntitySource> TreeController<S> {
    /// 建立控制器並執行第一次完整建構。 / Creates the controller and performs the initial full build.
    pub fn new(
        source: S,
        state: ExpansionStateStore,
        builder: PathTreeBuilder,
    ) -> Result<Self, SourceError> {
        let entities = source.list_entities()?;
        let snapshot = builder.build(&entities);
        info!(nodes = snapshot.len(), "initial tree built");
        Ok(Self {
            source,
            state,
            builder,
            reconciler: IncrementalReconciler::new(builder),
            snapshot,
        })
    }

    pub fn snapshot(&self) -> &TreeSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> &ExpansionStateStore {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ExpansionStateStore {
        &mut self.state
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// 執行協調器送來的要求。 / Executes a request produced by the coordinator.
    ///
    /// A listing failure leaves the current snapshot in place.
    pub fn refresh(&mut self, request: RefreshRequest) -> Result<RefreshOutcome, SourceError> {
        let identifiers = match request {
            RefreshRequest::Full => return self.rebuild(),
            RefreshRequest::Incremental { identifiers } => identifiers,
        };
        let entities = self.source.list_entities()?;

        let mut roots: Vec<String> = Vec::new();
        for changed in &identifiers {
            let result = self.reconciler.try_patch(
                EntityEventKind::Modified,
                changed,
                &mut self.snapshot,
                &entities,
            );
            match result.anchor() {
                Some(anchor) => {
                    if !roots.iter().any(|root| root == anchor) {
                        roots.push(anchor.to_string());
                    }
                }
                None => {
                    debug!(changed = %changed, "escalating to a full rebuild");
                    return Ok(self.replace_tree(&entities));
                }
            }
        }
        Ok(RefreshOutcome::SubtreesReplaced { roots })
    }

    /// 同 [`refresh`](Self::refresh)，但列舉失敗時記錄警告並保留目前快照。
    /// Like [`refresh`](Self::refresh), but a listing failure is logged and the
    /// current snapshot is kept, so long-running watchers survive transient errors.
    pub fn refresh_or_keep(&mut self, request: RefreshRequest) -> Option<RefreshOutcome> {
        match self.refresh(request) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(error = %err, "listing failed, keeping the current tree");
                None
            }
        }
    }

    /// 強制完整重建。 / Forces a full rebuild.
    pub fn rebuild(&mut self) -> Result<RefreshOutcome, SourceError> {
        let entities = self.source.list_entities()?;
        Ok(self.replace_tree(&entities))
    }

    fn replace_tree(&mut self, entities: &[Entity]) -> RefreshOutcome {
        self.snapshot = self.builder.build(entities);
        info!(
            nodes = self.snapshot.len(),
            skipped = self.snapshot.skipped().len(),
            "tree rebuilt"
        );
        RefreshOutcome::TreeReplaced
    }

    pub fn toggle(&mut self, identifier: &str) -> bool {
        self.state.toggle(identifier)
    }

    /// 選取項目並展開其祖先。 / Activates an entity and expands its ancestors.
    pub fn reveal(&mut self, identifier: &str, direct: bool) {
        self.state.set_active(identifier, direct);
    }

    pub fn expand_all(&mut self) {
        self.state.expand_all(&self.snapshot);
    }

    pub fn collapse_all(&mut self) {
        self.state.collapse_all();
    }

    /// 依展開狀態投影出可見列。 / Projects the rows visible under the current expansion state.
    pub fn visible_rows(&self) -> Vec<VisibleRow> {
        self.rows(false)
    }

    /// 不論展開狀態列出所有列。 / Lists every row regardless of expansion.
    pub fn all_rows(&self) -> Vec<VisibleRow> {
        self.rows(true)
    }

    fn rows(&self, everything: bool) -> Vec<VisibleRow> {
        let mut rows = Vec::new();
        self.push_rows(self.snapshot.root_index(), 0, everything, &mut rows);
        rows
    }

    fn push_rows(
        &self,
        parent: NodeIndex,
        depth: usize,
        everything: bool,
        rows: &mut Vec<VisibleRow>,
    ) {
        let Some(node) = self.snapshot.node(parent) else {
            return;
        };
        for child_index in node.child_indices() {
            let Some(child) = self.snapshot.node(child_index) else {
                continue;
            };
            let expanded = self.state.is_expanded(child.identifier());
            rows.push(VisibleRow {
                identifier: child.identifier().to_string(),
                name: child.name().to_string(),
                depth,
                kind: child.kind(),
                expanded,
                active: self.state.is_active(child.identifier()),
                has_children: child.has_children(),
            });
            if expanded || everything {
                self.push_rows(child_index, depth + 1, everything, rows);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::path::PathBuf;

    /// 可切換為失敗的來源。 / Source that can be switched into a failing state.
    struct FlakySource {
        entities: Vec<Entity>,
        failing: Cell<bool>,
    }

    impl EntitySource for FlakySource {
        fn list_entities(&self) -> Result<Vec<Entity>, SourceError> {
            if self.failing.get() {
                return Err(SourceError::MissingRoot {
                    path: PathBuf::from("/gone"),
                });
            }
            Ok(self.entities.clone())
        }
    }

    fn controller(entities: Vec<Entity>) -> TreeController<Vec<Entity>> {
        TreeController::new(entities, ExpansionStateStore::new(), PathTreeBuilder::new()).unwrap()
    }

    #[test]
    fn rows_descend_only_into_expanded_nodes() {
        let mut controller = controller(vec![
            Entity::document("b", "b.md"),
            Entity::document("a.x", "a.x.md"),
            Entity::document("a.y.z", "a.y.z.md"),
        ]);
        let names = |rows: Vec<VisibleRow>| -> Vec<(String, usize)> {
            rows.into_iter().map(|row| (row.identifier, row.depth)).collect()
        };

        assert_eq!(
            names(controller.visible_rows()),
            vec![("a".to_string(), 0), ("b".to_string(), 0)]
        );

        controller.toggle("a");
        assert_eq!(
            names(controller.visible_rows()),
            vec![
                ("a".to_string(), 0),
                ("a.x".to_string(), 1),
                ("a.y".to_string(), 1),
                ("b".to_string(), 0)
            ]
        );
        assert_eq!(controller.all_rows().len(), 5);
    }

    #[test]
    fn reveal_marks_row_active_and_opens_ancestors() {
        let mut controller = controller(vec![Entity::document("a.b.c", "a.b.c.md")]);
        controller.reveal("a.b.c", true);
        let rows = controller.visible_rows();
        let active: Vec<&str> = rows
            .iter()
            .filter(|row| row.active)
            .map(|row| row.identifier.as_str())
            .collect();
        assert_eq!(active, vec!["a.b.c"]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].kind, NodeKind::Virtual);
        assert!(rows[0].has_children);
    }

    #[test]
    fn empty_incremental_request_is_a_no_op() {
        let mut controller = controller(vec![Entity::document("a", "a.md")]);
        let revision = controller.snapshot().revision();
        let outcome = controller
            .refresh(RefreshRequest::Incremental {
                identifiers: Vec::new(),
            })
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::SubtreesReplaced { roots: Vec::new() });
        assert_eq!(controller.snapshot().revision(), revision);
    }

    #[test]
    fn listing_failure_keeps_the_current_tree() {
        let source = FlakySource {
            entities: vec![Entity::document("a.b", "a.b.md")],
            failing: Cell::new(false),
        };
        let mut controller =
            TreeController::new(source, ExpansionStateStore::new(), PathTreeBuilder::new())
                .unwrap();
        let revision = controller.snapshot().revision();

        controller.source().failing.set(true);
        assert!(controller.refresh(RefreshRequest::Full).is_err());
        assert_eq!(controller.refresh_or_keep(RefreshRequest::Full), None);
        assert_eq!(
            controller.refresh_or_keep(RefreshRequest::Incremental {
                identifiers: vec!["a.b".to_string()],
            }),
            None
        );
        assert_eq!(controller.snapshot().revision(), revision);
        assert!(controller.snapshot().contains("a.b"));

        controller.source().failing.set(false);
        assert_eq!(
            controller.refresh_or_keep(RefreshRequest::Full),
            Some(RefreshOutcome::TreeReplaced)
        );
    }
}
