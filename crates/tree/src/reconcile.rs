use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::builder::PathTreeBuilder;
use crate::identifier::{self, IdentifierError};
use crate::lookup::NodeLookupProvider;
use crate::tree::{Entity, TreeSnapshot};

/// Kind of change reported by the storage layer.
/// 儲存層回報的變更種類。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityEventKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

impl EntityEventKind {
    /// Whether the change can alter the tree shape.
    /// 此變更是否可能改變樹狀結構。
    pub fn is_structural(self) -> bool {
        !matches!(self, EntityEventKind::Modified)
    }
}

/// Why a change could not be applied as a local patch.
/// 無法以局部修補套用變更的原因。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UnpatchableReason {
    #[error("{0:?} events can change the tree shape")]
    StructuralChange(EntityEventKind),
    #[error("malformed identifier: {0}")]
    MalformedIdentifier(#[from] IdentifierError),
    #[error("no materialized ancestor for `{0}`")]
    NoMaterializedAncestor(String),
    #[error("`{0}` is not present in the snapshot")]
    LookupMiss(String),
    #[error("subtree at `{0}` has no entities left")]
    EmptySubtree(String),
}

/// Result of an incremental reconciliation attempt.
/// 增量調和的結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchResult {
    Patched { rebuilt_subtree_at: String },
    Unpatchable(UnpatchableReason),
}

impl PatchResult {
    pub fn is_patched(&self) -> bool {
        matches!(self, PatchResult::Patched { .. })
    }

    /// Identifier of the rebuilt subtree, if the patch succeeded.
    /// 修補成功時回傳重建子樹的識別碼。
    pub fn anchor(&self) -> Option<&str> {
        match self {
            PatchResult::Patched { rebuilt_subtree_at } => Some(rebuilt_subtree_at),
            PatchResult::Unpatchable(_) => None,
        }
    }
}

/// Decides whether a change can be applied to one subtree of a snapshot and
/// performs that patch.
/// 判斷變更能否只套用在快照的某個子樹，並執行修補。
#[derive(Clone, Copy, Debug, Default)]
pub struct IncrementalReconciler {
    builder: PathTreeBuilder,
}

impl IncrementalReconciler {
    pub fn new(builder: PathTreeBuilder) -> Self {
        Self { builder }
    }

    /// Longest prefix of `changed` (itself included) known to `lookup`.
    /// 在查詢介面中找出 `changed` 最長（含自身）的已實體化前綴。
    pub fn deepest_materialized_ancestor<L>(
        &self,
        changed: &str,
        lookup: &L,
    ) -> Result<String, UnpatchableReason>
    where
        L: NodeLookupProvider + ?Sized,
    {
        let segments = identifier::segments(changed)?;
        let mut deepest = None;
        for segment in &segments {
            let prefix = &changed[..segment.end];
            if lookup.contains_node(prefix) {
                deepest = Some(prefix);
            }
        }
        deepest
            .map(str::to_string)
            .ok_or_else(|| UnpatchableReason::NoMaterializedAncestor(changed.to_string()))
    }

    /// Patches the snapshot in place for a single changed identifier.
    /// 針對單一變更的識別碼就地修補快照。
    ///
    /// `entities` is the full, current entity list. Only the entities inside
    /// the located subtree are read.
    pub fn try_patch(
        &self,
        kind: EntityEventKind,
        changed: &str,
        snapshot: &mut TreeSnapshot,
        entities: &[Entity],
    ) -> PatchResult {
        if kind.is_structural() {
            return PatchResult::Unpatchable(UnpatchableReason::StructuralChange(kind));
        }
        let anchor = match self.deepest_materialized_ancestor(changed, &*snapshot) {
            Ok(anchor) => anchor,
            Err(reason) => return unpatchable(changed, reason),
        };
        self.patch_at(changed, &anchor, snapshot, entities)
    }

    /// Like [`try_patch`](Self::try_patch), but the anchor is searched among
    /// the nodes the rendering layer reports as materialized.
    /// 與 `try_patch` 相同，但錨點僅在呈現層已實體化的節點中尋找。
    pub fn try_patch_rendered<L>(
        &self,
        kind: EntityEventKind,
        changed: &str,
        snapshot: &mut TreeSnapshot,
        rendered: &L,
        entities: &[Entity],
    ) -> PatchResult
    where
        L: NodeLookupProvider + ?Sized,
    {
        if kind.is_structural() {
            return PatchResult::Unpatchable(UnpatchableReason::StructuralChange(kind));
        }
        let anchor = match self.deepest_materialized_ancestor(changed, rendered) {
            Ok(anchor) => anchor,
            Err(reason) => return unpatchable(changed, reason),
        };
        self.patch_at(changed, &anchor, snapshot, entities)
    }

    fn patch_at(
        &self,
        changed: &str,
        anchor: &str,
        snapshot: &mut TreeSnapshot,
        entities: &[Entity],
    ) -> PatchResult {
        let Some(index) = snapshot.index_of(anchor) else {
            return unpatchable(changed, UnpatchableReason::LookupMiss(anchor.to_string()));
        };

        let subset: Vec<&Entity> = entities
            .iter()
            .filter(|entity| identifier::is_within(&entity.identifier, anchor))
            .collect();
        if !subset
            .iter()
            .any(|entity| identifier::validate(&entity.identifier).is_ok())
        {
            return unpatchable(changed, UnpatchableReason::EmptySubtree(anchor.to_string()));
        }

        let released = snapshot.reset_subtree(index);
        let inserted = self.builder.build_into(snapshot, index, subset);
        snapshot.bump_revision();
        debug!(
            changed,
            anchor,
            released,
            inserted,
            revision = snapshot.revision(),
            "patched subtree"
        );
        PatchResult::Patched {
            rebuilt_subtree_at: anchor.to_string(),
        }
    }
}

fn unpatchable(changed: &str, reason: UnpatchableReason) -> PatchResult {
    debug!(changed, %reason, "change requires a full rebuild");
    PatchResult::Unpatchable(reason)
}
