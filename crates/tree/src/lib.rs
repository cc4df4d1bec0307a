//! Path-tree construction and incremental reconciliation for dot-named entities.
//! 將以點分隔的實體名稱建構成樹狀結構，並支援增量調和。

pub mod builder;
pub mod identifier;
pub mod lookup;
pub mod reconcile;
pub mod tree;

pub use builder::{CollisionPolicy, PathTreeBuilder};
pub use identifier::{IdentifierError, SEPARATOR};
pub use lookup::NodeLookupProvider;
pub use reconcile::{EntityEventKind, IncrementalReconciler, PatchResult, UnpatchableReason};
pub use tree::{
    BackingRef, Entity, EntityKind, Node, NodeIndex, NodeKind, TreeSnapshot, Walk, WalkEntry,
};
