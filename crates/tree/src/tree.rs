use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifier;

/// Opaque reference to the storage entity backing a node.
/// 指向節點背後儲存實體的不透明參照。
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackingRef(String);

impl BackingRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The category of a storage entity.
/// 儲存實體的類別。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Document,
    Grouping,
}

/// A flat storage entity as reported by the storage layer.
/// 儲存層回報的扁平實體。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entity {
    pub identifier: String,
    pub kind: EntityKind,
    pub backing: BackingRef,
}

impl Entity {
    pub fn new(identifier: impl Into<String>, kind: EntityKind, backing: BackingRef) -> Self {
        Self {
            identifier: identifier.into(),
            kind,
            backing,
        }
    }

    pub fn document(identifier: impl Into<String>, backing: impl Into<String>) -> Self {
        Self::new(identifier, EntityKind::Document, BackingRef::new(backing))
    }

    pub fn grouping(identifier: impl Into<String>, backing: impl Into<String>) -> Self {
        Self::new(identifier, EntityKind::Grouping, BackingRef::new(backing))
    }
}

/// The kind of a tree node.
/// 樹節點的類型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Leaf,
    Container,
    Virtual,
}

impl NodeKind {
    pub fn is_virtual(self) -> bool {
        matches!(self, NodeKind::Virtual)
    }
}

impl From<EntityKind> for NodeKind {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Document => NodeKind::Leaf,
            EntityKind::Grouping => NodeKind::Container,
        }
    }
}

/// Arena slot address of a node inside a [`TreeSnapshot`].
/// 節點在 [`TreeSnapshot`] 節點池中的位置。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Node stored in the snapshot arena.
/// 儲存在快照節點池中的節點。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    identifier: String,
    kind: NodeKind,
    backing: Option<BackingRef>,
    parent: Option<NodeIndex>,
    children: BTreeMap<String, NodeIndex>,
}

impl Node {
    fn new(identifier: String, parent: Option<NodeIndex>) -> Self {
        Self {
            identifier,
            kind: NodeKind::Virtual,
            backing: None,
            parent,
            children: BTreeMap::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Last path segment, used as the display name.
    /// 最後一個路徑區段，作為顯示名稱。
    pub fn name(&self) -> &str {
        identifier::name_of(&self.identifier)
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn backing(&self) -> Option<&BackingRef> {
        self.backing.as_ref()
    }

    pub fn parent(&self) -> Option<NodeIndex> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Looks up the child reached through `segment`.
    /// 依區段名稱取得子節點。
    pub fn child(&self, segment: &str) -> Option<NodeIndex> {
        self.children.get(segment).copied()
    }

    /// Child indices ordered by segment name.
    /// 依區段名稱排序的子節點索引。
    pub fn child_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.children.values().copied()
    }

    pub(crate) fn assign(&mut self, kind: NodeKind, backing: Option<BackingRef>) {
        self.kind = kind;
        self.backing = backing;
    }
}

/// Tree plus identifier lookup produced by one build pass.
/// 單次建構產生的樹狀結構與識別碼索引。
///
/// Nodes live in an arena; both the child links and the lookup hold
/// [`NodeIndex`] values, so the lookup always addresses the exact node the
/// tree links to. Slots released by a patch are recycled.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    slots: Vec<Option<Node>>,
    free: Vec<NodeIndex>,
    lookup: HashMap<String, NodeIndex>,
    skipped: Vec<String>,
    revision: u64,
}

const ROOT: NodeIndex = NodeIndex(0);

impl TreeSnapshot {
    /// Constructs a snapshot containing only the root.
    /// 建立僅含根節點的快照。
    pub fn empty() -> Self {
        Self {
            slots: vec![Some(Node::new(String::new(), None))],
            free: Vec::new(),
            lookup: HashMap::new(),
            skipped: Vec::new(),
            revision: 0,
        }
    }

    pub fn root_index(&self) -> NodeIndex {
        ROOT
    }

    pub fn root(&self) -> &Node {
        match self.slots.first() {
            Some(Some(node)) => node,
            _ => unreachable!("snapshot root slot is never released"),
        }
    }

    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.slots.get(index.0).and_then(Option::as_ref)
    }

    /// Finds a node by identifier.
    /// 依識別碼尋找節點。
    pub fn get(&self, identifier: &str) -> Option<&Node> {
        self.index_of(identifier).and_then(|index| self.node(index))
    }

    pub fn index_of(&self, identifier: &str) -> Option<NodeIndex> {
        self.lookup.get(identifier).copied()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.lookup.contains_key(identifier)
    }

    /// Children of a node ordered by segment name.
    /// 依區段名稱排序的子節點。
    pub fn children(&self, index: NodeIndex) -> impl Iterator<Item = &Node> + '_ {
        self.node(index)
            .into_iter()
            .flat_map(|node| node.children.values())
            .filter_map(move |child| self.node(*child))
    }

    pub fn parent(&self, index: NodeIndex) -> Option<&Node> {
        self.node(index)
            .and_then(|node| node.parent)
            .and_then(|parent| self.node(parent))
    }

    /// Every identifier in the lookup, in no particular order.
    /// 索引內的所有識別碼（不保證順序）。
    pub fn identifiers(&self) -> impl Iterator<Item = &str> + '_ {
        self.lookup.keys().map(String::as_str)
    }

    /// Number of nodes excluding the root.
    /// 不含根節點的節點數量。
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Incremented by every build or patch that touched this snapshot.
    /// 每次建構或修補後遞增的版本號。
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Identifiers of entities dropped because they were malformed.
    /// 因格式錯誤而被略過的實體識別碼。
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Depth-first, segment-ordered traversal that excludes the root.
    /// 深度優先、依區段排序且不含根節點的走訪。
    pub fn walk(&self) -> Walk<'_> {
        let mut stack = Vec::new();
        push_children(self, ROOT, 1, &mut stack);
        Walk {
            snapshot: self,
            stack,
        }
    }

    /// Depth-first traversal of one subtree, the anchor included.
    /// 走訪指定子樹（含錨點本身）。
    pub fn walk_from(&self, index: NodeIndex) -> Walk<'_> {
        let depth = self
            .node(index)
            .map(|node| identifier::depth(node.identifier()))
            .unwrap_or_default();
        let stack = if index == ROOT || self.node(index).is_none() {
            let mut stack = Vec::new();
            push_children(self, index, depth + 1, &mut stack);
            stack
        } else {
            vec![(index, depth)]
        };
        Walk {
            snapshot: self,
            stack,
        }
    }

    pub(crate) fn node_mut(&mut self, index: NodeIndex) -> Option<&mut Node> {
        self.slots.get_mut(index.0).and_then(Option::as_mut)
    }

    /// Returns the child of `parent` at `segment`, creating a virtual node
    /// when it is missing.
    pub(crate) fn child_or_insert(
        &mut self,
        parent: NodeIndex,
        segment: &str,
        identifier: &str,
    ) -> Option<NodeIndex> {
        if let Some(existing) = self.node(parent)?.child(segment) {
            return Some(existing);
        }

        let node = Node::new(identifier.to_string(), Some(parent));
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index.0] = Some(node);
                index
            }
            None => {
                self.slots.push(Some(node));
                NodeIndex(self.slots.len() - 1)
            }
        };
        self.lookup.insert(identifier.to_string(), index);
        self.node_mut(parent)?
            .children
            .insert(segment.to_string(), index);
        Some(index)
    }

    /// Releases every descendant of `index` and demotes it to a virtual
    /// node (the root keeps its identity untouched).
    pub(crate) fn reset_subtree(&mut self, index: NodeIndex) -> usize {
        let mut pending: Vec<NodeIndex> = match self.node_mut(index) {
            Some(node) => {
                if index != ROOT {
                    node.assign(NodeKind::Virtual, None);
                }
                std::mem::take(&mut node.children).into_values().collect()
            }
            None => return 0,
        };

        let mut released = 0usize;
        while let Some(current) = pending.pop() {
            if let Some(node) = self.slots.get_mut(current.0).and_then(Option::take) {
                self.lookup.remove(&node.identifier);
                pending.extend(node.children.into_values());
                self.free.push(current);
                released += 1;
            }
        }
        released
    }

    pub(crate) fn record_skipped(&mut self, identifier: &str) {
        self.skipped.push(identifier.to_string());
    }

    pub(crate) fn forget_skipped_within(&mut self, anchor: &str) {
        self.skipped
            .retain(|identifier| !identifier::is_within(identifier, anchor));
    }

    pub(crate) fn bump_revision(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

impl Default for TreeSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

fn push_children(
    snapshot: &TreeSnapshot,
    index: NodeIndex,
    depth: usize,
    stack: &mut Vec<(NodeIndex, usize)>,
) {
    if let Some(node) = snapshot.node(index) {
        stack.extend(node.children.values().rev().map(|child| (*child, depth)));
    }
}

/// Item produced by [`Walk`].
/// [`Walk`] 走訪時產生的項目。
#[derive(Debug, Clone, Copy)]
pub struct WalkEntry<'a> {
    pub index: NodeIndex,
    pub depth: usize,
    pub node: &'a Node,
}

/// Depth-first iterator over a snapshot.
/// 快照的深度優先迭代器。
pub struct Walk<'a> {
    snapshot: &'a TreeSnapshot,
    stack: Vec<(NodeIndex, usize)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = WalkEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((index, depth)) = self.stack.pop() {
            let Some(node) = self.snapshot.node(index) else {
                continue;
            };
            push_children(self.snapshot, index, depth + 1, &mut self.stack);
            return Some(WalkEntry { index, depth, node });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_has_only_root() {
        let snapshot = TreeSnapshot::empty();
        assert!(snapshot.is_empty());
        assert!(snapshot.root().is_root());
        assert_eq!(snapshot.root().identifier(), "");
        assert_eq!(snapshot.walk().count(), 0);
    }

    #[test]
    fn child_or_insert_links_lookup_and_tree() {
        let mut snapshot = TreeSnapshot::empty();
        let root = snapshot.root_index();
        let a = snapshot.child_or_insert(root, "a", "a").unwrap();
        let ab = snapshot.child_or_insert(a, "b", "a.b").unwrap();

        assert_eq!(snapshot.index_of("a.b"), Some(ab));
        assert_eq!(snapshot.root().child("a"), Some(a));
        assert_eq!(snapshot.parent(ab).map(Node::identifier), Some("a"));
        assert_eq!(snapshot.get("a").map(Node::kind), Some(NodeKind::Virtual));
        // A second insert of the same segment reuses the node.
        assert_eq!(snapshot.child_or_insert(root, "a", "a"), Some(a));
    }

    #[test]
    fn reset_subtree_recycles_slots() {
        let mut snapshot = TreeSnapshot::empty();
        let root = snapshot.root_index();
        let a = snapshot.child_or_insert(root, "a", "a").unwrap();
        snapshot
            .node_mut(a)
            .unwrap()
            .assign(NodeKind::Leaf, Some(BackingRef::new("a.md")));
        let ab = snapshot.child_or_insert(a, "b", "a.b").unwrap();
        snapshot.child_or_insert(ab, "c", "a.b.c").unwrap();

        assert_eq!(snapshot.reset_subtree(a), 2);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("a").map(Node::kind), Some(NodeKind::Virtual));
        assert!(!snapshot.contains("a.b.c"));

        let reused = snapshot.child_or_insert(a, "z", "a.z").unwrap();
        assert_eq!(snapshot.index_of("a.z"), Some(reused));
        assert_eq!(snapshot.slots.len(), 4);
    }

    #[test]
    fn walk_is_segment_sorted_and_depth_tagged() {
        let mut snapshot = TreeSnapshot::empty();
        let root = snapshot.root_index();
        let b = snapshot.child_or_insert(root, "b", "b").unwrap();
        snapshot.child_or_insert(root, "a", "a").unwrap();
        snapshot.child_or_insert(b, "x", "b.x").unwrap();

        let visited: Vec<_> = snapshot
            .walk()
            .map(|entry| (entry.node.identifier().to_string(), entry.depth))
            .collect();
        assert_eq!(
            visited,
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 1),
                ("b.x".to_string(), 2)
            ]
        );

        let subtree: Vec<_> = snapshot
            .walk_from(b)
            .map(|entry| entry.node.identifier().to_string())
            .collect();
        assert_eq!(subtree, vec!["b", "b.x"]);
    }
}
