use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::identifier;
use crate::tree::{Entity, NodeIndex, NodeKind, TreeSnapshot};

/// How a second entity with an already-materialized identifier is merged.
/// 當兩個實體對應到相同識別碼時的合併策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// The entity seen last provides kind and backing reference.
    /// 最後出現的實體覆寫類型與參照。
    #[default]
    LastWins,
    /// The first real entity is kept; later duplicates are ignored.
    /// 保留第一個實體，忽略之後的重複項目。
    FirstWins,
}

/// Builds [`TreeSnapshot`]s from flat entity lists.
/// 由扁平實體清單建構 [`TreeSnapshot`]。
#[derive(Clone, Copy, Debug, Default)]
pub struct PathTreeBuilder {
    policy: CollisionPolicy,
}

impl PathTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: CollisionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// Builds a complete snapshot; malformed identifiers are skipped.
    /// 建構完整快照；格式錯誤的識別碼會被略過。
    pub fn build<'a, I>(&self, entities: I) -> TreeSnapshot
    where
        I: IntoIterator<Item = &'a Entity>,
    {
        let mut snapshot = TreeSnapshot::empty();
        let root = snapshot.root_index();
        for entity in entities {
            self.insert(&mut snapshot, root, 0, entity);
        }
        snapshot.bump_revision();
        debug!(
            nodes = snapshot.len(),
            skipped = snapshot.skipped().len(),
            "built tree snapshot"
        );
        snapshot
    }

    /// Inserts the entities lying at or below `anchor` into the snapshot,
    /// starting the walk at the anchor instead of the root.
    /// 只將錨點子樹內的實體插入快照，從錨點開始走訪。
    ///
    /// Entities outside the anchor are ignored. Returns the number of
    /// entities inserted.
    pub fn build_into<'a, I>(
        &self,
        snapshot: &mut TreeSnapshot,
        anchor: NodeIndex,
        entities: I,
    ) -> usize
    where
        I: IntoIterator<Item = &'a Entity>,
    {
        let Some(anchor_id) = snapshot.node(anchor).map(|node| node.identifier().to_string())
        else {
            return 0;
        };
        snapshot.forget_skipped_within(&anchor_id);
        let skip = identifier::depth(&anchor_id);

        let mut inserted = 0usize;
        for entity in entities {
            if !identifier::is_within(&entity.identifier, &anchor_id) {
                continue;
            }
            if self.insert(snapshot, anchor, skip, entity) {
                inserted += 1;
            }
        }
        inserted
    }

    fn insert(
        &self,
        snapshot: &mut TreeSnapshot,
        start: NodeIndex,
        skip: usize,
        entity: &Entity,
    ) -> bool {
        let id = entity.identifier.as_str();
        let segments = match identifier::segments(id) {
            Ok(segments) => segments,
            Err(err) => {
                warn!(identifier = id, error = %err, "skipping malformed entity");
                snapshot.record_skipped(id);
                return false;
            }
        };

        let mut current = start;
        for segment in segments.iter().skip(skip) {
            let prefix = &id[..segment.end];
            match snapshot.child_or_insert(current, segment.name, prefix) {
                Some(next) => current = next,
                None => {
                    warn!(identifier = id, "lost parent while inserting entity");
                    return false;
                }
            }
        }

        let policy = self.policy;
        let Some(node) = snapshot.node_mut(current) else {
            return false;
        };
        if node.is_root() {
            return false;
        }
        if node.kind().is_virtual() {
            if node.has_children() {
                debug!(identifier = id, "promoting virtual node");
            }
            node.assign(NodeKind::from(entity.kind), Some(entity.backing.clone()));
            return true;
        }

        match policy {
            CollisionPolicy::LastWins => {
                debug!(
                    identifier = id,
                    previous = ?node.backing(),
                    next = %entity.backing,
                    "identifier collision, last entity wins"
                );
                node.assign(NodeKind::from(entity.kind), Some(entity.backing.clone()));
            }
            CollisionPolicy::FirstWins => {
                debug!(
                    identifier = id,
                    ignored = %entity.backing,
                    "identifier collision, keeping first entity"
                );
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{BackingRef, EntityKind};

    fn kind_of(snapshot: &TreeSnapshot, id: &str) -> Option<NodeKind> {
        snapshot.get(id).map(|node| node.kind())
    }

    #[test]
    fn intermediate_segments_become_virtual() {
        let entities = vec![Entity::document("a.b.c", "a.b.c.md")];
        let snapshot = PathTreeBuilder::new().build(&entities);

        assert_eq!(kind_of(&snapshot, "a"), Some(NodeKind::Virtual));
        assert_eq!(kind_of(&snapshot, "a.b"), Some(NodeKind::Virtual));
        assert_eq!(kind_of(&snapshot, "a.b.c"), Some(NodeKind::Leaf));
        assert!(snapshot.get("a").unwrap().backing().is_none());
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn promotion_keeps_node_identity_and_children() {
        let entities = vec![
            Entity::document("a.b.c", "a.b.c.md"),
            Entity::grouping("a.b", "a.b"),
        ];
        let builder = PathTreeBuilder::new();
        let mut snapshot = TreeSnapshot::empty();
        let root = snapshot.root_index();
        builder.build_into(&mut snapshot, root, &entities[..1]);
        let before = snapshot.index_of("a.b").unwrap();

        builder.build_into(&mut snapshot, root, &entities[1..]);
        let node = snapshot.get("a.b").unwrap();
        assert_eq!(snapshot.index_of("a.b"), Some(before));
        assert_eq!(node.kind(), NodeKind::Container);
        assert_eq!(node.backing(), Some(&BackingRef::new("a.b")));
        assert_eq!(node.child("c"), snapshot.index_of("a.b.c"));
    }

    #[test]
    fn collisions_follow_policy() {
        let entities = vec![
            Entity::document("dup", "first.md"),
            Entity::new("dup", EntityKind::Grouping, BackingRef::new("second")),
        ];

        let last = PathTreeBuilder::new().build(&entities);
        let node = last.get("dup").unwrap();
        assert_eq!(node.kind(), NodeKind::Container);
        assert_eq!(node.backing().map(BackingRef::as_str), Some("second"));
        assert_eq!(last.len(), 1);

        let first = PathTreeBuilder::with_policy(CollisionPolicy::FirstWins).build(&entities);
        let node = first.get("dup").unwrap();
        assert_eq!(node.kind(), NodeKind::Leaf);
        assert_eq!(node.backing().map(BackingRef::as_str), Some("first.md"));
    }

    #[test]
    fn malformed_entities_are_skipped_not_fatal() {
        let entities = vec![
            Entity::document("ok.note", "ok.note.md"),
            Entity::document("bad..note", "bad..note.md"),
            Entity::document("trailing.", "trailing..md"),
        ];
        let snapshot = PathTreeBuilder::new().build(&entities);
        assert!(snapshot.contains("ok.note"));
        assert!(!snapshot.contains("bad"));
        assert_eq!(snapshot.skipped(), ["bad..note", "trailing."]);
    }

    #[test]
    fn build_into_ignores_entities_outside_anchor() {
        let builder = PathTreeBuilder::new();
        let mut snapshot = builder.build(&[Entity::document("a.b", "a.b.md")]);
        let anchor = snapshot.index_of("a.b").unwrap();
        let inserted = builder.build_into(
            &mut snapshot,
            anchor,
            &[
                Entity::document("a.b.c", "a.b.c.md"),
                Entity::document("a.bc", "a.bc.md"),
                Entity::document("z", "z.md"),
            ],
        );
        assert_eq!(inserted, 1);
        assert!(snapshot.contains("a.b.c"));
        assert!(!snapshot.contains("a.bc"));
        assert!(!snapshot.contains("z"));
    }

    #[test]
    fn policy_round_trips_through_serde() {
        let json = serde_json::to_string(&CollisionPolicy::FirstWins).unwrap();
        assert_eq!(json, "\"first_wins\"");
        let parsed: CollisionPolicy = serde_json::from_str("\"last_wins\"").unwrap();
        assert_eq!(parsed, CollisionPolicy::LastWins);
    }
}
