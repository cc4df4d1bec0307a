use std::cell::RefCell;
use std::fs;
use std::rc::Rc;
use std::time::{Duration, Instant};

use notetree_settings::{
    CoalescePolicy, ExpansionStateFile, ExpansionStateStore, PersistedExpansion,
};
use notetree_sync::{
    ChangeEventCoordinator, EntityEvent, EntitySource, RefreshOutcome, RefreshRequest,
    TreeController, VaultSource,
};
use notetree_tree::{Entity, NodeKind, PathTreeBuilder};
use tempfile::tempdir;

const DELAY: Duration = Duration::from_millis(300);

fn controller(entities: Vec<Entity>) -> TreeController<Vec<Entity>> {
    TreeController::new(entities, ExpansionStateStore::new(), PathTreeBuilder::new())
        .expect("initial build")
}

fn kind_of(controller: &TreeController<Vec<Entity>>, id: &str) -> Option<NodeKind> {
    controller.snapshot().get(id).map(|node| node.kind())
}

#[test]
fn modified_then_created_in_one_window_is_one_full_rebuild() {
    let mut controller = controller(vec![
        Entity::document("x.y", "x.y.md"),
        Entity::document("other", "other.md"),
    ]);
    let mut coordinator = ChangeEventCoordinator::new(DELAY, CoalescePolicy::StructuralWins);
    let start = Instant::now();

    controller.source_mut().push(Entity::document("x.z", "x.z.md"));
    coordinator.on_entity_event(EntityEvent::modified("x.y"), start);
    coordinator.on_entity_event(EntityEvent::created("x.z"), start + Duration::from_millis(50));

    let mut requests = Vec::new();
    let mut now = start;
    while now < start + Duration::from_secs(2) {
        if let Some(request) = coordinator.poll(now) {
            requests.push(request);
        }
        now += Duration::from_millis(25);
    }
    assert_eq!(requests, vec![RefreshRequest::Full]);

    let outcome = controller.refresh(RefreshRequest::Full).expect("refresh");
    assert_eq!(outcome, RefreshOutcome::TreeReplaced);
    assert_eq!(kind_of(&controller, "x.z"), Some(NodeKind::Leaf));
}

#[test]
fn deleting_a_real_parent_escalates_and_leaves_placeholders() {
    let mut controller = controller(vec![
        Entity::document("a.b", "a.b.md"),
        Entity::document("a.b.c", "a.b.c.md"),
    ]);
    controller
        .source_mut()
        .retain(|entity| entity.identifier != "a.b");

    // Even when reported as a content change, the vanished entity cannot be patched.
    let outcome = controller
        .refresh(RefreshRequest::Incremental {
            identifiers: vec!["a.b".to_string()],
        })
        .expect("refresh");
    assert_eq!(outcome, RefreshOutcome::TreeReplaced);
    assert_eq!(kind_of(&controller, "a"), Some(NodeKind::Virtual));
    assert_eq!(kind_of(&controller, "a.b"), Some(NodeKind::Virtual));
    assert_eq!(kind_of(&controller, "a.b.c"), Some(NodeKind::Leaf));
}

#[test]
fn content_changes_patch_only_their_subtrees() {
    let mut controller = controller(vec![
        Entity::document("a.b", "a.b.md"),
        Entity::document("x.y", "x.y.md"),
        Entity::document("z", "z.md"),
    ]);
    let z_before = controller.snapshot().index_of("z");

    for entity in controller.source_mut().iter_mut() {
        if entity.identifier == "x.y" {
            *entity = Entity::document("x.y", "moved/x.y.md");
        }
    }
    let outcome = controller
        .refresh(RefreshRequest::Incremental {
            identifiers: vec!["x.y".to_string(), "a.b".to_string(), "x.y".to_string()],
        })
        .expect("refresh");
    assert_eq!(
        outcome,
        RefreshOutcome::SubtreesReplaced {
            roots: vec!["x.y".to_string(), "a.b".to_string()]
        }
    );
    assert_eq!(controller.snapshot().index_of("z"), z_before);
    assert_eq!(
        controller
            .snapshot()
            .get("x.y")
            .and_then(|node| node.backing())
            .map(|backing| backing.as_str()),
        Some("moved/x.y.md")
    );
}

#[test]
fn expansion_survives_full_rebuilds() {
    let mut controller = controller(vec![Entity::document("a.b", "a.b.md")]);
    controller.toggle("a");
    controller.source_mut().push(Entity::document("a.c", "a.c.md"));
    controller.rebuild().expect("rebuild");

    let visible: Vec<String> = controller
        .visible_rows()
        .into_iter()
        .map(|row| row.identifier)
        .collect();
    assert_eq!(visible, vec!["a", "a.b", "a.c"]);
}

#[test]
fn expand_all_leaves_later_nodes_collapsed() {
    let mut controller = controller(vec![Entity::document("a.b", "a.b.md")]);
    controller.expand_all();
    controller.source_mut().push(Entity::document("n.m", "n.m.md"));
    controller.rebuild().expect("rebuild");

    assert!(controller.state().is_expanded("a"));
    assert!(!controller.state().is_expanded("n"));
}

#[test]
fn state_round_trips_through_the_state_file() {
    let dir = tempdir().expect("tempdir");
    let file = ExpansionStateFile::new(dir.path().join("expansion.json"));
    let seen = Rc::new(RefCell::new(0usize));

    let mut state = file.load_store();
    file.attach(&mut state);
    let entities = vec![Entity::document("a.b.c", "a.b.c.md")];
    let mut controller =
        TreeController::new(entities, state, PathTreeBuilder::new()).expect("initial build");
    controller.reveal("a.b.c", true);
    controller.toggle("a.b.c");
    controller.toggle("a.b.c");

    let persisted = file.load();
    assert_eq!(
        persisted,
        PersistedExpansion {
            expanded_nodes: vec!["a".to_string(), "a.b".to_string()]
        }
    );

    let mut restored = ExpansionStateStore::new();
    let sink = Rc::clone(&seen);
    restored.set_on_change(move |_| *sink.borrow_mut() += 1);
    restored.restore_state(persisted.expanded_nodes.clone());
    assert_eq!(restored.export_state(), persisted.expanded_nodes);
    assert_eq!(*seen.borrow(), 1);
}

#[test]
fn vault_changes_flow_through_to_the_tree() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("journal.2024.md"), "").expect("write note");
    let source = VaultSource::new(dir.path(), "md");
    assert_eq!(source.list_entities().expect("list").len(), 1);

    let mut controller =
        TreeController::new(source, ExpansionStateStore::new(), PathTreeBuilder::new())
            .expect("initial build");
    assert_eq!(
        controller.snapshot().get("journal").map(|node| node.kind()),
        Some(NodeKind::Virtual)
    );

    fs::write(dir.path().join("journal.md"), "").expect("write parent");
    let outcome = controller.refresh(RefreshRequest::Full).expect("refresh");
    assert_eq!(outcome, RefreshOutcome::TreeReplaced);
    assert_eq!(
        controller.snapshot().get("journal").map(|node| node.kind()),
        Some(NodeKind::Leaf)
    );
}
