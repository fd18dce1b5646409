//! Replication between two stores via update blobs

use std::sync::{Arc, Mutex};

use folio_store::{
    BlockEvent, BlockUpdate, DeleteOptions, Doc, NewBlock, PropValue, Schema, SequentialIdGenerator,
    StoreConfig, StoreError, StructuralError,
};

fn replica(seed: &str) -> Doc {
    let config = StoreConfig {
        capture_timeout_ms: 0,
        ..StoreConfig::default()
    };
    let mut doc = Doc::new("shared", yrs::Doc::new(), Arc::new(Schema::default_schema()), config)
        .with_id_generator(Box::new(SequentialIdGenerator::from_seed(seed)));
    doc.load().unwrap();
    doc
}

/// Bring `to` up to date with `from` using a state-vector diff
fn sync(from: &Doc, to: &mut Doc) {
    let sv = to.encode_state_vector();
    let diff = from.encode_diff(&sv).unwrap();
    to.apply_update(&diff).unwrap();
}

fn children(doc: &Doc, id: &str) -> Vec<String> {
    doc.get_block(id).unwrap().children.clone()
}

#[test]
fn test_remote_blocks_are_mirrored() {
    let mut alice = replica("alice");
    let mut bob = replica("bob");

    let added = Arc::new(Mutex::new(Vec::new()));
    let seen = added.clone();
    bob.slots.block_updated.subscribe(move |event| {
        if let BlockEvent::Add { id, .. } = event {
            seen.lock().unwrap().push(id.clone());
        }
    });
    let roots = Arc::new(Mutex::new(0));
    let root_seen = roots.clone();
    bob.slots.root_added.subscribe(move |_| *root_seen.lock().unwrap() += 1);

    alice
        .add_block(NewBlock::new("folio:page").with_id("page"), None, None)
        .unwrap();
    alice
        .add_block(NewBlock::new("folio:note").with_id("note"), Some("page"), None)
        .unwrap();
    alice
        .add_block(
            NewBlock::new("folio:paragraph")
                .with_id("p")
                .with_prop("text", PropValue::text("from alice")),
            Some("note"),
            None,
        )
        .unwrap();

    bob.apply_update(&alice.encode_state()).unwrap();

    assert_eq!(bob.block_count(), 3);
    assert_eq!(bob.root().unwrap().id, "page");
    assert_eq!(bob.get_parent("p").unwrap().id, "note");
    assert_eq!(bob.get_block("p").unwrap().text("text"), Some("from alice"));
    assert_eq!(*added.lock().unwrap(), vec!["note", "p"]);
    assert_eq!(*roots.lock().unwrap(), 1);
}

#[test]
fn test_concurrent_edits_converge() {
    let mut alice = replica("alice");
    let mut bob = replica("bob");

    alice
        .add_block(NewBlock::new("folio:page").with_id("page"), None, None)
        .unwrap();
    alice
        .add_block(NewBlock::new("folio:note").with_id("note"), Some("page"), None)
        .unwrap();
    sync(&alice, &mut bob);

    alice
        .add_block(NewBlock::new("folio:paragraph").with_id("from-alice"), Some("note"), None)
        .unwrap();
    bob.add_block(NewBlock::new("folio:list").with_id("from-bob"), Some("note"), None)
        .unwrap();

    sync(&alice, &mut bob);
    sync(&bob, &mut alice);

    assert_eq!(alice.block_count(), 4);
    assert_eq!(children(&alice, "note"), children(&bob, "note"));
    assert_eq!(children(&alice, "note").len(), 2);
}

#[test]
fn test_remote_delete_and_update() {
    let mut alice = replica("alice");
    let mut bob = replica("bob");

    alice
        .add_block(NewBlock::new("folio:page").with_id("page"), None, None)
        .unwrap();
    alice
        .add_blocks(
            vec![
                NewBlock::new("folio:note").with_id("n1"),
                NewBlock::new("folio:note").with_id("n2"),
            ],
            Some("page"),
            None,
        )
        .unwrap();
    sync(&alice, &mut bob);

    let deleted = Arc::new(Mutex::new(Vec::new()));
    let seen = deleted.clone();
    bob.slots.block_updated.subscribe(move |event| {
        if let BlockEvent::Delete { id, parent, .. } = event {
            seen.lock().unwrap().push((id.clone(), parent.clone()));
        }
    });

    alice.delete_block("n1", DeleteOptions::default()).unwrap();
    alice
        .update_block("n2", BlockUpdate::new().set("background", "blue"))
        .unwrap();
    sync(&alice, &mut bob);

    assert!(!bob.has_block("n1"));
    assert_eq!(children(&bob, "page"), vec!["n2"]);
    assert_eq!(bob.get_block("n2").unwrap().text("background"), Some("blue"));
    assert_eq!(
        *deleted.lock().unwrap(),
        vec![("n1".to_string(), Some("page".to_string()))]
    );
}

#[test]
fn test_remote_changes_are_not_undoable_locally() {
    let mut alice = replica("alice");
    let mut bob = replica("bob");

    alice
        .add_block(NewBlock::new("folio:page").with_id("page"), None, None)
        .unwrap();
    sync(&alice, &mut bob);

    assert!(!bob.can_undo());
    assert!(!bob.undo());
    assert!(bob.has_block("page"));
}

#[test]
fn test_updates_apply_in_readonly_mode() {
    let mut alice = replica("alice");
    let mut bob = replica("bob");
    bob.set_readonly(true);

    alice
        .add_block(NewBlock::new("folio:page").with_id("page"), None, None)
        .unwrap();
    sync(&alice, &mut bob);

    assert!(bob.has_block("page"));
    assert_eq!(
        bob.add_block(NewBlock::new("folio:note"), Some("page"), None),
        Err(StoreError::Readonly)
    );
}

#[test]
fn test_update_before_load_is_picked_up_by_load() {
    let mut alice = replica("alice");
    alice
        .add_block(NewBlock::new("folio:page").with_id("page"), None, None)
        .unwrap();

    let mut late = Doc::new("shared", yrs::Doc::new(), Arc::new(Schema::default_schema()), StoreConfig::default());
    late.apply_update(&alice.encode_state()).unwrap();
    assert!(late.is_empty());

    late.load().unwrap();
    assert_eq!(late.root().unwrap().id, "page");
}

#[test]
fn test_remote_deletions_retire_ids() {
    let mut alice = replica("alice");
    let mut bob = replica("bob");

    alice
        .add_block(NewBlock::new("folio:page").with_id("page"), None, None)
        .unwrap();
    alice
        .add_block(NewBlock::new("folio:note").with_id("note"), Some("page"), None)
        .unwrap();
    sync(&alice, &mut bob);

    alice.delete_block("note", DeleteOptions::default()).unwrap();
    sync(&alice, &mut bob);

    assert!(!bob.has_block("note"));
    assert_eq!(
        bob.add_block(NewBlock::new("folio:note").with_id("note"), Some("page"), None),
        Err(StructuralError::DuplicateId("note".to_string()).into())
    );
}

#[test]
fn test_garbage_update_is_rejected() {
    let mut bob = replica("bob");
    let result = bob.apply_update(&[0xff, 0xff, 0xff]);
    assert!(matches!(result, Err(StoreError::Decode(_)) | Err(StoreError::Apply(_))));
    assert!(bob.is_empty());
}
