//! # CRDT Substrate Glue
//!
//! Maps blocks onto a flat `Y.Map` keyed by block id. Each entry is a nested
//! map:
//!
//! ```text
//! blocks: Y.Map
//!   "<id>": Y.Map
//!     "sys:id"        → string
//!     "sys:flavour"   → string
//!     "sys:children"  → Y.Array<string>
//!     "prop:<name>"   → Any | Y.Text
//! ```
//!
//! The flat map is the source of truth. Nothing here keeps state of its own:
//! readers take a transaction, writers take a mutable transaction, and the
//! deep observer only forwards which keys changed.
//!
//! Ids of deleted blocks are recorded in a sibling map named
//! `<blocks key>:deleted`, so they are never handed out again.

use std::sync::mpsc::Sender;
use std::sync::Arc;

use yrs::types::{EntryChange, Event, PathSegment};
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, DeepObservable, Map, MapPrelim, MapRef, Out, ReadTxn,
    Subscription, Text, TextPrelim, TransactionMut,
};

use crate::props::{PropValue, Props};

pub const SYS_ID: &str = "sys:id";
pub const SYS_FLAVOUR: &str = "sys:flavour";
pub const SYS_CHILDREN: &str = "sys:children";
pub const PROP_PREFIX: &str = "prop:";

/// Origin attached to transactions issued by the store itself
pub const LOCAL_ORIGIN: &str = "folio:local";

/// Origin attached to updates received from other replicas
pub const REMOTE_ORIGIN: &str = "folio:remote";

/// Change forwarded from the deep observer to the block tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubstrateChange {
    /// A block entry was inserted into the top-level map
    Added(String),
    /// A block entry was removed from the top-level map
    Removed(String),
    /// Something inside an existing block entry changed
    Block(String),
}

/// A block entry as currently recorded in the replicated map
#[derive(Debug, Clone, PartialEq)]
pub struct YBlockData {
    pub id: String,
    pub flavour: String,
    pub children: Vec<String>,
    pub props: Props,
}

fn any_str(s: &str) -> Any {
    Any::String(Arc::from(s))
}

fn prop_key(name: &str) -> String {
    format!("{}{}", PROP_PREFIX, name)
}

/// Name of the map recording deleted ids next to `blocks_key`
pub fn tombstones_key(blocks_key: &str) -> String {
    format!("{}:deleted", blocks_key)
}

/// Subscribe to every change below `blocks` and forward it over `sender`.
///
/// The callback runs while the transaction commits, so it must not read
/// or write the document; it only records which entries were touched.
pub fn observe_blocks(blocks: &MapRef, sender: Sender<SubstrateChange>) -> Subscription {
    blocks.observe_deep(move |txn, events| {
        for event in events.iter() {
            match event.path().front() {
                None => {
                    let Event::Map(map_event) = event else {
                        continue;
                    };
                    let mut keys: Vec<(&Arc<str>, &EntryChange)> =
                        map_event.keys(txn).iter().collect();
                    keys.sort_by(|a, b| a.0.cmp(b.0));
                    for (id, change) in keys {
                        let change = match change {
                            EntryChange::Inserted(_) => SubstrateChange::Added(id.to_string()),
                            EntryChange::Removed(_) => SubstrateChange::Removed(id.to_string()),
                            // an entry replaced in place is re-read like an edit
                            EntryChange::Updated(_, _) => SubstrateChange::Block(id.to_string()),
                        };
                        // The receiver only goes away when the document is disposed.
                        let _ = sender.send(change);
                    }
                }
                Some(PathSegment::Key(id)) => {
                    let _ = sender.send(SubstrateChange::Block(id.to_string()));
                }
                Some(PathSegment::Index(_)) => {}
            }
        }
    })
}

// ============================================================================
// Reads
// ============================================================================

/// Ids of every block entry in the map
pub fn block_ids<T: ReadTxn>(txn: &T, blocks: &MapRef) -> Vec<String> {
    blocks.keys(txn).map(|key| key.to_string()).collect()
}

pub fn block_map<T: ReadTxn>(txn: &T, blocks: &MapRef, id: &str) -> Option<MapRef> {
    match blocks.get(txn, id) {
        Some(Out::YMap(block)) => Some(block),
        _ => None,
    }
}

fn children_array<T: ReadTxn>(txn: &T, block: &MapRef) -> Option<ArrayRef> {
    match block.get(txn, SYS_CHILDREN) {
        Some(Out::YArray(children)) => Some(children),
        _ => None,
    }
}

fn read_children<T: ReadTxn>(txn: &T, block: &MapRef) -> Vec<String> {
    match children_array(txn, block) {
        Some(children) => children
            .iter(txn)
            .filter_map(|child| match child {
                Out::Any(Any::String(id)) => Some(id.to_string()),
                _ => None,
            })
            .collect(),
        None => Vec::new(),
    }
}

/// Ordered child ids of `id`, `None` when the entry does not exist
pub fn children_of<T: ReadTxn>(txn: &T, blocks: &MapRef, id: &str) -> Option<Vec<String>> {
    block_map(txn, blocks, id).map(|block| read_children(txn, &block))
}

/// Read a whole block entry
pub fn read_block<T: ReadTxn>(txn: &T, blocks: &MapRef, id: &str) -> Option<YBlockData> {
    let block = block_map(txn, blocks, id)?;

    let flavour = match block.get(txn, SYS_FLAVOUR) {
        Some(Out::Any(Any::String(flavour))) => flavour.to_string(),
        _ => return None,
    };

    let mut props = Props::new();
    for (key, value) in block.iter(txn) {
        if let Some(name) = key.strip_prefix(PROP_PREFIX) {
            props.insert(name.to_string(), PropValue::from_out(txn, value));
        }
    }

    Some(YBlockData {
        id: id.to_string(),
        flavour,
        children: read_children(txn, &block),
        props,
    })
}

// ============================================================================
// Writes
// ============================================================================

/// Create a block entry with its system fields, children and properties
pub fn insert_block(
    txn: &mut TransactionMut,
    blocks: &MapRef,
    id: &str,
    flavour: &str,
    props: &Props,
    children: &[String],
) -> MapRef {
    let block: MapRef = blocks.insert(txn, id, MapPrelim::default());
    block.insert(txn, SYS_ID, any_str(id));
    block.insert(txn, SYS_FLAVOUR, any_str(flavour));

    let array: ArrayRef = block.insert(txn, SYS_CHILDREN, ArrayPrelim::default());
    for (index, child) in children.iter().enumerate() {
        array.insert(txn, index as u32, any_str(child));
    }

    for (name, value) in props {
        set_prop(txn, &block, name, value);
    }
    block
}

pub fn remove_block(txn: &mut TransactionMut, blocks: &MapRef, id: &str) {
    blocks.remove(txn, id);
}

/// Record that `id` belonged to a deleted block
pub fn mark_deleted(txn: &mut TransactionMut, tombstones: &MapRef, id: &str) {
    tombstones.insert(txn, id, Any::Bool(true));
}

pub fn is_deleted<T: ReadTxn>(txn: &T, tombstones: &MapRef, id: &str) -> bool {
    tombstones.contains_key(txn, id)
}

pub fn deleted_ids<T: ReadTxn>(txn: &T, tombstones: &MapRef) -> Vec<String> {
    tombstones.keys(txn).map(|key| key.to_string()).collect()
}

/// Write a property. Replicated text is edited in place when the entry
/// already holds a text, so that bound editors keep their handle.
pub fn set_prop(txn: &mut TransactionMut, block: &MapRef, name: &str, value: &PropValue) {
    let key = prop_key(name);
    match value {
        PropValue::Text(content) => {
            if let Some(Out::YText(text)) = block.get(&*txn, &key) {
                let len = text.len(&*txn);
                if len > 0 {
                    text.remove_range(txn, 0, len);
                }
                if !content.is_empty() {
                    text.insert(txn, 0, content);
                }
            } else {
                block.insert(txn, key, TextPrelim::new(content.as_str()));
            }
        }
        other => {
            block.insert(txn, key, other.to_any());
        }
    }
}

pub fn remove_prop(txn: &mut TransactionMut, block: &MapRef, name: &str) {
    block.remove(txn, &prop_key(name));
}

/// Replace `remove` child ids at `index` with `insert`
pub fn splice_children(
    txn: &mut TransactionMut,
    blocks: &MapRef,
    parent: &str,
    index: u32,
    remove: u32,
    insert: &[String],
) {
    let Some(block) = block_map(&*txn, blocks, parent) else {
        tracing::error!("cannot splice children of missing block {}", parent);
        return;
    };
    let array = match children_array(&*txn, &block) {
        Some(array) => array,
        None => block.insert(txn, SYS_CHILDREN, ArrayPrelim::default()),
    };

    if remove > 0 {
        array.remove_range(txn, index, remove);
    }
    for (offset, child) in insert.iter().enumerate() {
        array.insert(txn, index + offset as u32, any_str(child));
    }
}

/// Mutable view of one block entry, handed to `update_block_with` callbacks.
///
/// Writes made through the writer are not schema-validated.
pub struct BlockWriter<'a, 'doc> {
    txn: &'a mut TransactionMut<'doc>,
    block: MapRef,
    id: String,
}

impl<'a, 'doc> BlockWriter<'a, 'doc> {
    pub(crate) fn new(txn: &'a mut TransactionMut<'doc>, block: MapRef, id: String) -> Self {
        Self { txn, block, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current value of a property
    pub fn get(&self, name: &str) -> Option<PropValue> {
        self.block
            .get(&*self.txn, &prop_key(name))
            .map(|out| PropValue::from_out(&*self.txn, out))
    }

    pub fn set(&mut self, name: &str, value: impl Into<PropValue>) {
        set_prop(self.txn, &self.block, name, &value.into());
    }

    pub fn remove(&mut self, name: &str) {
        remove_prop(self.txn, &self.block, name);
    }

    /// Insert into a replicated text property, creating it when missing
    pub fn insert_text(&mut self, name: &str, index: u32, chunk: &str) {
        let key = prop_key(name);
        match self.block.get(&*self.txn, &key) {
            Some(Out::YText(text)) => text.insert(self.txn, index, chunk),
            _ => {
                self.block.insert(self.txn, key, TextPrelim::new(chunk));
            }
        }
    }

    pub fn delete_text(&mut self, name: &str, index: u32, len: u32) {
        if let Some(Out::YText(text)) = self.block.get(&*self.txn, &prop_key(name)) {
            text.remove_range(self.txn, index, len);
        }
    }

    /// Raw access for edits the writer does not cover
    pub fn txn(&mut self) -> &mut TransactionMut<'doc> {
        &mut *self.txn
    }

    pub fn map(&self) -> &MapRef {
        &self.block
    }
}
