//! # Block Tree
//!
//! In-memory mirror of the flat block map as a navigable tree.
//!
//! The tree never initiates a change. The document feeds it the changes
//! forwarded by the substrate observer and it re-reads the affected entries,
//! so local edits, undo/redo and remote updates all converge through the
//! same path.
//!
//! Parents are not indexed: `find_parent` walks down from the root. Deep
//! trees are traversed with explicit stacks rather than recursion.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use yrs::{MapRef, ReadTxn};

use crate::crdt::{self, SubstrateChange, YBlockData};
use crate::props::{PropValue, Props};
use crate::schema::{BlockRole, Schema};
use crate::slots::BlockEvent;

/// A block as mirrored in memory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub id: String,
    pub flavour: String,
    pub role: BlockRole,
    pub props: Props,
    /// Child ids in document order
    pub children: Vec<String>,
}

impl Block {
    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.props.get(name)
    }

    /// String or text property as `&str`
    pub fn text(&self, name: &str) -> Option<&str> {
        self.props.get(name).and_then(PropValue::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.role == BlockRole::Root
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

/// Lifecycle change produced while mirroring the substrate
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    RootAdded(Block),
    RootDeleted(String),
    Block(BlockEvent),
}

#[derive(Debug)]
pub struct BlockTree {
    schema: Arc<Schema>,
    blocks: HashMap<String, Block>,
    root: Option<String>,
}

impl BlockTree {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            blocks: HashMap::new(),
            root: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn get(&self, id: &str) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn root(&self) -> Option<&Block> {
        self.root.as_deref().and_then(|id| self.blocks.get(id))
    }

    pub fn root_id(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Release every model
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.root = None;
    }

    // =========================================================================
    // Walks
    // =========================================================================

    /// Resolved children of `id`, skipping ids that are not indexed
    pub fn children_of(&self, id: &str) -> Vec<&Block> {
        match self.blocks.get(id) {
            Some(block) => block
                .children
                .iter()
                .filter_map(|child| self.blocks.get(child))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Root-down search for the block whose children contain `id`
    pub fn find_parent(&self, id: &str) -> Option<&Block> {
        let root = self.root()?;
        if root.id == id {
            return None;
        }

        let mut stack = vec![root];
        while let Some(block) = stack.pop() {
            if block.children.iter().any(|child| child == id) {
                return Some(block);
            }
            // push in reverse so the walk visits children in document order
            for child in block.children.iter().rev() {
                if let Some(child) = self.blocks.get(child) {
                    stack.push(child);
                }
            }
        }
        None
    }

    /// `id` followed by all of its descendants, pre-order
    pub fn subtree(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(block) = self.blocks.get(&current) {
                for child in block.children.iter().rev() {
                    stack.push(child.clone());
                }
                out.push(current);
            }
        }
        out
    }

    /// Whether `id` is `ancestor` or lies below it
    pub fn is_in_subtree(&self, ancestor: &str, id: &str) -> bool {
        let mut current = id.to_string();
        let mut steps = 0;
        loop {
            if current == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.blocks.len() {
                tracing::error!("parent chain of {} does not terminate", id);
                return false;
            }
            match self.find_parent(&current) {
                Some(parent) => current = parent.id.clone(),
                None => return false,
            }
        }
    }

    /// Every block, pre-order from the root, then blocks the root cannot reach
    pub fn blocks_in_order(&self) -> Vec<&Block> {
        let order = self.document_order();
        let mut blocks: Vec<&Block> = self.blocks.values().collect();
        blocks.sort_by_key(|block| order.get(&block.id).copied().unwrap_or(usize::MAX));
        blocks
    }

    /// Position of every block in a pre-order walk from the root.
    /// Blocks not reachable from the root follow, ordered by id.
    fn document_order(&self) -> HashMap<String, usize> {
        let mut order = HashMap::with_capacity(self.blocks.len());
        if let Some(root) = &self.root {
            for id in self.subtree(root) {
                let next = order.len();
                order.entry(id).or_insert(next);
            }
        }
        let mut detached: Vec<&String> = self
            .blocks
            .keys()
            .filter(|id| !order.contains_key(*id))
            .collect();
        detached.sort();
        for id in detached {
            let next = order.len();
            order.insert(id.clone(), next);
        }
        order
    }

    // =========================================================================
    // Mirroring
    // =========================================================================

    /// Index every entry already present in the map
    pub fn load<T: ReadTxn>(&mut self, txn: &T, blocks: &MapRef) -> Vec<TreeEvent> {
        let mut ids = crdt::block_ids(txn, blocks);
        ids.sort();
        self.on_blocks_added(txn, blocks, ids)
    }

    /// Bring the tree in line with the map after a committed transaction.
    ///
    /// Only the entries named by `changes` are read, so the cost follows the
    /// number of blocks the transaction touched.
    pub fn apply<T: ReadTxn>(
        &mut self,
        txn: &T,
        blocks: &MapRef,
        changes: &[SubstrateChange],
    ) -> Vec<TreeEvent> {
        let mut removed: HashSet<String> = HashSet::new();
        let mut added: Vec<String> = Vec::new();
        let mut touched: BTreeSet<&str> = BTreeSet::new();
        for change in changes {
            match change {
                SubstrateChange::Added(id) => added.push(id.clone()),
                SubstrateChange::Removed(id) => {
                    if self.blocks.contains_key(id) {
                        removed.insert(id.clone());
                    }
                }
                SubstrateChange::Block(id) => {
                    touched.insert(id.as_str());
                }
            }
        }

        let mut events = Vec::new();

        // Parents must be captured before anything is unindexed.
        for (id, parent) in self.removal_order(&removed) {
            events.extend(self.on_block_removed(&id, parent));
        }

        added.sort();
        added.dedup();
        let added_set: HashSet<String> = added.iter().cloned().collect();
        events.extend(self.on_blocks_added(txn, blocks, added));

        for id in touched {
            if added_set.contains(id) || !self.blocks.contains_key(id) {
                continue;
            }
            if let Some(event) = self.on_block_changed(txn, blocks, id) {
                events.push(event);
            }
        }

        events
    }

    /// Removed ids paired with their parent, each removed subtree in pre-order.
    /// Subtrees are taken by id of their topmost block.
    fn removal_order(&self, removed: &HashSet<String>) -> Vec<(String, Option<String>)> {
        let nested: HashSet<&str> = removed
            .iter()
            .filter_map(|id| self.blocks.get(id))
            .flat_map(|block| block.children.iter())
            .filter(|child| removed.contains(*child))
            .map(String::as_str)
            .collect();
        let mut tops: Vec<&String> = removed
            .iter()
            .filter(|id| !nested.contains(id.as_str()))
            .collect();
        tops.sort();

        let mut order = Vec::with_capacity(removed.len());
        let mut seen: HashSet<String> = HashSet::new();
        for top in tops {
            let parent = self.find_parent(top).map(|block| block.id.clone());
            let mut stack = vec![(top.clone(), parent)];
            while let Some((id, parent)) = stack.pop() {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(block) = self.blocks.get(&id) {
                    for child in block.children.iter().rev() {
                        if removed.contains(child) {
                            stack.push((child.clone(), Some(id.clone())));
                        }
                    }
                }
                order.push((id, parent));
            }
        }

        // removed blocks that only reference each other
        let mut rest: Vec<&String> = removed.iter().filter(|id| !seen.contains(*id)).collect();
        rest.sort();
        for id in rest {
            order.push((id.clone(), None));
        }
        order
    }

    /// Index new entries together with any children already present in the
    /// map. Each new subtree is reported in pre-order, roots first.
    fn on_blocks_added<T: ReadTxn>(
        &mut self,
        txn: &T,
        blocks: &MapRef,
        ids: Vec<String>,
    ) -> Vec<TreeEvent> {
        let mut read: HashMap<String, YBlockData> = HashMap::new();
        let mut stack: Vec<String> = ids;
        while let Some(id) = stack.pop() {
            if self.blocks.contains_key(&id) || read.contains_key(&id) {
                continue;
            }
            let Some(data) = crdt::read_block(txn, blocks, &id) else {
                tracing::warn!("failed to handle block add, entry {} not found", id);
                continue;
            };
            for child in &data.children {
                if !self.blocks.contains_key(child) && !read.contains_key(child) {
                    stack.push(child.clone());
                }
            }
            read.insert(id, data);
        }
        if read.is_empty() {
            return Vec::new();
        }

        let nested: HashSet<&str> = read
            .values()
            .flat_map(|data| data.children.iter())
            .filter(|child| read.contains_key(*child))
            .map(String::as_str)
            .collect();
        let mut tops: Vec<&String> = read.keys().filter(|id| !nested.contains(id.as_str())).collect();
        tops.sort_by(|a, b| {
            let a_content = self.role_of(&read[*a].flavour) != BlockRole::Root;
            let b_content = self.role_of(&read[*b].flavour) != BlockRole::Root;
            (a_content, a).cmp(&(b_content, b))
        });

        let mut order: Vec<String> = Vec::with_capacity(read.len());
        let mut seen: HashSet<&str> = HashSet::new();
        for top in tops {
            let mut stack = vec![top.as_str()];
            while let Some(id) = stack.pop() {
                if !seen.insert(id) {
                    continue;
                }
                if let Some(data) = read.get(id) {
                    for child in data.children.iter().rev() {
                        if read.contains_key(child) {
                            stack.push(child.as_str());
                        }
                    }
                }
                order.push(id.to_string());
            }
        }
        let mut rest: Vec<String> = read
            .keys()
            .filter(|id| !seen.contains(id.as_str()))
            .cloned()
            .collect();
        rest.sort();
        order.extend(rest);

        for (id, data) in read {
            let block = self.build_block(data);
            self.blocks.insert(id, block);
        }

        let mut events = Vec::with_capacity(order.len());
        for id in order {
            let Some(block) = self.blocks.get(&id) else {
                continue;
            };
            for child in &block.children {
                if !self.blocks.contains_key(child) {
                    tracing::warn!("block {} references missing child {}", id, child);
                }
            }

            if block.is_root() {
                match &self.root {
                    Some(existing) if existing != &id => {
                        tracing::error!(
                            "second root {} ignored, document root is already {}",
                            id,
                            existing
                        );
                        events.push(TreeEvent::Block(BlockEvent::Add {
                            id: block.id.clone(),
                            flavour: block.flavour.clone(),
                        }));
                    }
                    _ => {
                        tracing::debug!("root block {} added", id);
                        events.push(TreeEvent::RootAdded(block.clone()));
                        self.root = Some(id);
                    }
                }
                continue;
            }

            tracing::debug!("block {} ({}) added", id, block.flavour);
            events.push(TreeEvent::Block(BlockEvent::Add {
                id: block.id.clone(),
                flavour: block.flavour.clone(),
            }));
        }
        events
    }

    fn role_of(&self, flavour: &str) -> BlockRole {
        self.schema
            .get(flavour)
            .map_or(BlockRole::Content, |schema| schema.role)
    }

    fn build_block(&self, data: YBlockData) -> Block {
        let role = match self.schema.get(&data.flavour) {
            Some(schema) => schema.role,
            None => {
                tracing::warn!("block {} has unregistered flavour {}", data.id, data.flavour);
                BlockRole::Content
            }
        };
        Block {
            id: data.id,
            flavour: data.flavour,
            role,
            props: data.props,
            children: data.children,
        }
    }

    fn on_block_removed(&mut self, id: &str, parent: Option<String>) -> Vec<TreeEvent> {
        let model = self.blocks.remove(id);
        debug_assert!(model.is_some(), "removed block {} was not indexed", id);
        let Some(model) = model else {
            tracing::error!("removed block {} was not indexed", id);
            return Vec::new();
        };

        let mut events = Vec::new();
        if self.root.as_deref() == Some(id) {
            self.root = None;
            events.push(TreeEvent::RootDeleted(id.to_string()));
        }

        tracing::debug!("block {} ({}) deleted", id, model.flavour);
        events.push(TreeEvent::Block(BlockEvent::Delete {
            id: id.to_string(),
            flavour: model.flavour.clone(),
            parent,
            model,
        }));
        events
    }

    fn on_block_changed<T: ReadTxn>(
        &mut self,
        txn: &T,
        blocks: &MapRef,
        id: &str,
    ) -> Option<TreeEvent> {
        let data = crdt::read_block(txn, blocks, id)?;
        let block = self.blocks.get_mut(id)?;

        let mut changed: BTreeSet<String> = BTreeSet::new();
        for (name, value) in &data.props {
            if block.props.get(name) != Some(value) {
                changed.insert(name.clone());
            }
        }
        for name in block.props.keys() {
            if !data.props.contains_key(name) {
                changed.insert(name.clone());
            }
        }
        let children_changed = block.children != data.children;

        if changed.is_empty() && !children_changed {
            return None;
        }

        block.props = data.props;
        block.children = data.children;

        Some(TreeEvent::Block(BlockEvent::Update {
            id: id.to_string(),
            flavour: block.flavour.clone(),
            props: changed.into_iter().collect(),
            children: children_changed,
        }))
    }
}
