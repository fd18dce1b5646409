//! # Document Store
//!
//! `Doc` is the only mutation gateway of a document. Every public mutation:
//!
//! 1. checks the document state and access mode,
//! 2. validates the whole request against the schema and the current tree,
//! 3. writes to the replicated map inside exactly one local transaction,
//! 4. drains the observer channel so the block tree mirrors the commit,
//! 5. emits the resulting notifications.
//!
//! A failed call returns before step 3, so the map is never partially
//! written. Remote updates enter through `apply_update` and follow steps
//! 4 and 5 only.

use std::collections::HashSet;
use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc as YDoc, MapRef, ReadTxn, StateVector, Subscription, Transact, TransactionMut, Update};

use crate::block_tree::{Block, BlockTree, TreeEvent};
use crate::config::StoreConfig;
use crate::crdt::{self, BlockWriter, SubstrateChange, LOCAL_ORIGIN, REMOTE_ORIGIN};
use crate::errors::{NotFoundError, StoreError, StructuralError, ValidationError};
use crate::history::History;
use crate::id_generator::IdGenerator;
use crate::mutations::{BlockUpdate, DeleteOptions, Mutation, MutationResult, NewBlock, Place};
use crate::props::Props;
use crate::schema::{FlavourSchema, Schema};
use crate::slots::DocSlots;
use crate::Result;

/// Lifecycle of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocState {
    Unloaded,
    Loading,
    Ready,
    Disposed,
}

/// Write capability held by the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl Access {
    pub fn can_write(self) -> bool {
        self == Access::ReadWrite
    }
}

/// A block ready to be written, with every decision already taken
#[derive(Debug)]
struct PlannedBlock {
    id: String,
    flavour: String,
    props: Props,
    children: Vec<String>,
    parent: Option<String>,
    index: Option<usize>,
    /// (child, current parent) pairs to unlink before inserting
    detach: Vec<(String, String)>,
}

#[derive(Debug)]
struct ChildrenSplice {
    index: u32,
    remove: u32,
    insert: Vec<String>,
    detach: Vec<(String, String)>,
    deleted: Vec<String>,
}

pub struct Doc {
    id: String,
    ydoc: YDoc,
    blocks: MapRef,
    tombstones: MapRef,
    schema: Arc<Schema>,
    config: StoreConfig,
    state: DocState,
    access: Access,
    tree: BlockTree,
    history: History,
    ids: Box<dyn IdGenerator>,
    sender: Sender<SubstrateChange>,
    changes: Receiver<SubstrateChange>,
    subscription: Option<Subscription>,
    pub slots: DocSlots,
}

impl Doc {
    /// Create an unloaded document over a shared substrate handle
    pub fn new(id: impl Into<String>, ydoc: YDoc, schema: Arc<Schema>, config: StoreConfig) -> Self {
        let id = id.into();
        let blocks = ydoc.get_or_insert_map(config.blocks_key.as_str());
        let tombstones = ydoc.get_or_insert_map(crdt::tombstones_key(&config.blocks_key));
        let history = History::new(&ydoc, &blocks, config.capture_timeout());
        let ids = config.id_generator.build(&id);
        let (sender, changes) = channel();
        let access = if config.readonly {
            Access::ReadOnly
        } else {
            Access::ReadWrite
        };

        Self {
            tree: BlockTree::new(schema.clone()),
            id,
            ydoc,
            blocks,
            tombstones,
            schema,
            config,
            state: DocState::Unloaded,
            access,
            history,
            ids,
            sender,
            changes,
            subscription: None,
            slots: DocSlots::default(),
        }
    }

    /// Replace the id generator, e.g. with a deterministic one in tests
    pub fn with_id_generator(mut self, ids: Box<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The shared substrate handle
    pub fn ydoc(&self) -> &YDoc {
        &self.ydoc
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn state(&self) -> DocState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == DocState::Ready
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Build the block tree from the map. Repeated calls are no-ops.
    pub fn load(&mut self) -> Result<()> {
        self.load_with(|_| Ok(()))
    }

    /// Like [`Doc::load`], running `init` once the tree exists and before
    /// `ready` fires. Blocks created by `init` are not undoable.
    pub fn load_with<F>(&mut self, init: F) -> Result<()>
    where
        F: FnOnce(&mut Doc) -> Result<()>,
    {
        match self.state {
            DocState::Ready | DocState::Loading => return Ok(()),
            DocState::Disposed => return Err(StoreError::Disposed),
            DocState::Unloaded => {}
        }

        self.state = DocState::Loading;
        self.subscription = Some(crdt::observe_blocks(&self.blocks, self.sender.clone()));

        let events = {
            let txn = self.ydoc.transact();
            let live = crdt::block_ids(&txn, &self.blocks);
            let deleted = crdt::deleted_ids(&txn, &self.tombstones);
            for id in live.iter().chain(deleted.iter()) {
                self.ids.reserve(id);
            }
            self.tree.load(&txn, &self.blocks)
        };
        // Whatever the observer saw so far is already part of the load.
        self.changes.try_iter().for_each(drop);
        self.emit(events);

        self.state = DocState::Ready;
        tracing::debug!("document {} loaded with {} blocks", self.id, self.tree.len());

        let result = init(self);
        self.history.clear();
        self.slots.ready.emit(&());
        result
    }

    /// Detach from the substrate and release the tree. The map is untouched.
    pub fn dispose(&mut self) {
        if self.state == DocState::Disposed {
            return;
        }
        self.subscription = None;
        self.changes.try_iter().for_each(drop);
        self.history.clear();
        self.tree.clear();
        self.slots.dispose();
        self.state = DocState::Disposed;
        tracing::debug!("document {} disposed", self.id);
    }

    // =========================================================================
    // Access
    // =========================================================================

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        self.access = if readonly {
            Access::ReadOnly
        } else {
            Access::ReadWrite
        };
        self.slots.history_updated.emit(&());
    }

    pub fn is_readonly(&self) -> bool {
        !self.access.can_write()
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.state {
            DocState::Ready => {}
            DocState::Unloaded | DocState::Loading => return Err(StoreError::NotReady),
            DocState::Disposed => return Err(StoreError::Disposed),
        }
        if self.is_readonly() {
            tracing::error!("cannot modify document {} in read-only mode", self.id);
            return Err(StoreError::Readonly);
        }
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn root(&self) -> Option<&Block> {
        self.tree.root()
    }

    pub fn get_block(&self, id: &str) -> Option<&Block> {
        self.tree.get(id)
    }

    pub fn has_block(&self, id: &str) -> bool {
        self.tree.contains(id)
    }

    /// Every block in document order
    pub fn get_blocks(&self) -> Vec<&Block> {
        self.tree.blocks_in_order()
    }

    pub fn get_blocks_by_flavour(&self, flavours: &[&str]) -> Vec<&Block> {
        self.tree
            .blocks_in_order()
            .into_iter()
            .filter(|block| flavours.contains(&block.flavour.as_str()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn block_count(&self) -> usize {
        self.tree.len()
    }

    pub fn children(&self, id: &str) -> Vec<&Block> {
        self.tree.children_of(id)
    }

    /// Root-down search, `None` for the root and unknown ids
    pub fn get_parent(&self, id: &str) -> Option<&Block> {
        self.tree.find_parent(id)
    }

    fn position_in_parent(&self, id: &str) -> Option<(&Block, usize)> {
        let parent = self.tree.find_parent(id)?;
        let index = parent.children.iter().position(|child| child == id)?;
        Some((parent, index))
    }

    pub fn get_previous_sibling(&self, id: &str) -> Option<&Block> {
        let (parent, index) = self.position_in_parent(id)?;
        parent.children[..index]
            .iter()
            .rev()
            .find_map(|sibling| self.tree.get(sibling))
    }

    pub fn get_previous_siblings(&self, id: &str) -> Vec<&Block> {
        match self.position_in_parent(id) {
            Some((parent, index)) => parent.children[..index]
                .iter()
                .filter_map(|sibling| self.tree.get(sibling))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn get_next_sibling(&self, id: &str) -> Option<&Block> {
        let (parent, index) = self.position_in_parent(id)?;
        parent.children[index + 1..]
            .iter()
            .find_map(|sibling| self.tree.get(sibling))
    }

    pub fn get_next_siblings(&self, id: &str) -> Vec<&Block> {
        match self.position_in_parent(id) {
            Some((parent, index)) => parent.children[index + 1..]
                .iter()
                .filter_map(|sibling| self.tree.get(sibling))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn get_schema_by_flavour(&self, flavour: &str) -> Result<&FlavourSchema> {
        self.schema
            .get(flavour)
            .ok_or_else(|| NotFoundError::Flavour(flavour.to_string()).into())
    }

    pub fn get_initial_props_by_flavour(&self, flavour: &str) -> Result<Props> {
        Ok(self.get_schema_by_flavour(flavour)?.default_props())
    }

    pub fn generate_block_id(&mut self) -> String {
        loop {
            let id = self.ids.new_id();
            if !self.is_taken(&id) {
                return id;
            }
        }
    }

    /// Whether `id` names a live block or one deleted earlier
    fn is_taken(&self, id: &str) -> bool {
        if self.tree.contains(id) {
            return true;
        }
        let txn = self.ydoc.transact();
        crdt::is_deleted(&txn, &self.tombstones, id)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create one block and return its id
    pub fn add_block(
        &mut self,
        block: NewBlock,
        parent: Option<&str>,
        index: Option<usize>,
    ) -> Result<String> {
        let mut ids = self.add_blocks(vec![block], parent, index)?;
        ids.pop()
            .ok_or_else(|| StoreError::Apply("no block was created".to_string()))
    }

    /// Create several blocks in one transaction, consecutive from `index`.
    /// Nothing is written unless every block validates.
    pub fn add_blocks(
        &mut self,
        blocks: Vec<NewBlock>,
        parent: Option<&str>,
        index: Option<usize>,
    ) -> Result<Vec<String>> {
        self.ensure_writable()?;
        if blocks.is_empty() {
            return Ok(Vec::new());
        }

        let plan = self.plan_blocks(blocks, parent, index)?;
        let ids: Vec<String> = plan.iter().map(|block| block.id.clone()).collect();

        self.transact(|txn, map| {
            for block in &plan {
                for (child, old_parent) in &block.detach {
                    detach_child(txn, map, old_parent, child);
                }
                crdt::insert_block(txn, map, &block.id, &block.flavour, &block.props, &block.children);
                if let Some(parent) = &block.parent {
                    let len = crdt::children_of(&*txn, map, parent).map_or(0, |c| c.len());
                    let at = block.index.map_or(len, |index| index.min(len));
                    crdt::splice_children(txn, map, parent, at as u32, 0, &[block.id.clone()]);
                }
            }
        });

        tracing::debug!("added blocks {:?} to document {}", ids, self.id);
        Ok(ids)
    }

    fn plan_blocks(
        &mut self,
        blocks: Vec<NewBlock>,
        parent: Option<&str>,
        index: Option<usize>,
    ) -> Result<Vec<PlannedBlock>> {
        if let Some(parent) = parent {
            if !self.tree.contains(parent) {
                return Err(StoreError::block_not_found(parent));
            }
        }

        let mut plan: Vec<PlannedBlock> = Vec::with_capacity(blocks.len());
        let mut reserved: HashSet<String> = HashSet::new();
        let mut adopted: HashSet<String> = HashSet::new();
        let mut new_root: Option<String> = None;

        for (offset, block) in blocks.into_iter().enumerate() {
            if block.flavour.is_empty() {
                return Err(ValidationError::EmptyFlavour.into());
            }
            let schema = self
                .schema
                .get(&block.flavour)
                .ok_or_else(|| ValidationError::UnknownFlavour(block.flavour.clone()))?;

            let target = match parent {
                Some(parent) => Some(parent.to_string()),
                None if schema.is_root() => None,
                None => match self.tree.root_id() {
                    Some(root) => Some(root.to_string()),
                    None => return Err(ValidationError::MissingParent(block.flavour.clone()).into()),
                },
            };

            if target.is_none() {
                if let Some(root) = self.tree.root_id().or(new_root.as_deref()) {
                    return Err(StructuralError::DuplicateRoot(root.to_string()).into());
                }
            }

            let parent_flavour = target
                .as_deref()
                .and_then(|id| self.tree.get(id))
                .map(|block| block.flavour.as_str());
            let mut child_flavours = Vec::with_capacity(block.children.len());
            for child in &block.children {
                let child_block = self
                    .tree
                    .get(child)
                    .ok_or_else(|| StoreError::block_not_found(child))?;
                child_flavours.push(child_block.flavour.as_str());
            }
            self.schema.validate(&block.flavour, parent_flavour, &child_flavours)?;

            let mut detach = Vec::new();
            for child in &block.children {
                if !adopted.insert(child.clone()) {
                    return Err(StructuralError::DuplicateId(child.clone()).into());
                }
                if let Some(target) = &target {
                    if self.tree.is_in_subtree(child, target) {
                        return Err(StructuralError::Cycle(child.clone()).into());
                    }
                }
                if let Some(old_parent) = self.tree.find_parent(child) {
                    detach.push((child.clone(), old_parent.id.clone()));
                }
            }

            let mut props = schema.default_props();
            props.extend(block.props);
            let is_root = schema.is_root();

            let id = match block.id {
                Some(id) => {
                    if self.is_taken(&id) || reserved.contains(&id) {
                        return Err(StructuralError::DuplicateId(id).into());
                    }
                    id
                }
                None => loop {
                    let id = self.ids.new_id();
                    if !self.is_taken(&id) && !reserved.contains(&id) {
                        break id;
                    }
                },
            };
            reserved.insert(id.clone());
            if is_root && target.is_none() {
                new_root = Some(id.clone());
            }

            plan.push(PlannedBlock {
                index: target.as_ref().and(index.map(|index| index.saturating_add(offset))),
                id,
                flavour: block.flavour,
                props,
                children: block.children,
                parent: target,
                detach,
            });
        }

        Ok(plan)
    }

    /// Create blocks right before or after `target`
    pub fn add_sibling_blocks(
        &mut self,
        target: &str,
        blocks: Vec<NewBlock>,
        place: Place,
    ) -> Result<Vec<String>> {
        self.ensure_writable()?;
        if !self.tree.contains(target) {
            return Err(StoreError::block_not_found(target));
        }
        let (parent, index) = self
            .position_in_parent(target)
            .map(|(parent, index)| (parent.id.clone(), index))
            .ok_or_else(|| StructuralError::MissingParent(target.to_string()))?;

        let index = match place {
            Place::Before => index,
            Place::After => index + 1,
        };
        self.add_blocks(blocks, Some(&parent), Some(index))
    }

    /// Write properties and optionally replace the child list.
    ///
    /// Children dropped from the list are deleted with their subtrees;
    /// newly listed children are moved here from their current parent.
    pub fn update_block(&mut self, id: &str, update: BlockUpdate) -> Result<()> {
        self.ensure_writable()?;
        let block = self.tree.get(id).ok_or_else(|| StoreError::block_not_found(id))?;
        if update.is_empty() {
            return Ok(());
        }

        let splice = match &update.children {
            Some(children) => Some(self.plan_children(block, children)?),
            None => None,
        };

        let id_owned = id.to_string();
        let tombstones = self.tombstones.clone();
        self.transact(|txn, map| {
            let Some(block) = crdt::block_map(&*txn, map, &id_owned) else {
                return;
            };
            for (name, value) in &update.props {
                crdt::set_prop(txn, &block, name, value);
            }
            for name in &update.remove {
                crdt::remove_prop(txn, &block, name);
            }
            if let Some(splice) = &splice {
                for (child, old_parent) in &splice.detach {
                    detach_child(txn, map, old_parent, child);
                }
                crdt::splice_children(txn, map, &id_owned, splice.index, splice.remove, &splice.insert);
                for deleted in &splice.deleted {
                    crdt::remove_block(txn, map, deleted);
                    crdt::mark_deleted(txn, &tombstones, deleted);
                }
            }
        });

        tracing::debug!("updated block {}", id);
        Ok(())
    }

    fn plan_children(&self, block: &Block, children: &[String]) -> Result<ChildrenSplice> {
        let mut listed: HashSet<&str> = HashSet::new();
        for child in children {
            if !listed.insert(child.as_str()) {
                return Err(StructuralError::DuplicateId(child.clone()).into());
            }
            let child_block = self
                .tree
                .get(child)
                .ok_or_else(|| StoreError::block_not_found(child))?;
            self.schema.validate_pair(&child_block.flavour, &block.flavour)?;
            if self.tree.is_in_subtree(child, &block.id) {
                return Err(StructuralError::Cycle(child.clone()).into());
            }
        }

        let kept: HashSet<String> = children
            .iter()
            .flat_map(|child| self.tree.subtree(child))
            .collect();
        let deleted: Vec<String> = block
            .children
            .iter()
            .filter(|child| !listed.contains(child.as_str()))
            .flat_map(|child| self.tree.subtree(child))
            .filter(|id| !kept.contains(id))
            .collect();
        let deleted_set: HashSet<&str> = deleted.iter().map(String::as_str).collect();

        let detach = children
            .iter()
            .filter(|child| !block.children.contains(child))
            .filter_map(|child| {
                let parent = self.tree.find_parent(child)?;
                if deleted_set.contains(parent.id.as_str()) {
                    return None;
                }
                Some((child.clone(), parent.id.clone()))
            })
            .collect();

        let old = &block.children;
        let prefix = old
            .iter()
            .zip(children.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let max_suffix = old.len().min(children.len()) - prefix;
        let suffix = old
            .iter()
            .rev()
            .zip(children.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();

        Ok(ChildrenSplice {
            index: prefix as u32,
            remove: (old.len() - prefix - suffix) as u32,
            insert: children[prefix..children.len() - suffix].to_vec(),
            detach,
            deleted,
        })
    }

    /// Run `f` against the block's entry inside one transaction.
    ///
    /// Writes made through the writer skip schema validation.
    pub fn update_block_with<R, F>(&mut self, id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut BlockWriter<'_, '_>) -> R,
    {
        self.ensure_writable()?;
        if !self.tree.contains(id) {
            return Err(StoreError::block_not_found(id));
        }

        let id_owned = id.to_string();
        self.transact(|txn, map| {
            let block = crdt::block_map(&*txn, map, &id_owned)
                .ok_or_else(|| StoreError::block_not_found(&id_owned))?;
            let mut writer = BlockWriter::new(txn, block, id_owned.clone());
            Ok(f(&mut writer))
        })
    }

    /// Relocate blocks under `new_parent`, before or after `sibling` when
    /// given, otherwise at the end.
    pub fn move_blocks(
        &mut self,
        ids: &[&str],
        new_parent: &str,
        sibling: Option<&str>,
        before: bool,
    ) -> Result<()> {
        self.ensure_writable()?;
        if ids.is_empty() {
            return Ok(());
        }

        let target = self
            .tree
            .get(new_parent)
            .ok_or_else(|| StoreError::block_not_found(new_parent))?;

        let mut seen: HashSet<&str> = HashSet::new();
        let mut groups: Vec<(String, Vec<(usize, String)>)> = Vec::new();
        for &id in ids {
            let block = self.tree.get(id).ok_or_else(|| StoreError::block_not_found(id))?;
            if !seen.insert(id) {
                return Err(StructuralError::DuplicateId(id.to_string()).into());
            }
            let (parent, index) = self
                .position_in_parent(id)
                .ok_or_else(|| StructuralError::MissingParent(id.to_string()))?;
            self.schema.validate_pair(&block.flavour, &target.flavour)?;
            if self.tree.is_in_subtree(id, new_parent) {
                return Err(StructuralError::Cycle(id.to_string()).into());
            }

            match groups.iter_mut().find(|(group_parent, _)| *group_parent == parent.id) {
                Some((_, members)) => members.push((index, id.to_string())),
                None => groups.push((parent.id.clone(), vec![(index, id.to_string())])),
            }
        }

        for (_, members) in groups.iter_mut() {
            members.sort_by_key(|(index, _)| *index);
            if members.windows(2).any(|pair| pair[1].0 != pair[0].0 + 1) {
                return Err(StructuralError::NotContiguous.into());
            }
        }

        if let Some(sibling) = sibling {
            if seen.contains(&sibling) {
                return Err(StructuralError::InvalidSibling(sibling.to_string()).into());
            }
            if !target.children.iter().any(|child| child == sibling) {
                return Err(StructuralError::SiblingNotFound(sibling.to_string()).into());
            }
        }

        let groups: Vec<(String, Vec<String>)> = groups
            .into_iter()
            .map(|(parent, members)| (parent, members.into_iter().map(|(_, id)| id).collect()))
            .collect();
        let moving: Vec<String> = groups.iter().flat_map(|(_, ids)| ids.iter().cloned()).collect();
        let new_parent_owned = new_parent.to_string();
        let sibling_owned = sibling.map(str::to_string);

        self.transact(|txn, map| {
            for (parent, members) in &groups {
                let current = crdt::children_of(&*txn, map, parent).unwrap_or_default();
                if let Some(start) = current.iter().position(|child| *child == members[0]) {
                    crdt::splice_children(txn, map, parent, start as u32, members.len() as u32, &[]);
                }
            }

            let current = crdt::children_of(&*txn, map, &new_parent_owned).unwrap_or_default();
            let at = sibling_owned
                .as_ref()
                .and_then(|sibling| current.iter().position(|child| child == sibling))
                .map(|index| if before { index } else { index + 1 })
                .unwrap_or(current.len());
            crdt::splice_children(txn, map, &new_parent_owned, at as u32, 0, &moving);
        });

        tracing::debug!("moved {:?} under {}", moving, new_parent);
        Ok(())
    }

    /// Remove a block; see [`DeleteOptions`] for what happens to its children
    pub fn delete_block(&mut self, id: &str, options: DeleteOptions) -> Result<()> {
        self.ensure_writable()?;
        if options.bring_children_to.is_some() && options.delete_children {
            tracing::error!("cannot bring children to another block and delete them at the same time");
            return Err(StructuralError::ConflictingDeleteOptions.into());
        }

        let block = self.tree.get(id).ok_or_else(|| StoreError::block_not_found(id))?;
        let children = block.children.clone();
        let parent = self.tree.find_parent(id).map(|parent| parent.id.clone());

        let removed = match &options.bring_children_to {
            Some(target) => {
                let target_block = self
                    .tree
                    .get(target)
                    .ok_or_else(|| StoreError::block_not_found(target))?;
                if self.tree.is_in_subtree(id, target) {
                    return Err(StructuralError::Cycle(target.clone()).into());
                }
                for child in children.iter().filter_map(|child| self.tree.get(child)) {
                    self.schema.validate_pair(&child.flavour, &target_block.flavour)?;
                }
                vec![id.to_string()]
            }
            None if options.delete_children => self.tree.subtree(id),
            None => {
                if !children.is_empty() {
                    return Err(StructuralError::UnresolvedChildren(id.to_string()).into());
                }
                vec![id.to_string()]
            }
        };

        let bring_to = options.bring_children_to;
        let tombstones = self.tombstones.clone();
        self.transact(|txn, map| {
            let mut relocated = false;
            if let Some(parent) = &parent {
                let current = crdt::children_of(&*txn, map, parent).unwrap_or_default();
                if let Some(index) = current.iter().position(|child| child == &removed[0]) {
                    if bring_to.as_ref() == Some(parent) {
                        crdt::splice_children(txn, map, parent, index as u32, 1, &children);
                        relocated = true;
                    } else {
                        crdt::splice_children(txn, map, parent, index as u32, 1, &[]);
                    }
                }
            }
            if let Some(target) = &bring_to {
                if !relocated {
                    let len = crdt::children_of(&*txn, map, target).map_or(0, |c| c.len());
                    crdt::splice_children(txn, map, target, len as u32, 0, &children);
                }
            }
            for id in &removed {
                crdt::remove_block(txn, map, id);
                crdt::mark_deleted(txn, &tombstones, id);
            }
        });

        tracing::debug!("deleted block {}", id);
        Ok(())
    }

    /// Execute a serialized command
    pub fn apply(&mut self, mutation: Mutation) -> Result<MutationResult> {
        tracing::debug!("applying {} to document {}", mutation.name(), self.id);
        match mutation {
            Mutation::AddBlock { block, parent, index } => {
                let id = self.add_block(block, parent.as_deref(), index)?;
                Ok(MutationResult::Added(vec![id]))
            }
            Mutation::AddBlocks { blocks, parent, index } => {
                let ids = self.add_blocks(blocks, parent.as_deref(), index)?;
                Ok(MutationResult::Added(ids))
            }
            Mutation::AddSiblingBlocks { target, blocks, place } => {
                let ids = self.add_sibling_blocks(&target, blocks, place)?;
                Ok(MutationResult::Added(ids))
            }
            Mutation::UpdateBlock { id, update } => {
                self.update_block(&id, update)?;
                Ok(MutationResult::Applied)
            }
            Mutation::MoveBlocks { ids, parent, sibling, before } => {
                let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
                self.move_blocks(&ids, &parent, sibling.as_deref(), before)?;
                Ok(MutationResult::Applied)
            }
            Mutation::DeleteBlock { id, options } => {
                self.delete_block(&id, options)?;
                Ok(MutationResult::Applied)
            }
            Mutation::Undo => Ok(history_result(self.undo())),
            Mutation::Redo => Ok(history_result(self.redo())),
            Mutation::CaptureSync => {
                self.capture_sync();
                Ok(MutationResult::Applied)
            }
        }
    }

    // =========================================================================
    // History
    // =========================================================================

    pub fn can_undo(&self) -> bool {
        !self.is_readonly() && self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        !self.is_readonly() && self.history.can_redo()
    }

    /// Revert the last undo step. Returns false when nothing was undone.
    pub fn undo(&mut self) -> bool {
        if self.is_readonly() {
            tracing::error!("cannot undo in read-only mode");
            return false;
        }
        if !self.is_ready() {
            return false;
        }
        let undone = self.history.undo();
        self.pump();
        self.slots.history_updated.emit(&());
        undone
    }

    pub fn redo(&mut self) -> bool {
        if self.is_readonly() {
            tracing::error!("cannot redo in read-only mode");
            return false;
        }
        if !self.is_ready() {
            return false;
        }
        let redone = self.history.redo();
        self.pump();
        self.slots.history_updated.emit(&());
        redone
    }

    /// Close the current undo step so the next mutation starts a new one
    pub fn capture_sync(&mut self) {
        self.history.capture();
    }

    /// Forget every undo and redo step
    pub fn reset_history(&mut self) {
        self.history.clear();
        self.slots.history_updated.emit(&());
    }

    // =========================================================================
    // Replication
    // =========================================================================

    /// Full state as a v1 update blob
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.ydoc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    pub fn encode_state_vector(&self) -> Vec<u8> {
        let txn = self.ydoc.transact();
        txn.state_vector().encode_v1()
    }

    /// Changes the holder of `state_vector` has not seen yet
    pub fn encode_diff(&self, state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(state_vector).map_err(|e| StoreError::Decode(e.to_string()))?;
        let txn = self.ydoc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Merge an update from another replica. Allowed in read-only mode.
    pub fn apply_update(&mut self, update: &[u8]) -> Result<()> {
        if self.state == DocState::Disposed {
            return Err(StoreError::Disposed);
        }
        let update = Update::decode_v1(update).map_err(|e| StoreError::Decode(e.to_string()))?;
        {
            let mut txn = self.ydoc.transact_mut_with(REMOTE_ORIGIN);
            txn.apply_update(update)
                .map_err(|e| StoreError::Apply(e.to_string()))?;
        }
        self.pump();
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Run `f` in one local transaction, then mirror the commit
    fn transact<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut TransactionMut<'_>, &MapRef) -> R,
    {
        self.history.before_transaction();
        let result = {
            let mut txn = self.ydoc.transact_mut_with(LOCAL_ORIGIN);
            f(&mut txn, &self.blocks)
        };
        self.pump();
        self.slots.history_updated.emit(&());
        result
    }

    /// Drain the observer channel into the block tree and notify
    fn pump(&mut self) {
        let changes: Vec<SubstrateChange> = self.changes.try_iter().collect();
        if changes.is_empty() || self.state != DocState::Ready {
            return;
        }
        for change in &changes {
            if let SubstrateChange::Added(id) = change {
                self.ids.reserve(id);
            }
        }
        let events = {
            let txn = self.ydoc.transact();
            self.tree.apply(&txn, &self.blocks, &changes)
        };
        self.emit(events);
    }

    fn emit(&mut self, events: Vec<TreeEvent>) {
        for event in events {
            match event {
                TreeEvent::RootAdded(block) => self.slots.root_added.emit(&block),
                TreeEvent::RootDeleted(id) => self.slots.root_deleted.emit(&id),
                TreeEvent::Block(event) => self.slots.block_updated.emit(&event),
            }
        }
    }
}

impl fmt::Debug for Doc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Doc")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("access", &self.access)
            .field("blocks", &self.tree.len())
            .finish_non_exhaustive()
    }
}

fn history_result(changed: bool) -> MutationResult {
    if changed {
        MutationResult::Applied
    } else {
        MutationResult::Skipped
    }
}

fn detach_child<T>(txn: &mut TransactionMut<'_>, blocks: &MapRef, parent: &str, child: &T)
where
    T: AsRef<str> + ?Sized,
{
    let child = child.as_ref();
    let Some(children) = crdt::children_of(&*txn, blocks, parent) else {
        return;
    };
    if let Some(index) = children.iter().position(|c| c == child) {
        crdt::splice_children(txn, blocks, parent, index as u32, 1, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id_generator::SequentialIdGenerator;
    use crate::props::PropValue;
    use crate::slots::BlockEvent;
    use std::sync::Mutex;

    fn test_doc() -> Doc {
        let config = StoreConfig {
            capture_timeout_ms: 0,
            ..StoreConfig::default()
        };
        let mut doc = Doc::new("test", YDoc::new(), Arc::new(Schema::default_schema()), config)
            .with_id_generator(Box::new(SequentialIdGenerator::from_seed("b")));
        doc.load().unwrap();
        doc
    }

    fn page_with_note(doc: &mut Doc) -> (String, String) {
        let page = doc.add_block(NewBlock::new("folio:page"), None, None).unwrap();
        let note = doc.add_block(NewBlock::new("folio:note"), Some(&page), None).unwrap();
        (page, note)
    }

    fn child_ids(doc: &Doc, id: &str) -> Vec<String> {
        doc.get_block(id).unwrap().children.clone()
    }

    #[test]
    fn test_mutations_require_load() {
        let mut doc = Doc::new("test", YDoc::new(), Arc::new(Schema::default_schema()), StoreConfig::default());
        assert_eq!(doc.state(), DocState::Unloaded);
        assert_eq!(
            doc.add_block(NewBlock::new("folio:page"), None, None),
            Err(StoreError::NotReady)
        );

        doc.load().unwrap();
        doc.load().unwrap();
        assert!(doc.is_ready());

        doc.dispose();
        assert_eq!(
            doc.add_block(NewBlock::new("folio:page"), None, None),
            Err(StoreError::Disposed)
        );
        assert_eq!(doc.load(), Err(StoreError::Disposed));
    }

    #[test]
    fn test_add_block_uses_generated_ids_and_defaults() {
        let mut doc = test_doc();
        let (page, note) = page_with_note(&mut doc);
        assert_eq!(page, "b-1");
        assert_eq!(note, "b-2");

        let p = doc
            .add_block(NewBlock::new("folio:paragraph"), Some(&note), None)
            .unwrap();
        let block = doc.get_block(&p).unwrap();
        assert_eq!(block.text("type"), Some("text"));
        assert_eq!(block.prop("text"), Some(&PropValue::text("")));
    }

    #[test]
    fn test_content_without_parent_goes_under_root() {
        let mut doc = test_doc();
        assert_eq!(
            doc.add_block(NewBlock::new("folio:note"), None, None),
            Err(ValidationError::MissingParent("folio:note".to_string()).into())
        );

        let page = doc.add_block(NewBlock::new("folio:page"), None, None).unwrap();
        let note = doc.add_block(NewBlock::new("folio:note"), None, None).unwrap();
        assert_eq!(doc.get_parent(&note).unwrap().id, page);
    }

    #[test]
    fn test_second_root_is_rejected() {
        let mut doc = test_doc();
        let page = doc.add_block(NewBlock::new("folio:page"), None, None).unwrap();
        assert_eq!(
            doc.add_block(NewBlock::new("folio:page"), None, None),
            Err(StructuralError::DuplicateRoot(page).into())
        );
        assert_eq!(doc.block_count(), 1);
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let mut doc = test_doc();
        doc.add_block(NewBlock::new("folio:page").with_id("root"), None, None)
            .unwrap();
        let result = doc.add_blocks(
            vec![
                NewBlock::new("folio:note").with_id("n"),
                NewBlock::new("folio:note").with_id("n"),
            ],
            Some("root"),
            None,
        );
        assert_eq!(result, Err(StructuralError::DuplicateId("n".to_string()).into()));
        assert!(!doc.has_block("n"));
    }

    #[test]
    fn test_siblings() {
        let mut doc = test_doc();
        let (_, note) = page_with_note(&mut doc);
        let ids = doc
            .add_blocks(
                vec![
                    NewBlock::new("folio:paragraph"),
                    NewBlock::new("folio:paragraph"),
                    NewBlock::new("folio:paragraph"),
                ],
                Some(&note),
                None,
            )
            .unwrap();

        assert!(doc.get_previous_sibling(&ids[0]).is_none());
        assert_eq!(doc.get_previous_sibling(&ids[1]).unwrap().id, ids[0]);
        assert_eq!(doc.get_next_sibling(&ids[1]).unwrap().id, ids[2]);
        assert_eq!(doc.get_previous_siblings(&ids[2]).len(), 2);
        assert_eq!(doc.get_next_siblings(&ids[0]).len(), 2);
        assert!(doc.get_next_siblings(&ids[2]).is_empty());
    }

    #[test]
    fn test_add_sibling_blocks() {
        let mut doc = test_doc();
        let (_, note) = page_with_note(&mut doc);
        let a = doc
            .add_block(NewBlock::new("folio:paragraph").with_id("a"), Some(&note), None)
            .unwrap();

        doc.add_sibling_blocks(&a, vec![NewBlock::new("folio:paragraph").with_id("before")], Place::Before)
            .unwrap();
        doc.add_sibling_blocks(&a, vec![NewBlock::new("folio:divider").with_id("after")], Place::After)
            .unwrap();

        assert_eq!(child_ids(&doc, &note), vec!["before", "a", "after"]);
    }

    #[test]
    fn test_update_block_children_splice() {
        let mut doc = test_doc();
        let (_, note) = page_with_note(&mut doc);
        for id in ["a", "b", "c"] {
            doc.add_block(NewBlock::new("folio:paragraph").with_id(id), Some(&note), None)
                .unwrap();
        }
        doc.add_block(NewBlock::new("folio:paragraph").with_id("a1"), Some("a"), None)
            .unwrap();
        doc.add_block(NewBlock::new("folio:paragraph").with_id("b1"), Some("b"), None)
            .unwrap();

        // b is dropped with its subtree, a1 is pulled up from a
        doc.update_block(&note, BlockUpdate::new().children(["a", "a1", "c"]))
            .unwrap();

        assert_eq!(child_ids(&doc, &note), vec!["a", "a1", "c"]);
        assert!(child_ids(&doc, "a").is_empty());
        assert!(!doc.has_block("b"));
        assert!(!doc.has_block("b1"));
    }

    #[test]
    fn test_update_block_rejects_cycle() {
        let mut doc = test_doc();
        let (_, note) = page_with_note(&mut doc);
        doc.add_block(NewBlock::new("folio:paragraph").with_id("a"), Some(&note), None)
            .unwrap();
        doc.add_block(NewBlock::new("folio:paragraph").with_id("a1"), Some("a"), None)
            .unwrap();

        assert_eq!(
            doc.update_block("a1", BlockUpdate::new().children(["a"])),
            Err(StructuralError::Cycle("a".to_string()).into())
        );
    }

    #[test]
    fn test_update_block_with_writer() {
        let mut doc = test_doc();
        let (_, note) = page_with_note(&mut doc);
        let p = doc
            .add_block(NewBlock::new("folio:paragraph").with_prop("text", PropValue::text("hello")), Some(&note), None)
            .unwrap();

        let len = doc
            .update_block_with(&p, |writer| {
                writer.insert_text("text", 5, " world");
                writer.set("type", "h1");
                writer.get("text").and_then(|v| v.as_str().map(str::len))
            })
            .unwrap();

        assert_eq!(len, Some(11));
        let block = doc.get_block(&p).unwrap();
        assert_eq!(block.text("text"), Some("hello world"));
        assert_eq!(block.text("type"), Some("h1"));
    }

    #[test]
    fn test_delete_requires_resolution_for_children() {
        let mut doc = test_doc();
        let (page, note) = page_with_note(&mut doc);
        assert_eq!(
            doc.delete_block(&note, DeleteOptions::leaf_only()),
            Ok(())
        );
        let note = doc.add_block(NewBlock::new("folio:note"), Some(&page), None).unwrap();
        doc.add_block(NewBlock::new("folio:paragraph"), Some(&note), None).unwrap();
        assert_eq!(
            doc.delete_block(&note, DeleteOptions::leaf_only()),
            Err(StructuralError::UnresolvedChildren(note.clone()).into())
        );
        assert_eq!(
            doc.delete_block(
                &note,
                DeleteOptions {
                    bring_children_to: Some(page.clone()),
                    delete_children: true,
                }
            ),
            Err(StructuralError::ConflictingDeleteOptions.into())
        );
        assert!(doc.has_block(&note));
    }

    #[test]
    fn test_delete_root_removes_everything() {
        let mut doc = test_doc();
        let (page, _) = page_with_note(&mut doc);

        let deleted = Arc::new(Mutex::new(Vec::new()));
        let seen = deleted.clone();
        doc.slots.root_deleted.subscribe(move |id| seen.lock().unwrap().push(id.clone()));

        doc.delete_block(&page, DeleteOptions::default()).unwrap();
        assert!(doc.is_empty());
        assert!(doc.root().is_none());
        assert_eq!(*deleted.lock().unwrap(), vec![page]);
    }

    #[test]
    fn test_block_updated_events() {
        let mut doc = test_doc();
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        doc.slots
            .block_updated
            .subscribe(move |event: &BlockEvent| seen.lock().unwrap().push(event.clone()));

        let (_, note) = page_with_note(&mut doc);
        doc.update_block(&note, BlockUpdate::new().set("background", "red"))
            .unwrap();

        let events = events.lock().unwrap();
        let kinds: Vec<(&str, &str)> = events
            .iter()
            .map(|event| {
                let kind = match event {
                    BlockEvent::Add { .. } => "add",
                    BlockEvent::Delete { .. } => "delete",
                    BlockEvent::Update { .. } => "update",
                };
                (kind, event.id())
            })
            .collect();
        assert!(kinds.contains(&("add", note.as_str())));
        assert!(events.iter().any(|event| matches!(
            event,
            BlockEvent::Update { id, props, children: false, .. }
                if id == &note && props == &vec!["background".to_string()]
        )));
    }

    #[test]
    fn test_readonly_blocks_mutation_and_history() {
        let mut doc = test_doc();
        let (page, _) = page_with_note(&mut doc);
        assert!(doc.can_undo());

        doc.set_readonly(true);
        assert_eq!(doc.access(), Access::ReadOnly);
        assert!(!doc.can_undo());
        assert!(!doc.undo());
        assert_eq!(
            doc.add_block(NewBlock::new("folio:note"), Some(&page), None),
            Err(StoreError::Readonly)
        );
        assert_eq!(doc.block_count(), 2);

        doc.set_readonly(false);
        assert!(doc.can_undo());
    }

    #[test]
    fn test_schema_lookups() {
        let doc = test_doc();
        assert!(doc.get_schema_by_flavour("folio:note").is_ok());
        assert_eq!(
            doc.get_schema_by_flavour("folio:image").unwrap_err(),
            StoreError::NotFound(NotFoundError::Flavour("folio:image".to_string()))
        );
        let props = doc.get_initial_props_by_flavour("folio:list").unwrap();
        assert_eq!(props.get("checked"), Some(&PropValue::Bool(false)));
    }
}
