//! # Notification Slots
//!
//! Fire-and-forget, synchronous notifications for renderers and other
//! observers. Each slot holds any number of listeners; emission calls them
//! in subscription order before returning.

use std::fmt;

use serde::Serialize;

use crate::block_tree::Block;

/// Handle returned by [`Slot::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

type Listener<T> = Box<dyn FnMut(&T) + Send>;

pub struct Slot<T> {
    next_id: u64,
    listeners: Vec<(SlotId, Listener<T>)>,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SlotId
    where
        F: FnMut(&T) + Send + 'static,
    {
        let id = SlotId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false when the listener was already gone
    pub fn unsubscribe(&mut self, id: SlotId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    pub fn emit(&mut self, value: &T) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(value);
        }
    }

    /// Drop every listener
    pub fn dispose(&mut self) {
        self.listeners.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Payload of the `block_updated` slot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlockEvent {
    Add {
        id: String,
        flavour: String,
    },
    Delete {
        id: String,
        flavour: String,
        /// Parent at the time of removal
        parent: Option<String>,
        /// The detached model
        model: Block,
    },
    Update {
        id: String,
        flavour: String,
        /// Names of the properties that changed
        props: Vec<String>,
        /// Whether the child order changed
        children: bool,
    },
}

impl BlockEvent {
    pub fn id(&self) -> &str {
        match self {
            BlockEvent::Add { id, .. } | BlockEvent::Delete { id, .. } | BlockEvent::Update { id, .. } => id,
        }
    }

    pub fn flavour(&self) -> &str {
        match self {
            BlockEvent::Add { flavour, .. }
            | BlockEvent::Delete { flavour, .. }
            | BlockEvent::Update { flavour, .. } => flavour,
        }
    }
}

/// Every notification a document emits
#[derive(Debug, Default)]
pub struct DocSlots {
    /// The block tree has been initialized by `load`
    pub ready: Slot<()>,
    pub history_updated: Slot<()>,
    /// The root block appeared, either through the API or the substrate.
    /// The rest of the tree may not be wired yet.
    pub root_added: Slot<Block>,
    pub root_deleted: Slot<String>,
    pub block_updated: Slot<BlockEvent>,
}

impl DocSlots {
    pub fn dispose(&mut self) {
        self.ready.dispose();
        self.history_updated.dispose();
        self.root_added.dispose();
        self.root_deleted.dispose();
        self.block_updated.dispose();
    }
}
