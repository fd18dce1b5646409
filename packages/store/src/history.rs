//! # Undo/Redo History
//!
//! Thin controller over the substrate's undo manager.
//!
//! Only transactions carrying [`LOCAL_ORIGIN`] are recorded; remote updates
//! never enter the history. Consecutive local transactions committed within
//! the capture window are merged into one undo step. `capture()` closes the
//! current step early.

use std::fmt;
use std::time::{Duration, Instant};

use yrs::{Doc, MapRef, UndoManager};

use crate::crdt::LOCAL_ORIGIN;

/// Default capture window between local transactions
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_millis(500);

pub struct History {
    manager: UndoManager,
    capture_timeout: Duration,
    last_change: Option<Instant>,
}

impl History {
    pub fn new(doc: &Doc, blocks: &MapRef, capture_timeout: Duration) -> Self {
        let mut manager = UndoManager::new(doc, blocks);
        manager.include_origin(LOCAL_ORIGIN);
        Self {
            manager,
            capture_timeout,
            last_change: None,
        }
    }

    pub fn capture_timeout(&self) -> Duration {
        self.capture_timeout
    }

    /// Called right before a local transaction opens.
    ///
    /// Starts a new undo step unless the previous local change happened
    /// inside the capture window.
    pub fn before_transaction(&mut self) {
        let now = Instant::now();
        let merge = match self.last_change {
            Some(last) => now.duration_since(last) < self.capture_timeout,
            None => false,
        };
        if !merge {
            self.manager.reset();
        }
        self.last_change = Some(now);
    }

    /// Close the current undo step; the next change starts a new one
    pub fn capture(&mut self) {
        self.manager.reset();
        self.last_change = None;
    }

    pub fn can_undo(&self) -> bool {
        self.manager.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.manager.can_redo()
    }

    /// Revert the most recent step. Returns false when there was nothing to undo.
    pub fn undo(&mut self) -> bool {
        self.last_change = None;
        self.manager.undo_blocking()
    }

    pub fn redo(&mut self) -> bool {
        self.last_change = None;
        self.manager.redo_blocking()
    }

    /// Drop every recorded step
    pub fn clear(&mut self) {
        let _ = self.manager.clear();
        self.last_change = None;
    }
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("capture_timeout", &self.capture_timeout)
            .field("can_undo", &self.can_undo())
            .field("can_redo", &self.can_redo())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::{self, REMOTE_ORIGIN};
    use crate::props::Props;
    use yrs::Transact;

    fn local_insert(doc: &Doc, blocks: &MapRef, history: &mut History, id: &str) {
        history.before_transaction();
        let mut txn = doc.transact_mut_with(LOCAL_ORIGIN);
        crdt::insert_block(&mut txn, blocks, id, "folio:note", &Props::new(), &[]);
    }

    #[test]
    fn test_undo_redo_local_change() {
        let doc = Doc::new();
        let blocks = doc.get_or_insert_map("blocks");
        let mut history = History::new(&doc, &blocks, Duration::ZERO);

        assert!(!history.can_undo());
        local_insert(&doc, &blocks, &mut history, "a");
        assert!(history.can_undo());

        assert!(history.undo());
        assert!(crdt::block_ids(&doc.transact(), &blocks).is_empty());
        assert!(history.can_redo());

        assert!(history.redo());
        assert_eq!(crdt::block_ids(&doc.transact(), &blocks), vec!["a"]);
    }

    #[test]
    fn test_zero_timeout_separates_steps() {
        let doc = Doc::new();
        let blocks = doc.get_or_insert_map("blocks");
        let mut history = History::new(&doc, &blocks, Duration::ZERO);

        local_insert(&doc, &blocks, &mut history, "a");
        local_insert(&doc, &blocks, &mut history, "b");

        history.undo();
        assert_eq!(crdt::block_ids(&doc.transact(), &blocks), vec!["a"]);
    }

    #[test]
    fn test_changes_inside_window_merge() {
        let doc = Doc::new();
        let blocks = doc.get_or_insert_map("blocks");
        let mut history = History::new(&doc, &blocks, Duration::from_secs(60));

        local_insert(&doc, &blocks, &mut history, "a");
        local_insert(&doc, &blocks, &mut history, "b");

        history.undo();
        assert!(crdt::block_ids(&doc.transact(), &blocks).is_empty());
        assert!(!history.can_undo());
    }

    #[test]
    fn test_remote_changes_are_not_recorded() {
        let doc = Doc::new();
        let blocks = doc.get_or_insert_map("blocks");
        let history = History::new(&doc, &blocks, Duration::ZERO);
        {
            let mut txn = doc.transact_mut_with(REMOTE_ORIGIN);
            crdt::insert_block(&mut txn, &blocks, "a", "folio:note", &Props::new(), &[]);
        }
        assert!(!history.can_undo());
    }

    #[test]
    fn test_clear() {
        let doc = Doc::new();
        let blocks = doc.get_or_insert_map("blocks");
        let mut history = History::new(&doc, &blocks, Duration::ZERO);
        local_insert(&doc, &blocks, &mut history, "a");
        history.clear();
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }
}
