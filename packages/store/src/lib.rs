//! # Folio Store
//!
//! Block-tree document store on top of a replicated map.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Doc: mutation + query API                   │
//! │  - validate against the Schema              │
//! │  - one local transaction per call           │
//! │  - emit slots after the tree catches up     │
//! └─────────────────────────────────────────────┘
//!            ↓ writes                ↑ events
//! ┌─────────────────────────────────────────────┐
//! │ yrs: flat Y.Map of block entries            │
//! │  - source of truth, shared with replicas    │
//! │  - deep observer → SubstrateChange channel  │
//! │  - UndoManager behind History               │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ BlockTree: in-memory mirror + id index      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **The map is the source of truth**: the tree is rebuilt from it
//! 2. **One observation path**: local, undo and remote changes all reach
//!    the tree through the same channel
//! 3. **Validate first**: a rejected call never writes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use folio_store::{Doc, NewBlock, Schema, StoreConfig};
//!
//! let mut doc = Doc::new("page-1", yrs::Doc::new(), Arc::new(Schema::default_schema()), StoreConfig::default());
//! doc.load()?;
//!
//! let page = doc.add_block(NewBlock::new("folio:page"), None, None)?;
//! let note = doc.add_block(NewBlock::new("folio:note"), Some(&page), None)?;
//! doc.add_block(NewBlock::new("folio:paragraph").with_prop("text", "hi"), Some(&note), None)?;
//!
//! doc.undo();
//!
//! // Ship the state to another replica
//! let update = doc.encode_state();
//! ```

mod block_tree;
mod config;
mod crdt;
mod document;
mod errors;
mod history;
mod id_generator;
mod mutations;
mod props;
mod schema;
mod slots;

pub use block_tree::{Block, BlockTree, TreeEvent};
pub use config::{ConfigError, FlavourConfig, FolioConfig, SchemaConfig, StoreConfig, DEFAULT_CONFIG_NAME};
pub use crdt::{BlockWriter, SubstrateChange, LOCAL_ORIGIN, REMOTE_ORIGIN};
pub use document::{Access, Doc, DocState};
pub use errors::{NotFoundError, StoreError, StructuralError, ValidationError};
pub use history::{History, DEFAULT_CAPTURE_TIMEOUT};
pub use id_generator::{get_document_seed, IdGenerator, IdGeneratorKind, SequentialIdGenerator, UuidGenerator};
pub use mutations::{BlockUpdate, DeleteOptions, Mutation, MutationResult, NewBlock, Place};
pub use props::{PropValue, Props, TEXT_MARKER};
pub use schema::{BlockRole, FlavourSchema, PropsFactory, Schema};
pub use slots::{BlockEvent, DocSlots, Slot, SlotId};

pub type Result<T> = std::result::Result<T, StoreError>;
