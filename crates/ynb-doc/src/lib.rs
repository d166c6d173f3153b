//! ynb-doc - Collaborative notebook document model
//!
//! Notebooks, cells and plain files mapped onto replicated shared types,
//! with per-document undo history and change feeds for editors.
//!
//! # Quick Start
//!
//! ```rust
//! use ynb_doc::{CodeCell, NotebookModel, SharedCell};
//!
//! let notebook = NotebookModel::new();
//! notebook.insert_cell(0, CodeCell::create(None).unwrap()).unwrap();
//!
//! let cell = notebook.get_cell(0).unwrap();
//! cell.set_source("print(1)").unwrap();
//! cell.as_code().unwrap().set_execution_count(Some(1)).unwrap();
//!
//! assert_eq!(cell.to_json().unwrap()["source"], "print(1)");
//! assert!(notebook.can_undo());
//! ```
//!
//! # Architecture
//!
//! - [`doc`] - document replicas, transactions and observers
//! - [`shared`] - [`SharedText`], [`SharedArray`] and [`SharedMap`] handles
//! - [`undo`] - undo/redo over a scope of shared types
//! - [`container`] - a document plus its undo history and presence
//! - [`cell`] - code, markdown and raw cells
//! - [`notebook`] - the notebook model and its cell-list feed
//! - [`file`] - single-text documents
//! - [`awareness`] - peer presence with heartbeat and eviction
//! - [`update`] - replication messages between replicas
//! - [`mutex`] - re-entrancy guard for editor bindings

pub mod awareness;
pub mod cell;
pub mod config;
pub mod container;
pub mod doc;
pub mod error;
pub mod event;
pub mod file;
pub mod mutex;
pub mod nbformat;
pub mod notebook;
pub mod shared;
mod store;
pub mod transaction;
pub mod undo;
pub mod update;
pub mod value;

// Re-exports for convenience
pub use awareness::{
    Awareness, AwarenessChange, AwarenessEntry, AwarenessEvent, AwarenessOrigin, AwarenessUpdate,
    MetaClientState,
};
pub use cell::{
    create_cell_from_type, create_standalone_cell, new_cell_id, Cell, CellChange, CellModel, CellType,
    CodeCell, MarkdownCell, RawCell, SharedCell,
};
pub use config::{AwarenessConfig, AwarenessConfigBuilder, DocConfig, DocConfigBuilder};
pub use container::SharedContainer;
pub use doc::{Doc, Origin, Subscription};
pub use error::{DocError, Result};
pub use event::{BranchChange, BranchEvent, Delta, MapAction, MapChange, ValueChange};
pub use file::{FileChange, FileModel};
pub use mutex::{create_mutex, LocalMutex};
pub use notebook::{NotebookChange, NotebookModel};
pub use shared::{SharedArray, SharedMap, SharedText};
pub use transaction::{ReadTxn, Transaction, TransactionMut};
pub use undo::UndoManager;
pub use update::Update;
pub use value::{BranchId, BranchKind, Prelim, Value};

pub use ynb_core::ClientId;
