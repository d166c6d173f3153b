//! # ynb-core
//!
//! Replicated primitives underneath the ynotebook document model.
//!
//! - [`id`] - item identifiers and the Lamport clock that orders them
//! - [`rga`] - Replicated Growable Array, an ordered sequence CRDT
//! - [`lww`] - last-writer-wins map keyed by string
//!
//! These types know nothing about notebooks or transactions; `ynb-doc`
//! composes them into shared documents.

pub mod id;
pub mod lww;
pub mod rga;

pub use id::{ClientId, ItemId, LamportClock};
pub use lww::{LwwEntry, LwwMap, SetOutcome};
pub use rga::{Integrate, Rga, RgaNode};
