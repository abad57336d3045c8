//! # tandem-ot: transform engine for collaborative plain-text editing
//!
//! Keeps the authoritative state of every document and makes concurrent,
//! causally-unordered edits converge by transforming each stale
//! submission against the revisions it did not see.
//!
//! ## Architecture
//!
//! ```text
//!  Submission { ops, base_version }
//!        │
//!        ▼
//! ┌─────────────┐   lookup    ┌──────────────────────────┐
//! │   Engine    │ ──────────► │ Document (per-doc mutex) │
//! │ (registry)  │             │  content / version       │
//! └─────────────┘             │  history[base..version)  │
//!                             └────────────┬─────────────┘
//!                                          │ fold transform() in commit order
//!                                          ▼
//!                                apply_operations() → Revision
//! ```
//!
//! ## Modules
//!
//! - [`operation`]: Insert / Delete / Retain and batch application
//! - [`transform`]: pairwise and batch transformation
//! - [`document`]: document state, revisions, bounded history
//! - [`engine`]: registry of documents keyed by resource id

pub mod operation;
pub mod transform;
pub mod document;
pub mod engine;
pub mod error;

pub use operation::{apply_operations, char_len, compose, normalize, Operation};
pub use transform::{transform, transform_pair};
pub use document::{AuthorId, Document, ResourceId, Revision, Snapshot, Submission};
pub use engine::{Applied, Engine, EngineConfig, SharedDocument};
pub use error::OtError;
