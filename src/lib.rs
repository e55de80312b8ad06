//! # libsyncr — RAGVideo library synchronization core
//!
//! Keeps a personal video-knowledge library's local ingestion outputs, a
//! MinIO-compatible object store of deterministic content bundles, and a
//! pair of Dify knowledge-base datasets (notes, transcripts) in agreement.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use libsyncr::reconcile::Reconciler;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let items = reconciler.scan(&profile, "default", "rv-default-abcd1234").await?;
//!     println!("{} items reconciled", items.len());
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod bundle;
pub mod config;
pub mod error;
pub mod identity;
pub mod local_store;
pub mod logging;
pub mod object_store;
pub mod profile;
pub mod rag_client;
pub mod reconcile;
pub mod sync_ops;
pub mod task_controller;
pub mod util;

// Re-export the types callers reach for most often.
pub use error::SyncError;
pub use identity::{compute_sync_id, make_source_key, parse_source_key};
pub use local_store::{LocalStore, NoteItem};
pub use object_store::{ObjectStore, S3ObjectStore};
pub use profile::{Profile, Registry};
pub use reconcile::{Reconciler, Status, SyncItem};
pub use sync_ops::SyncOperations;

// vim: ts=4
