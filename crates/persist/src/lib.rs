//! Persistence collaborator: node payloads archived on unload and restored
//! on load.
//!
//! # Invariants
//! - A stored record is never replaced by one with a lower version.
//! - Restore never applies a record older than the node it targets.
//! - Every payload is verified against its SHA-256 before decoding.

mod archive;
mod processor;

pub use archive::{ARCHIVE_SCHEMA_VERSION, ArchiveError, ArchiveManifest, ArchiveRecord, NodeArchive};
pub use processor::{ArchiveLoadProcessor, ArchiveUnloadProcessor};
