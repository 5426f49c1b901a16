//! # Persistence
//!
//! The two physical backends behind a Loam entity store, specified as
//! traits plus ready-to-use implementations:
//!
//! - [`DocumentDatabase`] / [`DocumentCollection`]: a structured document
//!   backend with filtered find/insert/update/delete. Ships with an
//!   in-memory [`TransientDocumentDatabase`] and a disk-backed
//!   [`JsonFileDocumentDatabase`].
//! - [`VectorDatabase`] / [`VectorCollection`]: the same CRUD shape plus
//!   nearest-neighbor search. Ships with [`TransientVectorDatabase`],
//!   which embeds document content through a [`loam_embeddings::Embedder`].
//!
//! Collections are opened through `get_or_create_collection` with a
//! [`DocumentLoader`] that upgrades old-schema documents at load time.
//! Documents whose version cannot be mapped forward are quarantined into a
//! `{collection}_failed_migrations` sidecar collection instead of failing
//! the whole open.

pub mod document;
pub mod error;
pub mod filter;
pub mod json_file;
pub mod memory;
pub mod migration;
pub mod vector;
pub mod version;

pub use document::{
    DeleteResult, Document, DocumentCollection, DocumentDatabase, DocumentLoader, MetadataStore,
    identity_loader,
};
pub use error::{PersistenceError, Result};
pub use filter::Filter;
pub use json_file::JsonFileDocumentDatabase;
pub use memory::TransientDocumentDatabase;
pub use migration::{DocumentMigrationHelper, StoreMigrationHelper};
pub use vector::{SimilarDocument, TransientVectorDatabase, VectorCollection, VectorDatabase};
pub use version::SchemaVersion;

/// Name of the document field holding the schema version string.
pub const VERSION_FIELD: &str = "version";

/// Name of the vector-document field holding the embeddable text.
pub const CONTENT_FIELD: &str = "content";

/// Suffix of the sidecar collection receiving unmigratable documents.
pub const FAILED_MIGRATIONS_SUFFIX: &str = "_failed_migrations";
