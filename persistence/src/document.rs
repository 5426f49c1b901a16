//! Document backend traits.
//!
//! Documents cross the backend boundary as flat JSON objects; the store
//! layer owns the typed view and (de)serializes through `serde_json`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::Filter;

/// A stored document: a flat JSON object.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Upgrades a raw document to the current schema at load time.
///
/// Returns `Ok(Some(doc))` with the document at the current version,
/// `Ok(None)` when the document should be dropped, or an error when no
/// upgrade path exists. Failing documents are quarantined into the
/// collection's failed-migrations sidecar, never surfaced as an open
/// failure.
pub type DocumentLoader = Arc<dyn Fn(Document) -> Result<Option<Document>> + Send + Sync>;

/// A loader that accepts every document unchanged.
pub fn identity_loader() -> DocumentLoader {
    Arc::new(|document| Ok(Some(document)))
}

/// Result of a delete operation.
#[derive(Debug, Clone, Default)]
pub struct DeleteResult {
    /// Number of documents deleted (0 or 1 for `delete_one`).
    pub deleted_count: usize,

    /// The deleted document, when one matched.
    pub document: Option<Document>,
}

/// Per-database metadata records.
///
/// One record per store, keyed by store name, holding the schema version
/// most recently written. Read at open time to drive migration.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Read a metadata value.
    async fn read_metadata(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite a metadata value.
    async fn upsert_metadata(&self, key: &str, value: &str) -> Result<()>;
}

/// A collection of structured documents.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// Insert a document.
    async fn insert_one(&self, document: Document) -> Result<()>;

    /// Find all documents matching the filter.
    async fn find(&self, filter: &Filter) -> Result<Vec<Document>>;

    /// Find the first document matching the filter.
    async fn find_one(&self, filter: &Filter) -> Result<Option<Document>>;

    /// Merge `patch` fields over the first document matching the filter.
    ///
    /// Returns the updated document, or `None` when nothing matched.
    async fn update_one(&self, filter: &Filter, patch: Document) -> Result<Option<Document>>;

    /// Delete the first document matching the filter.
    async fn delete_one(&self, filter: &Filter) -> Result<DeleteResult>;
}

/// A structured document backend.
#[async_trait]
pub trait DocumentDatabase: MetadataStore {
    /// Get or create a named collection.
    ///
    /// On first access, any persisted documents are passed through the
    /// loader; documents it rejects land in the
    /// `{name}_failed_migrations` sidecar collection.
    async fn get_or_create_collection(
        &self,
        name: &str,
        loader: DocumentLoader,
    ) -> Result<Arc<dyn DocumentCollection>>;
}
