//! Vector backend traits and the embedder-backed in-memory implementation.
//!
//! A vector collection has the same CRUD shape as a document collection
//! plus [`VectorCollection::find_similar_documents`]. Each stored document
//! carries a `content` field; the collection embeds it on insert and
//! answers nearest-neighbor queries by cosine distance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ordered_float::OrderedFloat;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use loam_embeddings::{Embedder, Embedding, cosine_distance};

use crate::document::{DeleteResult, Document, DocumentLoader, MetadataStore};
use crate::error::{PersistenceError, Result};
use crate::filter::Filter;
use crate::migration::load_documents;
use crate::{CONTENT_FIELD, FAILED_MIGRATIONS_SUFFIX};

/// A nearest-neighbor hit: a stored document and its distance from the
/// query. Smaller distance means a better match.
#[derive(Debug, Clone)]
pub struct SimilarDocument {
    /// The matched document.
    pub document: Document,

    /// Cosine distance from the query.
    pub distance: f32,
}

/// A collection of embedded documents.
#[async_trait]
pub trait VectorCollection: Send + Sync {
    /// Insert a document, embedding its `content` field.
    async fn insert_one(&self, document: Document) -> Result<()>;

    /// Find all documents matching the filter.
    async fn find(&self, filter: &Filter) -> Result<Vec<Document>>;

    /// Find the first document matching the filter.
    async fn find_one(&self, filter: &Filter) -> Result<Option<Document>>;

    /// Delete the first document matching the filter.
    async fn delete_one(&self, filter: &Filter) -> Result<DeleteResult>;

    /// Return up to `k` documents matching the filter, ordered by
    /// ascending distance from the embedded query text.
    async fn find_similar_documents(
        &self,
        filter: &Filter,
        query: &str,
        k: usize,
    ) -> Result<Vec<SimilarDocument>>;
}

/// A vector document backend.
#[async_trait]
pub trait VectorDatabase: MetadataStore {
    /// Get or create a named collection.
    ///
    /// Persisted documents pass through the loader first; rejected ones
    /// are quarantined in the `{name}_failed_migrations` sidecar.
    async fn get_or_create_collection(
        &self,
        name: &str,
        loader: DocumentLoader,
    ) -> Result<Arc<dyn VectorCollection>>;
}

/// An in-memory vector database backed by an [`Embedder`].
pub struct TransientVectorDatabase {
    embedder: Arc<dyn Embedder>,
    collections: RwLock<HashMap<String, Arc<VectorMemoryCollection>>>,
    seeds: Mutex<HashMap<String, Vec<Document>>>,
    metadata: RwLock<HashMap<String, String>>,
}

impl TransientVectorDatabase {
    /// Create an empty database using the given embedder.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            collections: RwLock::new(HashMap::new()),
            seeds: Mutex::new(HashMap::new()),
            metadata: RwLock::new(HashMap::new()),
        }
    }

    /// Stage raw documents for a collection that has not been opened yet.
    pub async fn seed(&self, name: &str, documents: Vec<Document>) {
        self.seeds
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .extend(documents);
    }

    /// Stage a metadata value, as if written by an earlier run.
    pub async fn seed_metadata(&self, key: &str, value: &str) {
        self.metadata
            .write()
            .await
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl MetadataStore for TransientVectorDatabase {
    async fn read_metadata(&self, key: &str) -> Result<Option<String>> {
        Ok(self.metadata.read().await.get(key).cloned())
    }

    async fn upsert_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.metadata
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[async_trait]
impl VectorDatabase for TransientVectorDatabase {
    async fn get_or_create_collection(
        &self,
        name: &str,
        loader: DocumentLoader,
    ) -> Result<Arc<dyn VectorCollection>> {
        let mut collections = self.collections.write().await;

        if let Some(collection) = collections.get(name) {
            return Ok(collection.clone());
        }

        let raw = self.seeds.lock().await.remove(name).unwrap_or_default();
        let (loaded, failed) = load_documents(name, raw, &loader);

        if !failed.is_empty() {
            let sidecar_name = format!("{name}{FAILED_MIGRATIONS_SUFFIX}");
            let sidecar = collections
                .entry(sidecar_name.clone())
                .or_insert_with(|| {
                    Arc::new(VectorMemoryCollection::new(self.embedder.clone()))
                })
                .clone();
            let failed_count = failed.len();
            sidecar.extend_unembedded(failed).await;
            info!("Quarantined {failed_count} documents into {sidecar_name}");
        }

        let collection = Arc::new(VectorMemoryCollection::new(self.embedder.clone()));
        for document in loaded {
            collection.insert_one(document).await?;
        }

        collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }
}

struct Entry {
    document: Document,
    // None for quarantined documents, which are kept findable but never
    // participate in similarity search.
    embedding: Option<Embedding>,
}

/// A single in-memory vector collection.
struct VectorMemoryCollection {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<Entry>>,
}

impl VectorMemoryCollection {
    fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    async fn extend_unembedded(&self, documents: Vec<Document>) {
        let mut entries = self.entries.write().await;
        entries.extend(documents.into_iter().map(|document| Entry {
            document,
            embedding: None,
        }));
    }
}

#[async_trait]
impl VectorCollection for VectorMemoryCollection {
    async fn insert_one(&self, document: Document) -> Result<()> {
        let content = document
            .get(CONTENT_FIELD)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                PersistenceError::InvalidDocument(format!("missing {CONTENT_FIELD} field"))
            })?;

        let embedding = self.embedder.embed(content).await?;
        debug!("Embedded vector document ({} dimensions)", embedding.len());

        self.entries.write().await.push(Entry {
            document,
            embedding: Some(embedding),
        });
        Ok(())
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| filter.matches(&e.document))
            .map(|e| e.document.clone())
            .collect())
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<Document>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .find(|e| filter.matches(&e.document))
            .map(|e| e.document.clone()))
    }

    async fn delete_one(&self, filter: &Filter) -> Result<DeleteResult> {
        let mut entries = self.entries.write().await;

        match entries.iter().position(|e| filter.matches(&e.document)) {
            Some(index) => {
                let entry = entries.remove(index);
                Ok(DeleteResult {
                    deleted_count: 1,
                    document: Some(entry.document),
                })
            }
            None => Ok(DeleteResult::default()),
        }
    }

    async fn find_similar_documents(
        &self,
        filter: &Filter,
        query: &str,
        k: usize,
    ) -> Result<Vec<SimilarDocument>> {
        let query_embedding = self.embedder.embed(query).await?;

        let entries = self.entries.read().await;
        let mut hits = Vec::new();

        for entry in entries.iter() {
            if !filter.matches(&entry.document) {
                continue;
            }
            let Some(embedding) = &entry.embedding else {
                continue;
            };

            let distance = cosine_distance(&query_embedding, embedding)?;
            hits.push(SimilarDocument {
                document: entry.document.clone(),
                distance,
            });
        }

        hits.sort_by_key(|h| OrderedFloat(h.distance));
        hits.truncate(k);
        Ok(hits)
    }
}
