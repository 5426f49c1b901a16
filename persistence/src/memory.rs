//! In-memory document backend.
//!
//! `TransientDocumentDatabase` keeps everything in process memory. It can
//! be seeded with raw documents before a collection is first opened, which
//! makes it behave like a database persisted by an earlier run; seeded
//! documents go through the collection loader exactly like disk-loaded
//! ones.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::FAILED_MIGRATIONS_SUFFIX;
use crate::document::{
    DeleteResult, Document, DocumentCollection, DocumentDatabase, DocumentLoader, MetadataStore,
};
use crate::error::Result;
use crate::filter::Filter;
use crate::migration::load_documents;

/// An in-memory document database.
#[derive(Default)]
pub struct TransientDocumentDatabase {
    collections: RwLock<HashMap<String, Arc<MemoryCollection>>>,
    seeds: Mutex<HashMap<String, Vec<Document>>>,
    metadata: RwLock<HashMap<String, String>>,
}

impl TransientDocumentDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage raw documents for a collection that has not been opened yet.
    ///
    /// The documents are run through the collection's loader on first
    /// `get_or_create_collection`, as if they had been persisted by an
    /// earlier run of the store.
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
impl MetadataStore for TransientDocumentDatabase {
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
impl DocumentDatabase for TransientDocumentDatabase {
    async fn get_or_create_collection(
        &self,
        name: &str,
        loader: DocumentLoader,
    ) -> Result<Arc<dyn DocumentCollection>> {
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
                .or_insert_with(|| Arc::new(MemoryCollection::default()))
                .clone();
            let failed_count = failed.len();
            sidecar.extend(failed).await;
            info!("Quarantined {failed_count} documents into {sidecar_name}");
        }

        debug!("Opened collection {name} with {} documents", loaded.len());

        let collection = Arc::new(MemoryCollection::with_documents(loaded));
        collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }
}

/// A single in-memory collection.
#[derive(Default)]
struct MemoryCollection {
    documents: RwLock<Vec<Document>>,
}

impl MemoryCollection {
    fn with_documents(documents: Vec<Document>) -> Self {
        Self {
            documents: RwLock::new(documents),
        }
    }

    async fn extend(&self, documents: Vec<Document>) {
        self.documents.write().await.extend(documents);
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    async fn insert_one(&self, document: Document) -> Result<()> {
        self.documents.write().await.push(document);
        Ok(())
    }

    async fn find(&self, filter: &Filter) -> Result<Vec<Document>> {
        Ok(self
            .documents
            .read()
            .await
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }

    async fn find_one(&self, filter: &Filter) -> Result<Option<Document>> {
        Ok(self
            .documents
            .read()
            .await
            .iter()
            .find(|d| filter.matches(d))
            .cloned())
    }

    async fn update_one(&self, filter: &Filter, patch: Document) -> Result<Option<Document>> {
        let mut documents = self.documents.write().await;

        let Some(document) = documents.iter_mut().find(|d| filter.matches(d)) else {
            return Ok(None);
        };

        for (key, value) in patch {
            document.insert(key, value);
        }

        Ok(Some(document.clone()))
    }

    async fn delete_one(&self, filter: &Filter) -> Result<DeleteResult> {
        let mut documents = self.documents.write().await;

        match documents.iter().position(|d| filter.matches(d)) {
            Some(index) => {
                let document = documents.remove(index);
                Ok(DeleteResult {
                    deleted_count: 1,
                    document: Some(document),
                })
            }
            None => Ok(DeleteResult::default()),
        }
    }
}
