//! Disk-backed document database.
//!
//! Each collection lives in `<root>/<name>.json` as a JSON array of
//! documents; database metadata lives in `<root>/metadata.json`. Writes
//! go through a temp-file rename so a crash never leaves a half-written
//! file behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::FAILED_MIGRATIONS_SUFFIX;
use crate::document::{
    DeleteResult, Document, DocumentCollection, DocumentDatabase, DocumentLoader, MetadataStore,
};
use crate::error::Result;
use crate::filter::Filter;
use crate::migration::load_documents;

/// A document database persisting collections as JSON files.
pub struct JsonFileDocumentDatabase {
    root: PathBuf,
    collections: RwLock<HashMap<String, Arc<FileCollection>>>,
}

impl JsonFileDocumentDatabase {
    /// Open a database rooted at the given directory, creating it if
    /// needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        Ok(Self {
            root,
            collections: RwLock::new(HashMap::new()),
        })
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    fn metadata_path(&self) -> PathBuf {
        self.root.join("metadata.json")
    }

    async fn read_metadata_map(&self) -> Result<HashMap<String, String>> {
        let path = self.metadata_path();
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn open_collection(&self, name: &str, loader: &DocumentLoader) -> Result<OpenedFiles> {
        let path = self.collection_path(name);
        let raw: Vec<Document> = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            serde_json::from_str(&content)?
        } else {
            Vec::new()
        };

        let (loaded, failed) = load_documents(name, raw, loader);
        debug!("Opened collection {name} with {} documents", loaded.len());
        Ok(OpenedFiles { loaded, failed })
    }
}

struct OpenedFiles {
    loaded: Vec<Document>,
    failed: Vec<Document>,
}

#[async_trait]
impl MetadataStore for JsonFileDocumentDatabase {
    async fn read_metadata(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_metadata_map().await?.get(key).cloned())
    }

    async fn upsert_metadata(&self, key: &str, value: &str) -> Result<()> {
        let mut metadata = self.read_metadata_map().await?;
        metadata.insert(key.to_string(), value.to_string());
        write_atomic(&self.metadata_path(), &serde_json::to_string_pretty(&metadata)?).await
    }
}

#[async_trait]
impl DocumentDatabase for JsonFileDocumentDatabase {
    async fn get_or_create_collection(
        &self,
        name: &str,
        loader: DocumentLoader,
    ) -> Result<Arc<dyn DocumentCollection>> {
        let mut collections = self.collections.write().await;

        if let Some(collection) = collections.get(name) {
            return Ok(collection.clone());
        }

        let opened = self.open_collection(name, &loader).await?;

        if !opened.failed.is_empty() {
            let sidecar_name = format!("{name}{FAILED_MIGRATIONS_SUFFIX}");
            let sidecar = match collections.get(&sidecar_name) {
                Some(existing) => existing.clone(),
                None => {
                    let existing = self
                        .open_collection(&sidecar_name, &crate::document::identity_loader())
                        .await?;
                    let sidecar = Arc::new(FileCollection::new(
                        self.collection_path(&sidecar_name),
                        existing.loaded,
                    ));
                    collections.insert(sidecar_name.clone(), sidecar.clone());
                    sidecar
                }
            };
            let failed_count = opened.failed.len();
            sidecar.extend(opened.failed).await?;
            info!("Quarantined {failed_count} documents into {sidecar_name}");
        }

        let collection = Arc::new(FileCollection::new(self.collection_path(name), opened.loaded));
        // Write migrated documents back in place so the next open starts
        // at the current version.
        collection.save().await?;

        collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }
}

/// A single file-backed collection.
struct FileCollection {
    path: PathBuf,
    documents: RwLock<Vec<Document>>,
}

impl FileCollection {
    fn new(path: PathBuf, documents: Vec<Document>) -> Self {
        Self {
            path,
            documents: RwLock::new(documents),
        }
    }

    async fn save(&self) -> Result<()> {
        let documents = self.documents.read().await;
        write_atomic(&self.path, &serde_json::to_string_pretty(&*documents)?).await
    }

    async fn extend(&self, documents: Vec<Document>) -> Result<()> {
        self.documents.write().await.extend(documents);
        self.save().await
    }
}

/// Write content atomically using a temp file.
async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, content).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

#[async_trait]
impl DocumentCollection for FileCollection {
    async fn insert_one(&self, document: Document) -> Result<()> {
        self.documents.write().await.push(document);
        self.save().await
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
        let updated = {
            let mut documents = self.documents.write().await;

            let Some(document) = documents.iter_mut().find(|d| filter.matches(d)) else {
                return Ok(None);
            };

            for (key, value) in patch {
                document.insert(key, value);
            }
            document.clone()
        };

        self.save().await?;
        Ok(Some(updated))
    }

    async fn delete_one(&self, filter: &Filter) -> Result<DeleteResult> {
        let deleted = {
            let mut documents = self.documents.write().await;
            match documents.iter().position(|d| filter.matches(d)) {
                Some(index) => Some(documents.remove(index)),
                None => None,
            }
        };

        match deleted {
            Some(document) => {
                self.save().await?;
                Ok(DeleteResult {
                    deleted_count: 1,
                    document: Some(document),
                })
            }
            None => Ok(DeleteResult::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::identity_loader;
    use crate::migration::DocumentMigrationHelper;
    use crate::version::SchemaVersion;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_documents_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let db = JsonFileDocumentDatabase::new(temp_dir.path()).await.unwrap();
            let collection = db
                .get_or_create_collection("items", identity_loader())
                .await
                .unwrap();
            collection
                .insert_one(doc(json!({"id": "a", "n": 1})))
                .await
                .unwrap();
        }

        let db = JsonFileDocumentDatabase::new(temp_dir.path()).await.unwrap();
        let collection = db
            .get_or_create_collection("items", identity_loader())
            .await
            .unwrap();
        let found = collection.find_one(&Filter::eq("id", "a")).await.unwrap();
        assert_eq!(found.unwrap().get("n"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_metadata_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let db = JsonFileDocumentDatabase::new(temp_dir.path()).await.unwrap();
            db.upsert_metadata("entities_version", "0.2.0").await.unwrap();
        }

        let db = JsonFileDocumentDatabase::new(temp_dir.path()).await.unwrap();
        assert_eq!(
            db.read_metadata("entities_version").await.unwrap(),
            Some("0.2.0".to_string())
        );
    }

    #[tokio::test]
    async fn test_migrated_documents_are_written_back() {
        let temp_dir = TempDir::new().unwrap();

        {
            let db = JsonFileDocumentDatabase::new(temp_dir.path()).await.unwrap();
            let collection = db
                .get_or_create_collection("items", identity_loader())
                .await
                .unwrap();
            collection
                .insert_one(doc(json!({"id": "a", "version": "0.1.0"})))
                .await
                .unwrap();
        }

        let loader = DocumentMigrationHelper::new(SchemaVersion::new(0, 2, 0))
            .with_converter(SchemaVersion::new(0, 1, 0), |mut d| {
                d.insert("version".into(), json!("0.2.0"));
                Ok(Some(d))
            })
            .into_loader();

        {
            let db = JsonFileDocumentDatabase::new(temp_dir.path()).await.unwrap();
            db.get_or_create_collection("items", loader).await.unwrap();
        }

        // The upgraded document is now on disk at the current version.
        let db = JsonFileDocumentDatabase::new(temp_dir.path()).await.unwrap();
        let collection = db
            .get_or_create_collection("items", identity_loader())
            .await
            .unwrap();
        let found = collection.find_one(&Filter::eq("id", "a")).await.unwrap();
        assert_eq!(found.unwrap().get("version"), Some(&json!("0.2.0")));
    }

    #[tokio::test]
    async fn test_unmigratable_documents_quarantined_on_disk() {
        let temp_dir = TempDir::new().unwrap();

        {
            let db = JsonFileDocumentDatabase::new(temp_dir.path()).await.unwrap();
            let collection = db
                .get_or_create_collection("items", identity_loader())
                .await
                .unwrap();
            collection
                .insert_one(doc(json!({"id": "bad", "version": "0.0.1"})))
                .await
                .unwrap();
        }

        let loader = DocumentMigrationHelper::new(SchemaVersion::new(0, 2, 0)).into_loader();
        let db = JsonFileDocumentDatabase::new(temp_dir.path()).await.unwrap();
        let collection = db.get_or_create_collection("items", loader).await.unwrap();
        assert!(collection.find(&Filter::All).await.unwrap().is_empty());

        let sidecar = db
            .get_or_create_collection("items_failed_migrations", identity_loader())
            .await
            .unwrap();
        let quarantined = sidecar.find(&Filter::All).await.unwrap();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].get("id"), Some(&json!("bad")));
    }
}
