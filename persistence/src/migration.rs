//! Schema-version migration.
//!
//! Two helpers cooperate at store-open time:
//!
//! - [`StoreMigrationHelper`] checks the database's persisted metadata
//!   version against the version the running store writes, and decides
//!   whether the open may proceed.
//! - [`DocumentMigrationHelper`] upgrades individual documents through a
//!   `version -> converter` table until they reach the current version.
//!
//! Structured and vector collections run these independently; a store can
//! reshape one schema without touching the other.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::VERSION_FIELD;
use crate::document::{Document, DocumentLoader, MetadataStore};
use crate::error::{PersistenceError, Result};
use crate::version::SchemaVersion;

/// A single-step document converter.
///
/// Takes a document at one schema version and returns it one version
/// newer, or `None` as the "drop this document" sentinel.
pub type Converter = Box<dyn Fn(Document) -> Result<Option<Document>> + Send + Sync>;

/// Upgrades documents along a linear version chain.
pub struct DocumentMigrationHelper {
    target: SchemaVersion,
    converters: BTreeMap<SchemaVersion, Converter>,
}

impl DocumentMigrationHelper {
    /// Create a helper targeting the given current version.
    pub fn new(target: SchemaVersion) -> Self {
        Self {
            target,
            converters: BTreeMap::new(),
        }
    }

    /// Register the converter for documents at `version`.
    pub fn with_converter<F>(mut self, version: SchemaVersion, converter: F) -> Self
    where
        F: Fn(Document) -> Result<Option<Document>> + Send + Sync + 'static,
    {
        self.converters.insert(version, Box::new(converter));
        self
    }

    /// Upgrade a document until it reaches the target version.
    ///
    /// Returns `Ok(None)` when a converter dropped the document, and
    /// `UnmigratableDocument` when a version has no registered converter.
    pub fn migrate(&self, mut document: Document) -> Result<Option<Document>> {
        loop {
            let version = document_version(&document)?;
            if version == self.target {
                return Ok(Some(document));
            }

            let converter = self.converters.get(&version).ok_or_else(|| {
                PersistenceError::UnmigratableDocument {
                    version: version.to_string(),
                }
            })?;

            debug!("Migrating document from version {version}");
            match converter(document)? {
                Some(converted) => {
                    // A converter that leaves the version in place would
                    // loop forever; fail loudly instead.
                    if document_version(&converted)? == version {
                        return Err(PersistenceError::InvalidDocument(format!(
                            "converter for version {version} did not advance the document"
                        )));
                    }
                    document = converted;
                }
                None => return Ok(None),
            }
        }
    }

    /// Turn this helper into a collection loader.
    pub fn into_loader(self) -> DocumentLoader {
        Arc::new(move |document| self.migrate(document))
    }
}

/// Read and parse a document's schema version field.
pub fn document_version(document: &Document) -> Result<SchemaVersion> {
    document
        .get(VERSION_FIELD)
        .and_then(|v| v.as_str())
        .ok_or_else(|| PersistenceError::InvalidDocument("missing version field".to_string()))?
        .parse()
}

/// Open-time version gate for one store over one database.
pub struct StoreMigrationHelper {
    store_name: String,
    runtime_version: SchemaVersion,
    allow_migration: bool,
}

impl StoreMigrationHelper {
    /// Create a helper for the named store.
    pub fn new(
        store_name: impl Into<String>,
        runtime_version: SchemaVersion,
        allow_migration: bool,
    ) -> Self {
        Self {
            store_name: store_name.into(),
            runtime_version,
            allow_migration,
        }
    }

    fn version_key(&self) -> String {
        format!("{}_version", self.store_name)
    }

    /// Check whether the open may proceed.
    ///
    /// A fresh database (no metadata record) is stamped with the runtime
    /// version and needs no migration. A persisted version newer than the
    /// runtime fails with `StoreOutdated`; an older one fails with
    /// `MigrationRequired` unless migration was allowed.
    pub async fn check(&self, database: &dyn MetadataStore) -> Result<()> {
        let key = self.version_key();

        let Some(stored) = database.read_metadata(&key).await? else {
            database
                .upsert_metadata(&key, &self.runtime_version.to_string())
                .await?;
            return Ok(());
        };

        let stored_version: SchemaVersion = stored.parse()?;

        if stored_version > self.runtime_version {
            return Err(PersistenceError::StoreOutdated {
                store: self.store_name.clone(),
                stored: stored_version.to_string(),
                runtime: self.runtime_version.to_string(),
            });
        }

        if stored_version != self.runtime_version {
            if !self.allow_migration {
                return Err(PersistenceError::MigrationRequired {
                    store: self.store_name.clone(),
                });
            }
            info!(
                "Migrating {} from version {stored_version} to {}",
                self.store_name, self.runtime_version
            );
        }

        Ok(())
    }

    /// Record the runtime version after a successful open.
    pub async fn commit(&self, database: &dyn MetadataStore) -> Result<()> {
        database
            .upsert_metadata(&self.version_key(), &self.runtime_version.to_string())
            .await
    }
}

/// Run persisted documents through a loader, splitting out failures.
///
/// Returns the documents the loader accepted and the raw documents to
/// quarantine in the failed-migrations sidecar. Used by database
/// implementations inside `get_or_create_collection`.
pub fn load_documents(
    collection_name: &str,
    raw_documents: Vec<Document>,
    loader: &DocumentLoader,
) -> (Vec<Document>, Vec<Document>) {
    let mut loaded = Vec::with_capacity(raw_documents.len());
    let mut failed = Vec::new();

    for raw in raw_documents {
        match loader(raw.clone()) {
            Ok(Some(document)) => loaded.push(document),
            Ok(None) => {
                debug!("Dropping document during load of {collection_name}");
            }
            Err(e) => {
                warn!("Quarantining unmigratable document in {collection_name}: {e}");
                failed.push(raw);
            }
        }
    }

    (loaded, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn helper() -> DocumentMigrationHelper {
        DocumentMigrationHelper::new(SchemaVersion::new(0, 3, 0))
            .with_converter(SchemaVersion::new(0, 1, 0), |mut d| {
                d.insert("version".into(), json!("0.2.0"));
                d.insert("renamed".into(), json!(true));
                Ok(Some(d))
            })
            .with_converter(SchemaVersion::new(0, 2, 0), |mut d| {
                d.insert("version".into(), json!("0.3.0"));
                Ok(Some(d))
            })
    }

    #[test]
    fn test_migrate_chains_converters() {
        let migrated = helper()
            .migrate(doc(json!({"id": "a", "version": "0.1.0"})))
            .unwrap()
            .unwrap();

        assert_eq!(migrated.get("version"), Some(&json!("0.3.0")));
        assert_eq!(migrated.get("renamed"), Some(&json!(true)));
    }

    #[test]
    fn test_migrate_current_version_is_untouched() {
        let original = doc(json!({"id": "a", "version": "0.3.0"}));
        let migrated = helper().migrate(original.clone()).unwrap().unwrap();
        assert_eq!(migrated, original);
    }

    #[test]
    fn test_migrate_unknown_version_fails() {
        let result = helper().migrate(doc(json!({"id": "a", "version": "0.0.9"})));
        assert!(matches!(
            result,
            Err(PersistenceError::UnmigratableDocument { .. })
        ));
    }

    #[test]
    fn test_converter_must_advance_version() {
        let helper = DocumentMigrationHelper::new(SchemaVersion::new(0, 2, 0)).with_converter(
            SchemaVersion::new(0, 1, 0),
            |d| Ok(Some(d)),
        );

        let result = helper.migrate(doc(json!({"id": "a", "version": "0.1.0"})));
        assert!(matches!(
            result,
            Err(PersistenceError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_converter_can_drop_document() {
        let helper = DocumentMigrationHelper::new(SchemaVersion::new(0, 2, 0)).with_converter(
            SchemaVersion::new(0, 1, 0),
            |_| Ok(None),
        );

        let result = helper
            .migrate(doc(json!({"id": "a", "version": "0.1.0"})))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_load_documents_quarantines_failures() {
        let loader = helper().into_loader();
        let raw = vec![
            doc(json!({"id": "good", "version": "0.3.0"})),
            doc(json!({"id": "old", "version": "0.1.0"})),
            doc(json!({"id": "bad", "version": "9.9.9"})),
        ];

        let (loaded, failed) = load_documents("entities", raw, &loader);
        assert_eq!(loaded.len(), 2);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].get("id"), Some(&json!("bad")));
    }
}
