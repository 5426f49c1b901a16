//! The entity store façade.
//!
//! One `EntityStore` composes a structured document collection, a vector
//! collection, and a tag association collection behind a per-store
//! reader-writer lock. One façade is instantiated per entity type; the
//! instances differ only in configuration (name, identifier policy).
//!
//! The structured record and its vector documents are written inside one
//! writer critical section, but the two backends are not transactional
//! with each other: a crash between the inserts can leave orphaned
//! vector documents behind. [`EntityStore::reconcile_orphans`] sweeps
//! those up.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future;
use ordered_float::OrderedFloat;
use tracing::{debug, info};

use loam_embeddings::Embedder;
use loam_persistence::{
    Document, DocumentCollection, DocumentDatabase, DocumentMigrationHelper, Filter, SchemaVersion,
    SimilarDocument, StoreMigrationHelper, VectorCollection, VectorDatabase,
};

use crate::checksum::checksum;
use crate::config::EntityStoreConfig;
use crate::entity::{
    Entity, EntityDocument, EntityDraft, EntityField, EntityId, EntityUpdateParams,
    EntityVectorDocument, from_document, to_document,
};
use crate::error::{Result, StoreError};
use crate::id::{IdGenerator, IdPolicy};
use crate::lock::ReaderWriterLock;
use crate::search::{min_vectors_for_max_item_count, query_chunks};
use crate::tags::{TagAssociations, TagId};

/// Schema version of structured records and tag associations.
pub const DOCUMENT_VERSION: SchemaVersion = SchemaVersion::new(0, 1, 0);

/// Schema version of vector documents.
///
/// Tracked independently of [`DOCUMENT_VERSION`]: a store can reshape
/// its vector schema without reshaping its structured schema, or vice
/// versa.
pub const VECTOR_VERSION: SchemaVersion = SchemaVersion::new(0, 1, 0);

/// A versioned, dual-backend entity store.
pub struct EntityStore {
    config: EntityStoreConfig,
    id_generator: IdGenerator,
    lock: ReaderWriterLock,
    embedder: Arc<dyn Embedder>,
    entities: Arc<dyn DocumentCollection>,
    vectors: Arc<dyn VectorCollection>,
    tags: TagAssociations,
}

impl EntityStore {
    /// Start building a store with the given configuration.
    pub fn builder(config: EntityStoreConfig) -> EntityStoreBuilder {
        EntityStoreBuilder::new(config)
    }

    /// Open a store with no registered migration converters.
    pub async fn open(
        config: EntityStoreConfig,
        document_db: Arc<dyn DocumentDatabase>,
        vector_db: Arc<dyn VectorDatabase>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        Self::builder(config)
            .open(document_db, vector_db, embedder)
            .await
    }

    /// Get the configuration this store was opened with.
    pub fn config(&self) -> &EntityStoreConfig {
        &self.config
    }

    /// Create an entity.
    ///
    /// Under the content-addressed identifier policy, creating identical
    /// content twice yields the same identifier and leaves a single
    /// structured record behind. On such a hit the stored record is
    /// returned unchanged: the second caller's tags and timestamp are
    /// not merged into it.
    pub async fn create(&self, draft: EntityDraft) -> Result<Entity> {
        let _guard = self.lock.write().await;

        let creation_utc = draft.creation_utc.unwrap_or_else(Utc::now);
        let content_checksum = content_checksum(&draft.value, &draft.fields)?;
        let id = EntityId(self.id_generator.generate(&content_checksum));

        if self.id_generator.policy() == IdPolicy::ContentAddressed
            && let Some(existing) = self.find_document(&id).await?
        {
            debug!(
                "Entity {id} already exists, returning the stored record \
                 ({} draft tags discarded)",
                draft.tags.len()
            );
            return self.hydrate(existing).await;
        }

        let mut tags: Vec<TagId> = Vec::new();
        for tag in draft.tags {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        let entity = Entity {
            id: id.clone(),
            creation_utc,
            value: draft.value,
            fields: draft.fields,
            signals: draft.signals,
            tags: tags.clone(),
        };

        self.insert_entity(&entity, &content_checksum).await?;

        for tag in &tags {
            self.tags.upsert(&entity.id, tag, Some(creation_utc)).await?;
        }

        info!("Created entity {id} in {}", self.config.name);
        Ok(entity)
    }

    /// Read an entity by identifier.
    pub async fn read(&self, id: &EntityId) -> Result<Entity> {
        let _guard = self.lock.read().await;

        let document = self
            .find_document(id)
            .await?
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;
        self.hydrate(document).await
    }

    /// Update an entity's content fields.
    ///
    /// Fields omitted from the params retain their previous value. The
    /// identifier and creation timestamp never change, and tags are
    /// untouched; all vector documents are rebuilt from the new content.
    pub async fn update(&self, id: &EntityId, params: EntityUpdateParams) -> Result<Entity> {
        let _guard = self.lock.write().await;

        let document = self
            .find_document(id)
            .await?
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;
        let stored: EntityDocument = from_document(document)?;
        let current = stored.into_entity(self.tags.tags_for_entity(id).await?)?;

        self.delete_vector_documents(id).await?;
        self.entities
            .delete_one(&Filter::eq("id", id.as_str()))
            .await?;

        let entity = Entity {
            id: id.clone(),
            creation_utc: current.creation_utc,
            value: params.value.unwrap_or(current.value),
            fields: params.fields.unwrap_or(current.fields),
            signals: params.signals.unwrap_or(current.signals),
            tags: current.tags,
        };

        let content_checksum = content_checksum(&entity.value, &entity.fields)?;
        self.insert_entity(&entity, &content_checksum).await?;

        debug!("Updated entity {id} in {}", self.config.name);
        Ok(entity)
    }

    /// Delete an entity, cascading to its vector documents and every tag
    /// association it carries.
    pub async fn delete(&self, id: &EntityId) -> Result<()> {
        let _guard = self.lock.write().await;

        let result = self
            .entities
            .delete_one(&Filter::eq("id", id.as_str()))
            .await?;
        if result.deleted_count == 0 {
            return Err(StoreError::not_found(id.as_str()));
        }

        self.delete_vector_documents(id).await?;
        self.tags.remove_all_for_entity(id).await?;

        info!("Deleted entity {id} from {}", self.config.name);
        Ok(())
    }

    /// List entities, optionally filtered by tags.
    ///
    /// `None` lists everything. An empty tag slice lists only entities
    /// with no tags at all. A non-empty slice lists entities carrying at
    /// least one of the given tags.
    pub async fn list(&self, tags: Option<&[TagId]>) -> Result<Vec<Entity>> {
        let _guard = self.lock.read().await;

        let filter = match tags {
            None => Filter::All,
            Some(tags) if tags.is_empty() => {
                let tagged = self.tags.tagged_entities().await?;
                if tagged.is_empty() {
                    Filter::All
                } else {
                    Filter::And(
                        tagged
                            .iter()
                            .map(|id| Filter::ne("id", id.as_str()))
                            .collect(),
                    )
                }
            }
            Some(tags) => {
                let ids = self.tags.entities_for_tags(tags).await?;
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                Filter::is_in(
                    "id",
                    ids.iter().map(|id| id.as_str().to_string()).collect(),
                )
            }
        };

        let documents = self.entities.find(&filter).await?;
        let mut entities = Vec::with_capacity(documents.len());
        for document in documents {
            entities.push(self.hydrate(document).await?);
        }
        Ok(entities)
    }

    /// Find up to `max_count` candidates relevant to a free-text query,
    /// ordered by ascending semantic distance.
    pub async fn find_relevant(
        &self,
        query: &str,
        candidates: &[Entity],
        max_count: usize,
    ) -> Result<Vec<Entity>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.lock.read().await;

        let chunks = query_chunks(query, self.embedder.as_ref());
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let candidate_filter = Filter::is_in(
            "entity_id",
            candidates
                .iter()
                .map(|c| c.id.as_str().to_string())
                .collect(),
        );
        let k = min_vectors_for_max_item_count(
            candidates,
            |c| c.embeddable_contents().len(),
            max_count,
        );

        let searches = chunks
            .iter()
            .map(|chunk| self.vectors.find_similar_documents(&candidate_filter, chunk, k));
        let per_chunk_hits = future::try_join_all(searches).await?;

        // Keep the best hit per owning entity across all chunks.
        let mut best: HashMap<String, SimilarDocument> = HashMap::new();
        for hit in per_chunk_hits.into_iter().flatten() {
            let Some(entity_id) = hit.document.get("entity_id").and_then(|v| v.as_str()) else {
                continue;
            };
            match best.get(entity_id) {
                Some(existing) if existing.distance <= hit.distance => {}
                _ => {
                    best.insert(entity_id.to_string(), hit);
                }
            }
        }

        let mut ranked: Vec<(String, f32)> = best
            .into_iter()
            .map(|(entity_id, hit)| (entity_id, hit.distance))
            .collect();
        ranked.sort_by_key(|(_, distance)| OrderedFloat(*distance));
        ranked.truncate(max_count);

        let documents = self
            .entities
            .find(&Filter::is_in(
                "id",
                ranked.iter().map(|(id, _)| id.clone()).collect(),
            ))
            .await?;
        let mut by_id: HashMap<String, Document> = documents
            .into_iter()
            .filter_map(|d| {
                let id = d.get("id").and_then(|v| v.as_str())?.to_string();
                Some((id, d))
            })
            .collect();

        let mut entities = Vec::with_capacity(ranked.len());
        for (entity_id, _) in ranked {
            if let Some(document) = by_id.remove(&entity_id) {
                entities.push(self.hydrate(document).await?);
            }
        }

        debug!(
            "Relevance search in {} returned {} of {} candidates",
            self.config.name,
            entities.len(),
            candidates.len()
        );
        Ok(entities)
    }

    /// Attach a tag to an entity.
    ///
    /// Returns `false` without side effect when the tag is already
    /// attached; fails `NotFound` when the entity does not exist.
    pub async fn upsert_tag(
        &self,
        id: &EntityId,
        tag_id: &TagId,
        creation_utc: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let _guard = self.lock.write().await;

        if self.find_document(id).await?.is_none() {
            return Err(StoreError::not_found(id.as_str()));
        }
        self.tags.upsert(id, tag_id, creation_utc).await
    }

    /// Detach a tag from an entity. Fails `NotFound` when the pair does
    /// not exist.
    pub async fn remove_tag(&self, id: &EntityId, tag_id: &TagId) -> Result<()> {
        let _guard = self.lock.write().await;
        self.tags.remove(id, tag_id).await
    }

    /// Delete vector documents whose owning entity no longer resolves.
    ///
    /// Multi-backend writes are not atomic, so a crash mid-create can
    /// strand vector documents. Returns how many were removed.
    pub async fn reconcile_orphans(&self) -> Result<usize> {
        let _guard = self.lock.write().await;

        let entity_ids: HashSet<String> = self
            .entities
            .find(&Filter::All)
            .await?
            .iter()
            .filter_map(|d| d.get("id").and_then(|v| v.as_str()).map(str::to_string))
            .collect();

        let mut removed = 0;
        for document in self.vectors.find(&Filter::All).await? {
            let Some(owner) = document.get("entity_id").and_then(|v| v.as_str()) else {
                continue;
            };
            if entity_ids.contains(owner) {
                continue;
            }
            if let Some(vector_id) = document.get("id").and_then(|v| v.as_str()) {
                removed += self
                    .vectors
                    .delete_one(&Filter::eq("id", vector_id))
                    .await?
                    .deleted_count;
            }
        }

        if removed > 0 {
            info!(
                "Reconciled {removed} orphaned vector documents in {}",
                self.config.name
            );
        }
        Ok(removed)
    }

    async fn find_document(&self, id: &EntityId) -> Result<Option<Document>> {
        Ok(self
            .entities
            .find_one(&Filter::eq("id", id.as_str()))
            .await?)
    }

    /// Insert the vector documents and structured record for an entity.
    ///
    /// Two backends, two steps, no transaction: callers hold the writer
    /// lock, and a crash between the steps leaves orphans for
    /// [`Self::reconcile_orphans`].
    async fn insert_entity(&self, entity: &Entity, content_checksum: &str) -> Result<()> {
        for content in entity.embeddable_contents() {
            let vector_document = EntityVectorDocument {
                id: self.id_generator.generate(&format!("{}{content}", entity.id)),
                entity_id: entity.id.to_string(),
                version: VECTOR_VERSION.to_string(),
                content: content.to_string(),
                checksum: checksum(content),
            };
            self.vectors
                .insert_one(to_document(&vector_document)?)
                .await?;
        }

        let document = EntityDocument {
            id: entity.id.to_string(),
            version: DOCUMENT_VERSION.to_string(),
            creation_utc: entity.creation_utc.to_rfc3339(),
            value: entity.value.clone(),
            fields: serde_json::to_string(&entity.fields)?,
            signals: entity.signals.clone(),
            checksum: content_checksum.to_string(),
        };
        self.entities.insert_one(to_document(&document)?).await?;
        Ok(())
    }

    async fn delete_vector_documents(&self, id: &EntityId) -> Result<()> {
        let filter = Filter::eq("entity_id", id.as_str());
        loop {
            let result = self.vectors.delete_one(&filter).await?;
            if result.deleted_count == 0 {
                return Ok(());
            }
        }
    }

    async fn hydrate(&self, document: Document) -> Result<Entity> {
        let stored: EntityDocument = from_document(document)?;
        let id = EntityId(stored.id.clone());
        let tags = self.tags.tags_for_entity(&id).await?;
        stored.into_entity(tags)
    }
}

/// Compute the checksum of an entity's content-defining fields.
fn content_checksum(value: &str, fields: &[EntityField]) -> Result<String> {
    Ok(checksum(format!(
        "{value}{}",
        serde_json::to_string(fields)?
    )))
}

/// Builder for an [`EntityStore`], carrying migration converters.
pub struct EntityStoreBuilder {
    config: EntityStoreConfig,
    document_migrations: DocumentMigrationHelper,
    vector_migrations: DocumentMigrationHelper,
    association_migrations: DocumentMigrationHelper,
}

impl EntityStoreBuilder {
    /// Create a builder with no registered converters.
    pub fn new(config: EntityStoreConfig) -> Self {
        Self {
            config,
            document_migrations: DocumentMigrationHelper::new(DOCUMENT_VERSION),
            vector_migrations: DocumentMigrationHelper::new(VECTOR_VERSION),
            association_migrations: DocumentMigrationHelper::new(DOCUMENT_VERSION),
        }
    }

    /// Register a converter for structured records at `version`.
    pub fn with_document_converter<F>(mut self, version: SchemaVersion, converter: F) -> Self
    where
        F: Fn(Document) -> loam_persistence::Result<Option<Document>> + Send + Sync + 'static,
    {
        self.document_migrations = self.document_migrations.with_converter(version, converter);
        self
    }

    /// Register a converter for vector documents at `version`.
    pub fn with_vector_converter<F>(mut self, version: SchemaVersion, converter: F) -> Self
    where
        F: Fn(Document) -> loam_persistence::Result<Option<Document>> + Send + Sync + 'static,
    {
        self.vector_migrations = self.vector_migrations.with_converter(version, converter);
        self
    }

    /// Register a converter for tag associations at `version`.
    pub fn with_association_converter<F>(mut self, version: SchemaVersion, converter: F) -> Self
    where
        F: Fn(Document) -> loam_persistence::Result<Option<Document>> + Send + Sync + 'static,
    {
        self.association_migrations = self
            .association_migrations
            .with_converter(version, converter);
        self
    }

    /// Open the store.
    ///
    /// The embedder is held for the store's lifetime. Both backends run
    /// their version gates independently; any gate failure aborts the
    /// open and no partially-open store is exposed.
    pub async fn open(
        self,
        document_db: Arc<dyn DocumentDatabase>,
        vector_db: Arc<dyn VectorDatabase>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<EntityStore> {
        let config = self.config;
        info!("Opening entity store {}", config.name);

        let vector_gate =
            StoreMigrationHelper::new(&config.name, VECTOR_VERSION, config.allow_migration);
        let document_gate =
            StoreMigrationHelper::new(&config.name, DOCUMENT_VERSION, config.allow_migration);

        // Both gates must pass and every collection must open before
        // either version track is committed; a failed open leaves the
        // persisted versions exactly as they were.
        vector_gate.check(vector_db.as_ref()).await?;
        document_gate.check(document_db.as_ref()).await?;

        let vectors = vector_db
            .get_or_create_collection(&config.name, self.vector_migrations.into_loader())
            .await?;
        let entities = document_db
            .get_or_create_collection(&config.name, self.document_migrations.into_loader())
            .await?;
        let associations = document_db
            .get_or_create_collection(
                &format!("{}_tag_associations", config.name),
                self.association_migrations.into_loader(),
            )
            .await?;

        vector_gate.commit(vector_db.as_ref()).await?;
        document_gate.commit(document_db.as_ref()).await?;

        let id_generator = IdGenerator::new(config.id_policy);
        let tags = TagAssociations::new(associations, DOCUMENT_VERSION.to_string());

        Ok(EntityStore {
            config,
            id_generator,
            lock: ReaderWriterLock::new(),
            embedder,
            entities,
            vectors,
            tags,
        })
    }
}
