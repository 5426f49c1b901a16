//! Tag association index.
//!
//! A many-to-many join collection between entities and tags. An
//! association row is the only storage of the relationship; entities do
//! not embed a tag list in their structured record.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use loam_persistence::{DocumentCollection, Filter};

use crate::checksum::checksum;
use crate::entity::{EntityId, from_document, to_document};
use crate::error::{Result, StoreError};

/// Opaque tag identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(pub String);

impl TagId {
    /// View the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TagId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TagId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Stored form of one entity-tag association.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TagAssociationDocument {
    pub id: String,
    pub version: String,
    pub creation_utc: String,
    pub entity_id: String,
    pub tag_id: String,
}

/// The tag association index over one backend collection.
pub struct TagAssociations {
    collection: Arc<dyn DocumentCollection>,
    version: String,
}

impl TagAssociations {
    pub(crate) fn new(collection: Arc<dyn DocumentCollection>, version: String) -> Self {
        Self {
            collection,
            version,
        }
    }

    fn pair_filter(entity_id: &EntityId, tag_id: &TagId) -> Filter {
        Filter::And(vec![
            Filter::eq("entity_id", entity_id.as_str()),
            Filter::eq("tag_id", tag_id.as_str()),
        ])
    }

    /// Associate a tag with an entity.
    ///
    /// Idempotent: returns `false` without side effect when the pair
    /// already exists.
    pub async fn upsert(
        &self,
        entity_id: &EntityId,
        tag_id: &TagId,
        creation_utc: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let existing = self
            .collection
            .find_one(&Self::pair_filter(entity_id, tag_id))
            .await?;
        if existing.is_some() {
            return Ok(false);
        }

        let creation_utc = creation_utc.unwrap_or_else(Utc::now);
        let association_checksum = checksum(format!("{entity_id}{tag_id}"));

        let document = TagAssociationDocument {
            id: association_checksum[..16].to_string(),
            version: self.version.clone(),
            creation_utc: creation_utc.to_rfc3339(),
            entity_id: entity_id.to_string(),
            tag_id: tag_id.to_string(),
        };

        self.collection.insert_one(to_document(&document)?).await?;
        debug!("Tagged entity {entity_id} with {tag_id}");
        Ok(true)
    }

    /// Remove an association. Fails with `NotFound` when no such pair
    /// exists.
    pub async fn remove(&self, entity_id: &EntityId, tag_id: &TagId) -> Result<()> {
        let result = self
            .collection
            .delete_one(&Self::pair_filter(entity_id, tag_id))
            .await?;

        if result.deleted_count == 0 {
            return Err(StoreError::not_found(tag_id.as_str()));
        }
        Ok(())
    }

    /// Remove every association for an entity (cascade delete).
    pub async fn remove_all_for_entity(&self, entity_id: &EntityId) -> Result<()> {
        let filter = Filter::eq("entity_id", entity_id.as_str());
        loop {
            let result = self.collection.delete_one(&filter).await?;
            if result.deleted_count == 0 {
                return Ok(());
            }
        }
    }

    /// List the tags attached to an entity, duplicates collapsed.
    pub async fn tags_for_entity(&self, entity_id: &EntityId) -> Result<Vec<TagId>> {
        let documents = self
            .collection
            .find(&Filter::eq("entity_id", entity_id.as_str()))
            .await?;

        let mut seen = BTreeSet::new();
        let mut tags = Vec::new();
        for document in documents {
            let association: TagAssociationDocument = from_document(document)?;
            if seen.insert(association.tag_id.clone()) {
                tags.push(TagId(association.tag_id));
            }
        }
        Ok(tags)
    }

    /// Entities carrying at least one of the given tags (logical OR).
    pub async fn entities_for_tags(&self, tags: &[TagId]) -> Result<BTreeSet<EntityId>> {
        let filter = Filter::Or(
            tags.iter()
                .map(|tag| Filter::eq("tag_id", tag.as_str()))
                .collect(),
        );

        let mut entities = BTreeSet::new();
        for document in self.collection.find(&filter).await? {
            let association: TagAssociationDocument = from_document(document)?;
            entities.insert(EntityId(association.entity_id));
        }
        Ok(entities)
    }

    /// Every entity that carries any tag at all.
    ///
    /// The complement of this set defines the meaning of listing by an
    /// empty tag set: entities with no tags, not "all" and not "none".
    pub async fn tagged_entities(&self) -> Result<BTreeSet<EntityId>> {
        let mut entities = BTreeSet::new();
        for document in self.collection.find(&Filter::All).await? {
            let association: TagAssociationDocument = from_document(document)?;
            entities.insert(EntityId(association.entity_id));
        }
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_persistence::{DocumentDatabase, TransientDocumentDatabase, identity_loader};
    use pretty_assertions::assert_eq;

    async fn index() -> TagAssociations {
        let db = TransientDocumentDatabase::new();
        let collection = db
            .get_or_create_collection("tag_associations", identity_loader())
            .await
            .unwrap();
        TagAssociations::new(collection, "0.1.0".to_string())
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let index = index().await;
        let entity = EntityId::from("e1");
        let tag = TagId::from("t1");

        assert!(index.upsert(&entity, &tag, None).await.unwrap());
        assert!(!index.upsert(&entity, &tag, None).await.unwrap());
        assert_eq!(index.tags_for_entity(&entity).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_pair_fails() {
        let index = index().await;
        let result = index
            .remove(&EntityId::from("e1"), &TagId::from("t1"))
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_entities_for_tags_is_logical_or() {
        let index = index().await;
        index
            .upsert(&EntityId::from("e1"), &TagId::from("t1"), None)
            .await
            .unwrap();
        index
            .upsert(&EntityId::from("e2"), &TagId::from("t2"), None)
            .await
            .unwrap();
        index
            .upsert(&EntityId::from("e3"), &TagId::from("t3"), None)
            .await
            .unwrap();

        let entities = index
            .entities_for_tags(&[TagId::from("t1"), TagId::from("t2")])
            .await
            .unwrap();
        assert_eq!(
            entities,
            BTreeSet::from([EntityId::from("e1"), EntityId::from("e2")])
        );
    }

    #[tokio::test]
    async fn test_remove_all_for_entity() {
        let index = index().await;
        let entity = EntityId::from("e1");
        index
            .upsert(&entity, &TagId::from("t1"), None)
            .await
            .unwrap();
        index
            .upsert(&entity, &TagId::from("t2"), None)
            .await
            .unwrap();

        index.remove_all_for_entity(&entity).await.unwrap();
        assert!(index.tags_for_entity(&entity).await.unwrap().is_empty());
        assert!(index.tagged_entities().await.unwrap().is_empty());
    }
}
