//! Entity domain types and their stored representations.
//!
//! An [`Entity`] is the in-memory view assembled from two backends: the
//! structured record in the document backend and one vector document per
//! embeddable text in the vector backend. Tags are not part of the
//! structured record; they hydrate from the tag association collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loam_persistence::Document;

use crate::error::{Result, StoreError};
use crate::tags::TagId;

/// Opaque entity identifier. Immutable for the entity's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// View the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A structured sub-field of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityField {
    /// Field name.
    pub name: String,

    /// Human-readable description.
    pub description: String,

    /// Example values.
    pub examples: Vec<String>,
}

/// A domain record managed by one store instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Opaque identifier; updates never change it.
    pub id: EntityId,

    /// Creation timestamp.
    pub creation_utc: DateTime<Utc>,

    /// Primary embeddable text.
    pub value: String,

    /// Structured sub-fields.
    pub fields: Vec<EntityField>,

    /// Auxiliary embeddable texts searched alongside the value.
    pub signals: Vec<String>,

    /// Tags attached to this entity, duplicates collapsed.
    pub tags: Vec<TagId>,
}

impl Entity {
    /// All independently-embeddable texts of this entity, value first.
    ///
    /// Each one becomes its own vector document, which is why relevance
    /// search de-duplicates hits by owning entity rather than by vector
    /// document.
    pub fn embeddable_contents(&self) -> Vec<&str> {
        std::iter::once(self.value.as_str())
            .chain(self.signals.iter().map(String::as_str))
            .collect()
    }
}

/// Content fields for a new entity.
#[derive(Debug, Clone, Default)]
pub struct EntityDraft {
    /// Primary embeddable text.
    pub value: String,

    /// Structured sub-fields.
    pub fields: Vec<EntityField>,

    /// Auxiliary embeddable texts.
    pub signals: Vec<String>,

    /// Tags to attach on creation.
    pub tags: Vec<TagId>,

    /// Creation timestamp override; defaults to now.
    pub creation_utc: Option<DateTime<Utc>>,
}

/// Partial update for an existing entity.
///
/// Fields left as `None` keep their previous value. Tags are never
/// touched by an update; tag mutation is a separate operation.
#[derive(Debug, Clone, Default)]
pub struct EntityUpdateParams {
    /// New primary text.
    pub value: Option<String>,

    /// New structured sub-fields.
    pub fields: Option<Vec<EntityField>>,

    /// New auxiliary texts.
    pub signals: Option<Vec<String>>,
}

/// The document-backend representation of an entity.
///
/// Structured sub-fields are flattened to a JSON string because the
/// backend is only assumed to store flat documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EntityDocument {
    pub id: String,
    pub version: String,
    pub creation_utc: String,
    pub value: String,
    pub fields: String,
    pub signals: Vec<String>,
    pub checksum: String,
}

/// One embeddable-text row in the vector backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EntityVectorDocument {
    pub id: String,
    pub entity_id: String,
    pub version: String,
    pub content: String,
    pub checksum: String,
}

/// Serialize a typed record into a backend document.
pub(crate) fn to_document<T: Serialize>(record: &T) -> Result<Document> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(StoreError::InvalidContent(
            "record did not serialize to an object".to_string(),
        )),
    }
}

/// Deserialize a backend document into a typed record.
pub(crate) fn from_document<T: for<'de> Deserialize<'de>>(document: Document) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(document))
        .map_err(|e| StoreError::InvalidContent(e.to_string()))
}

impl EntityDocument {
    /// Rebuild the domain entity, attaching the given tags.
    pub(crate) fn into_entity(self, tags: Vec<TagId>) -> Result<Entity> {
        let creation_utc = DateTime::parse_from_rfc3339(&self.creation_utc)
            .map_err(|e| StoreError::InvalidContent(format!("bad creation timestamp: {e}")))?
            .with_timezone(&Utc);

        let fields: Vec<EntityField> = serde_json::from_str(&self.fields)
            .map_err(|e| StoreError::InvalidContent(format!("bad fields payload: {e}")))?;

        Ok(Entity {
            id: EntityId(self.id),
            creation_utc,
            value: self.value,
            fields,
            signals: self.signals,
            tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_document() -> EntityDocument {
        EntityDocument {
            id: "e1".to_string(),
            version: "0.1.0".to_string(),
            creation_utc: "2026-01-15T10:30:00+00:00".to_string(),
            value: "hello".to_string(),
            fields: r#"[{"name":"n","description":"d","examples":["x"]}]"#.to_string(),
            signals: vec!["aux".to_string()],
            checksum: "abc".to_string(),
        }
    }

    #[test]
    fn test_into_entity() {
        let entity = sample_document()
            .into_entity(vec![TagId::from("t1")])
            .unwrap();

        assert_eq!(entity.id, EntityId::from("e1"));
        assert_eq!(entity.value, "hello");
        assert_eq!(entity.fields.len(), 1);
        assert_eq!(entity.fields[0].name, "n");
        assert_eq!(entity.tags, vec![TagId::from("t1")]);
    }

    #[test]
    fn test_into_entity_rejects_corrupt_fields() {
        let mut document = sample_document();
        document.fields = "not json".to_string();

        let result = document.into_entity(Vec::new());
        assert!(matches!(result, Err(StoreError::InvalidContent(_))));
    }

    #[test]
    fn test_embeddable_contents_value_first() {
        let entity = sample_document().into_entity(Vec::new()).unwrap();
        assert_eq!(entity.embeddable_contents(), vec!["hello", "aux"]);
    }

    #[test]
    fn test_document_roundtrip() {
        let document = to_document(&sample_document()).unwrap();
        let back: EntityDocument = from_document(document).unwrap();
        assert_eq!(back.id, "e1");
        assert_eq!(back.signals, vec!["aux".to_string()]);
    }
}
