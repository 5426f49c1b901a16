//! Versioned, dual-backend entity stores.
//!
//! An [`EntityStore`] keeps each entity in two backends at once: a
//! structured record in a document database and one vector document per
//! embeddable text in a vector database. The façade mediates every
//! operation through a per-store reader-writer lock, derives identifiers
//! from content checksums (or hands out random ones), maintains a tag
//! association index, and runs a version-gated migration pipeline when
//! the store is opened over previously persisted data.

mod checksum;
mod config;
mod entity;
mod error;
mod id;
mod lock;
mod search;
mod store;
mod tags;

pub use checksum::checksum;
pub use config::EntityStoreConfig;
pub use entity::{Entity, EntityDraft, EntityField, EntityId, EntityUpdateParams};
pub use error::{Result, StoreError};
pub use id::{IdGenerator, IdPolicy};
pub use lock::ReaderWriterLock;
pub use search::{min_vectors_for_max_item_count, query_chunks};
pub use store::{DOCUMENT_VERSION, EntityStore, EntityStoreBuilder, VECTOR_VERSION};
pub use tags::{TagAssociations, TagId};
