//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::id::IdPolicy;

/// Configuration for one entity store instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityStoreConfig {
    /// Store name, also used as the backend collection name.
    pub name: String,

    /// How entity identifiers are derived.
    pub id_policy: IdPolicy,

    /// Whether opening may migrate old-schema data forward.
    ///
    /// When `false`, any persisted version mismatch fails the open with
    /// `MigrationRequired`.
    pub allow_migration: bool,
}

impl EntityStoreConfig {
    /// Create a configuration with default values.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_policy: IdPolicy::ContentAddressed,
            allow_migration: true,
        }
    }

    /// Set the identifier policy.
    pub fn with_id_policy(mut self, policy: IdPolicy) -> Self {
        self.id_policy = policy;
        self
    }

    /// Allow or disallow migration at open time.
    pub fn with_allow_migration(mut self, allow: bool) -> Self {
        self.allow_migration = allow;
        self
    }
}
