//! Identifier issuance.
//!
//! Stores pick one of two policies at instantiation time. Content-addressed
//! stores derive identifiers from a content checksum, which makes creation
//! idempotent: re-submitting identical content yields the same identifier.
//! Identity-random stores hand out unrelated random tokens instead. Both
//! policies coexist across entity types; which one an entity type should
//! use is a product decision, not something this layer unifies.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checksum::checksum;

/// Length of issued identifiers, in hex characters.
const ID_LENGTH: usize = 16;

/// How a store derives entity identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdPolicy {
    /// Identifiers derive from the checksum of canonical content.
    ContentAddressed,

    /// Identifiers are random tokens unrelated to content.
    Random,
}

/// Issues identifiers under a fixed policy.
#[derive(Debug, Clone, Copy)]
pub struct IdGenerator {
    policy: IdPolicy,
}

impl IdGenerator {
    /// Create a generator with the given policy.
    pub fn new(policy: IdPolicy) -> Self {
        Self { policy }
    }

    /// Get the policy this generator was built with.
    pub fn policy(&self) -> IdPolicy {
        self.policy
    }

    /// Issue an identifier.
    ///
    /// Under the content-addressed policy the identifier is a function of
    /// the seed (typically a content checksum); under the random policy
    /// the seed is ignored.
    pub fn generate(&self, seed: &str) -> String {
        match self.policy {
            IdPolicy::ContentAddressed => checksum(seed)[..ID_LENGTH].to_string(),
            IdPolicy::Random => Uuid::new_v4().simple().to_string()[..ID_LENGTH].to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_content_addressed_is_stable() {
        let generator = IdGenerator::new(IdPolicy::ContentAddressed);
        assert_eq!(generator.generate("seed"), generator.generate("seed"));
        assert_ne!(generator.generate("seed"), generator.generate("other"));
    }

    #[test]
    fn test_random_ignores_seed() {
        let generator = IdGenerator::new(IdPolicy::Random);
        assert_ne!(generator.generate("seed"), generator.generate("seed"));
    }

    #[test]
    fn test_id_length() {
        for policy in [IdPolicy::ContentAddressed, IdPolicy::Random] {
            let id = IdGenerator::new(policy).generate("seed");
            assert_eq!(id.len(), ID_LENGTH);
        }
    }
}
