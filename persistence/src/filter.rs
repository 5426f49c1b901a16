//! Structured filters over stored documents.
//!
//! Backends are only assumed to support filtered find/insert/update/
//! delete, so the filter language stays small: field equality, inequality,
//! membership, and boolean combinators.

use serde_json::Value;

use crate::document::Document;

/// A filter expression evaluated against a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,

    /// Field equals value.
    Eq(String, Value),

    /// Field differs from value (missing fields match).
    Ne(String, Value),

    /// Field is one of the given values.
    In(String, Vec<Value>),

    /// All sub-filters match.
    And(Vec<Filter>),

    /// At least one sub-filter matches.
    Or(Vec<Filter>),
}

impl Filter {
    /// Field equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    /// Field inequality filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne(field.into(), value.into())
    }

    /// Field membership filter.
    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: Vec<V>) -> Self {
        Self::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    /// Evaluate this filter against a document.
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::All => true,
            Self::Eq(field, value) => document.get(field) == Some(value),
            Self::Ne(field, value) => document.get(field) != Some(value),
            Self::In(field, values) => document
                .get(field)
                .is_some_and(|actual| values.contains(actual)),
            Self::And(filters) => filters.iter().all(|f| f.matches(document)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(document)),
        }
    }
}
