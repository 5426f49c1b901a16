//! # Embeddings
//!
//! Embedding generation and similarity math for the Loam entity stores.
//!
//! An [`Embedder`] turns text into dense vectors and exposes the token
//! budget a single embedding call can accept, which the store layer uses
//! to chunk long queries. Two implementations ship with the crate:
//!
//! - [`OpenAiEmbedder`]: calls the OpenAI embeddings API over HTTP.
//! - [`HashingEmbedder`]: a deterministic, offline bag-of-words embedder
//!   useful for local development and tests.

pub mod embedder;
pub mod error;
pub mod similarity;

pub use embedder::{Embedder, HashingEmbedder, OpenAiEmbedder};
pub use error::{EmbedderError, Result};
pub use similarity::{cosine_distance, cosine_similarity, normalize};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
