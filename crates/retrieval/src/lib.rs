//! Document retrieval
//!
//! The turn engine grounds replies in passages returned by a `Retriever`.
//! Document ingestion is a collaborator concern; this crate carries the
//! capability seam plus a small in-memory implementation good enough for
//! grounding tests and single-document demos.

pub mod memory;

pub use memory::InMemoryRetriever;

use async_trait::async_trait;
use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("query failed: {0}")]
    Query(String),
}

/// One ranked context passage.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub text: String,
    pub score: f32,
}

/// Ranked-passage lookup. Implementations are stateless after
/// construction and shared read-only across all concurrent calls.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return the passages most relevant to `query`, best first.
    /// An empty result means the document has nothing on the topic.
    async fn retrieve(&self, query: &str) -> Result<Vec<Passage>, RetrievalError>;
}
