//! In-memory keyword retriever
//!
//! Scores passages by query-term overlap. No embeddings, no index; the
//! passage list is built once and only read afterwards, so concurrent
//! queries need no locking.

use async_trait::async_trait;

use crate::{Passage, Retriever, RetrievalError};

/// Keyword-overlap retriever over a fixed passage list.
pub struct InMemoryRetriever {
    passages: Vec<String>,
    top_k: usize,
}

impl InMemoryRetriever {
    pub fn new(passages: Vec<String>, top_k: usize) -> Self {
        Self { passages, top_k }
    }

    /// Chunk a plain-text document into overlapping passages.
    pub fn from_text(text: &str, chunk_chars: usize, overlap: usize) -> Self {
        let chunk_chars = chunk_chars.max(1);
        let step = chunk_chars.saturating_sub(overlap).max(1);
        let chars: Vec<char> = text.chars().collect();

        let mut passages = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + chunk_chars).min(chars.len());
            let chunk: String = chars[start..end].iter().collect();
            let chunk = chunk.trim().to_string();
            if !chunk.is_empty() {
                passages.push(chunk);
            }
            if end == chars.len() {
                break;
            }
            start += step;
        }

        tracing::debug!("chunked document into {} passages", passages.len());
        Self::new(passages, 5)
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    fn terms(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    // Exact match, or a passage term extending a query stem of at least
    // four characters ("refund" hits "refunds").
    fn matches(query_term: &str, passage_terms: &[String]) -> bool {
        passage_terms
            .iter()
            .any(|p| p == query_term || (query_term.len() >= 4 && p.starts_with(query_term)))
    }
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Passage>, RetrievalError> {
        let query_terms = Self::terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Passage> = self
            .passages
            .iter()
            .filter_map(|passage| {
                let passage_terms = Self::terms(passage);
                let hits = query_terms
                    .iter()
                    .filter(|t| Self::matches(t, &passage_terms))
                    .count();
                if hits == 0 {
                    return None;
                }
                Some(Passage {
                    text: passage.clone(),
                    score: hits as f32 / query_terms.len() as f32,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(self.top_k);
        Ok(scored)
    }
}
