use crate::error::IndexError;
use crate::models::{SearchHit, VectorRecord};
use async_trait::async_trait;

/// Storage and similarity search over chunk embeddings.
///
/// Only `add` can fail; searches and deletions are total so that a query
/// against an empty or unknown scope simply finds nothing.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Inserts the record, or replaces the one stored under the same
    /// `(document_id, chunk_id)`.
    async fn add(&self, record: VectorRecord) -> Result<(), IndexError>;

    /// Adds every chunk of one document in a single step. Either all records
    /// become visible together or, on error, none of them do.
    async fn add_document(&self, records: Vec<VectorRecord>) -> Result<(), IndexError>;

    /// Records ranked by descending cosine similarity, ties in insertion
    /// order. `None` searches every document; `Some` restricts the search to
    /// the listed ids, so an empty list matches nothing.
    async fn search(
        &self,
        query_vector: &[f32],
        document_ids: Option<&[String]>,
        top_k: usize,
    ) -> Vec<SearchHit>;

    /// Removes every record of the document and returns how many were
    /// dropped. Unknown ids are a no-op.
    async fn delete_document(&self, document_id: &str) -> usize;

    async fn document_chunk_count(&self, document_id: &str) -> usize;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
