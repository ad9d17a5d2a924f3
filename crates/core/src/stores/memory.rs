use crate::error::IndexError;
use crate::models::{RecordKey, SearchHit, VectorRecord};
use crate::similarity::cosine_similarity;
use crate::traits::VectorIndex;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Volatile vector index: one flat map from `(document_id, chunk_id)` to the
/// record, searched by brute-force cosine similarity behind a single lock.
pub struct InMemoryVectorIndex {
    dimensions: usize,
    state: RwLock<IndexState>,
}

#[derive(Default)]
struct IndexState {
    records: HashMap<RecordKey, StoredRecord>,
    next_sequence: u64,
}

impl IndexState {
    fn insert(&mut self, record: VectorRecord) {
        let key = record.key();
        if let Some(existing) = self.records.get_mut(&key) {
            existing.record = record;
            return;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.records.insert(key, StoredRecord { sequence, record });
    }
}

struct StoredRecord {
    /// Insertion position, kept when the record is overwritten.
    sequence: u64,
    record: VectorRecord,
}

impl InMemoryVectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub async fn records_for_document(&self, document_id: &str) -> Vec<VectorRecord> {
        let state = self.state.read().await;
        let mut records: Vec<&StoredRecord> = state
            .records
            .values()
            .filter(|stored| stored.record.document_id == document_id)
            .collect();
        records.sort_by_key(|stored| stored.sequence);
        records
            .into_iter()
            .map(|stored| stored.record.clone())
            .collect()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn add(&self, record: VectorRecord) -> Result<(), IndexError> {
        if record.embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: record.embedding.len(),
            });
        }

        self.state.write().await.insert(record);
        Ok(())
    }

    async fn add_document(&self, records: Vec<VectorRecord>) -> Result<(), IndexError> {
        if let Some(bad) = records
            .iter()
            .find(|record| record.embedding.len() != self.dimensions)
        {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.embedding.len(),
            });
        }

        let mut state = self.state.write().await;
        for record in records {
            state.insert(record);
        }
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        document_ids: Option<&[String]>,
        top_k: usize,
    ) -> Vec<SearchHit> {
        if top_k == 0 {
            return Vec::new();
        }
        if query_vector.len() != self.dimensions {
            warn!(
                expected = self.dimensions,
                actual = query_vector.len(),
                "query vector has the wrong size"
            );
            return Vec::new();
        }

        let allowed: Option<HashSet<&str>> =
            document_ids.map(|ids| ids.iter().map(String::as_str).collect());

        let state = self.state.read().await;
        let mut scored: Vec<(f32, u64, &VectorRecord)> = Vec::new();
        for stored in state.records.values() {
            let record = &stored.record;
            if let Some(allowed) = &allowed {
                if !allowed.contains(record.document_id.as_str()) {
                    continue;
                }
            }
            if record.embedding.len() != self.dimensions {
                let corruption = IndexError::Corruption(format!(
                    "record {}/{} holds {} dimensions",
                    record.document_id,
                    record.chunk_id,
                    record.embedding.len()
                ));
                error!(%corruption, "skipping record");
                continue;
            }

            let score = cosine_similarity(query_vector, &record.embedding);
            scored.push((score, stored.sequence, record));
        }

        scored.sort_by(|left, right| {
            right
                .0
                .total_cmp(&left.0)
                .then_with(|| left.1.cmp(&right.1))
        });

        scored
            .into_iter()
            .take(top_k)
            .map(|(score, _, record)| SearchHit::from_record(record, score))
            .collect()
    }

    async fn delete_document(&self, document_id: &str) -> usize {
        let mut state = self.state.write().await;
        let before = state.records.len();
        state
            .records
            .retain(|key, _| key.document_id != document_id);
        let removed = before - state.records.len();
        debug!(document_id, removed, "deleted document vectors");
        removed
    }

    async fn document_chunk_count(&self, document_id: &str) -> usize {
        let state = self.state.read().await;
        state
            .records
            .keys()
            .filter(|key| key.document_id == document_id)
            .count()
    }

    async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }
}
