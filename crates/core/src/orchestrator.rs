use crate::chunking::{split_text, ChunkingConfig};
use crate::embeddings::{Embedder, FallbackEmbedder};
use crate::error::{IndexError, IngestError};
use crate::extractor::extract_text;
use crate::models::{
    Chunk, Document, FileType, IngestResult, Metadata, RetrievalOptions, SearchHit,
    SearchResponse, VectorRecord,
};
use crate::stores::InMemoryVectorIndex;
use crate::traits::VectorIndex;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Separator placed between chunks in an assembled context.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Ties extraction, chunking, embedding and the vector index together.
///
/// The service never locks per document: concurrent ingestion of the same
/// document id must be serialised by the caller.
pub struct RetrievalService<V, E>
where
    V: VectorIndex,
    E: Embedder,
{
    index: V,
    embedder: Arc<E>,
    options: RetrievalOptions,
}

impl RetrievalService<InMemoryVectorIndex, FallbackEmbedder> {
    /// In-memory index plus the default embedder for this build.
    pub fn in_memory(options: RetrievalOptions) -> Result<Self, IngestError> {
        let embedder = Arc::new(FallbackEmbedder::from_options(&options));
        let index = InMemoryVectorIndex::new(options.embedding_dimensions);
        Self::new(index, embedder, options)
    }
}

impl<V, E> RetrievalService<V, E>
where
    V: VectorIndex,
    E: Embedder + 'static,
{
    pub fn new(index: V, embedder: Arc<E>, options: RetrievalOptions) -> Result<Self, IngestError> {
        options.validate()?;
        if embedder.dimensions() != index.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: index.dimensions(),
                actual: embedder.dimensions(),
            }
            .into());
        }

        Ok(Self {
            index,
            embedder,
            options,
        })
    }

    pub fn index(&self) -> &V {
        &self.index
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    /// Extracts, chunks, embeds and indexes one document using the configured
    /// timeouts.
    pub async fn ingest(
        &self,
        bytes: Vec<u8>,
        document_id: &str,
        file_type: FileType,
        metadata: Metadata,
    ) -> Result<IngestResult, IngestError> {
        let extraction_timeout = self.options.extraction_timeout();
        let embedding_timeout = self.options.embedding_timeout();
        self.ingest_inner(
            bytes,
            document_id,
            file_type,
            metadata,
            extraction_timeout,
            embedding_timeout,
        )
        .await
    }

    /// Like [`ingest`](Self::ingest), with one caller-supplied bound applied to
    /// both extraction and embedding.
    pub async fn ingest_with_timeout(
        &self,
        bytes: Vec<u8>,
        document_id: &str,
        file_type: FileType,
        metadata: Metadata,
        timeout: Option<Duration>,
    ) -> Result<IngestResult, IngestError> {
        self.ingest_inner(bytes, document_id, file_type, metadata, timeout, timeout)
            .await
    }

    async fn ingest_inner(
        &self,
        bytes: Vec<u8>,
        document_id: &str,
        file_type: FileType,
        metadata: Metadata,
        extraction_timeout: Option<Duration>,
        embedding_timeout: Option<Duration>,
    ) -> Result<IngestResult, IngestError> {
        let started = Instant::now();
        let config = ChunkingConfig::from(&self.options);

        let (char_count, pieces) = run_blocking("extraction", extraction_timeout, move || {
            let text = extract_text(&bytes, file_type)?;
            Ok((text.chars().count(), split_text(&text, config)))
        })
        .await?;

        if pieces.is_empty() {
            return Err(IngestError::NoContent);
        }

        let embedder = Arc::clone(&self.embedder);
        let (pieces, vectors) = run_blocking("embedding", embedding_timeout, move || {
            let vectors = embedder.embed_batch(&pieces);
            Ok((pieces, vectors))
        })
        .await?;

        if vectors.len() != pieces.len() {
            return Err(IndexError::Corruption(format!(
                "{} vectors for {} chunks",
                vectors.len(),
                pieces.len()
            ))
            .into());
        }

        let chunk_count = pieces.len();
        let records: Vec<VectorRecord> = pieces
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(chunk_index, (content, vector))| {
                let mut chunk_metadata = metadata.clone();
                chunk_metadata.insert("chunk_index".to_string(), Value::from(chunk_index));

                let chunk = Chunk {
                    document_id: document_id.to_string(),
                    chunk_index,
                    content,
                    metadata: chunk_metadata,
                };
                VectorRecord::from_chunk(chunk, vector)
            })
            .collect();

        if let Err(error) = self.index.add_document(records).await {
            warn!(document_id, %error, "document rejected by the index");
            return Err(error.into());
        }

        info!(
            document_id,
            %file_type,
            chunk_count,
            char_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "document indexed"
        );

        Ok(IngestResult {
            document_id: document_id.to_string(),
            success: true,
            chunk_count,
            char_count,
            error: None,
        })
    }

    /// Ingests `bytes` for `document` and records the outcome on its status.
    /// Failures are reported in the returned result rather than as an error.
    pub async fn ingest_document(
        &self,
        document: &mut Document,
        bytes: Vec<u8>,
        mut metadata: Metadata,
    ) -> IngestResult {
        if let Err(error) = document.start_processing() {
            return IngestResult::failed(document.id.clone(), error.to_string());
        }

        metadata
            .entry("filename")
            .or_insert_with(|| Value::from(document.name.clone()));

        let document_id = document.id.clone();
        let outcome = self
            .ingest(bytes, &document_id, document.file_type, metadata)
            .await;

        match outcome {
            Ok(result) => {
                if let Err(error) = document.complete(result.chunk_count) {
                    warn!(document_id = %document_id, %error, "could not mark document completed");
                }
                result
            }
            Err(error) => {
                let reason = error.to_string();
                warn!(document_id = %document_id, %reason, "ingestion failed");
                if let Err(error) = document.fail(reason.clone()) {
                    warn!(document_id = %document_id, %error, "could not mark document failed");
                }
                IngestResult::failed(document_id, reason)
            }
        }
    }

    /// Ranked chunks for `query_text`. Any failure along the way yields an
    /// empty list.
    pub async fn query(
        &self,
        query_text: &str,
        document_ids: Option<&[String]>,
        top_k: usize,
    ) -> Vec<SearchHit> {
        if top_k == 0 {
            return Vec::new();
        }
        match self.embed_query(query_text).await {
            Some(vector) => self.index.search(&vector, document_ids, top_k).await,
            None => Vec::new(),
        }
    }

    /// Top-ranked chunk texts packed into a `max_tokens` budget, joined by a
    /// blank line. Always fetches `context_top_k` candidates regardless of the
    /// budget.
    pub async fn get_context(
        &self,
        query_text: &str,
        document_ids: Option<&[String]>,
        max_tokens: usize,
    ) -> String {
        let hits = self
            .query(query_text, document_ids, self.options.context_top_k)
            .await;
        assemble_context(&hits, self.options.context_char_budget(max_tokens))
    }

    /// Ranked results and the assembled context from a single query embedding.
    pub async fn search(
        &self,
        query_text: &str,
        document_ids: Option<&[String]>,
        top_k: usize,
        max_tokens: usize,
    ) -> SearchResponse {
        let Some(vector) = self.embed_query(query_text).await else {
            return SearchResponse {
                results: Vec::new(),
                context: String::new(),
            };
        };

        // one scan serves both: rankings are stable, so a shorter list is a prefix
        let context_top_k = self.options.context_top_k;
        let mut candidates = self
            .index
            .search(&vector, document_ids, top_k.max(context_top_k))
            .await;

        let context_hits = &candidates[..context_top_k.min(candidates.len())];
        let context = assemble_context(context_hits, self.options.context_char_budget(max_tokens));
        candidates.truncate(top_k);

        SearchResponse {
            results: candidates,
            context,
        }
    }

    pub async fn delete_document(&self, document_id: &str) -> usize {
        self.index.delete_document(document_id).await
    }

    pub async fn document_chunk_count(&self, document_id: &str) -> usize {
        self.index.document_chunk_count(document_id).await
    }

    pub async fn indexed_records(&self) -> usize {
        self.index.len().await
    }

    async fn embed_query(&self, query_text: &str) -> Option<Vec<f32>> {
        let query_text = query_text.trim();
        if query_text.is_empty() {
            return None;
        }

        let embedder = Arc::clone(&self.embedder);
        let text = query_text.to_string();
        let embedded = run_blocking("query embedding", self.options.embedding_timeout(), move || {
            Ok(embedder.embed(&text))
        })
        .await;

        match embedded {
            Ok(vector) => Some(vector),
            Err(error) => {
                warn!(%error, "query embedding failed, returning no results");
                None
            }
        }
    }
}

/// Greedily appends chunk texts in rank order until the next one would push
/// the result past `max_chars`. Separators count against the budget and no
/// chunk is ever cut.
pub fn assemble_context(hits: &[SearchHit], max_chars: usize) -> String {
    let separator_chars = CONTEXT_SEPARATOR.chars().count();
    let mut parts: Vec<&str> = Vec::new();
    let mut total = 0usize;

    for hit in hits {
        let separator = if parts.is_empty() { 0 } else { separator_chars };
        let cost = separator + hit.content.chars().count();
        if total + cost > max_chars {
            break;
        }
        parts.push(&hit.content);
        total += cost;
    }

    debug!(chunks = parts.len(), chars = total, budget = max_chars, "context assembled");
    parts.join(CONTEXT_SEPARATOR)
}

/// Runs CPU-bound work off the async executor, optionally bounded in time.
/// On timeout the worker's result is discarded.
async fn run_blocking<T, F>(
    stage: &'static str,
    timeout: Option<Duration>,
    work: F,
) -> Result<T, IngestError>
where
    F: FnOnce() -> Result<T, IngestError> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    let joined = match timeout {
        Some(after) => tokio::time::timeout(after, handle)
            .await
            .map_err(|_| IngestError::Timeout { stage, after })?,
        None => handle.await,
    };

    joined.map_err(|error| IngestError::Task(error.to_string()))?
}
