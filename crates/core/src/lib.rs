pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod similarity;
pub mod stores;
pub mod traits;

pub use chunking::{normalize_whitespace, split_text, ChunkingConfig};
pub use embeddings::{
    hash_embedding, Embedder, EmbeddingModel, FallbackEmbedder, HashEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS, HASH_MODEL_ID,
};
pub use error::{EmbeddingError, ExtractionError, IndexError, IngestError};
pub use extractor::extract_text;
pub use ingest::{
    digest_bytes, discover_documents, document_id_for_path, ingest_folder, ingest_paths,
    IngestionReport, SkippedDocument,
};
pub use models::{
    Chunk, Document, DocumentStatus, FileType, IngestResult, Metadata, RecordKey,
    RetrievalOptions, SearchHit, SearchResponse, VectorRecord,
};
pub use orchestrator::{assemble_context, RetrievalService};
pub use similarity::cosine_similarity;
pub use stores::InMemoryVectorIndex;
pub use traits::VectorIndex;
