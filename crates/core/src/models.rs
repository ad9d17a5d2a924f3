use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Arbitrary key-value metadata carried by every chunk.
pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Text,
    Markdown,
    Csv,
    Json,
    Pdf,
    Docx,
}

impl FileType {
    /// Maps a declared type tag (`txt`, `md`, `pdf`, ...) to a file type.
    /// Unknown tags are read as plain text.
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.trim().trim_start_matches('.').to_ascii_lowercase();
        match tag.as_str() {
            "md" | "markdown" => Self::Markdown,
            "csv" => Self::Csv,
            "json" => Self::Json,
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            _ => Self::Text,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_tag)
            .unwrap_or(Self::Text)
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Markdown => "md",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A caller-owned document record. The engine only reads its identity and
/// drives its status; it never persists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub file_type: FileType,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        file_type: FileType,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            file_type,
            size_bytes,
            status: DocumentStatus::Pending,
            chunk_count: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn start_processing(&mut self) -> Result<(), IngestError> {
        self.transition(DocumentStatus::Pending, DocumentStatus::Processing)
    }

    pub fn complete(&mut self, chunk_count: usize) -> Result<(), IngestError> {
        self.transition(DocumentStatus::Processing, DocumentStatus::Completed)?;
        self.chunk_count = chunk_count;
        self.error = None;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), IngestError> {
        self.transition(DocumentStatus::Processing, DocumentStatus::Failed)?;
        self.chunk_count = 0;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Puts a finished document back to pending so it can be ingested again.
    /// The caller must delete its old records first.
    pub fn reset(&mut self) -> Result<(), IngestError> {
        if !self.status.is_terminal() {
            return Err(IngestError::InvalidTransition {
                from: self.status,
                to: DocumentStatus::Pending,
            });
        }
        self.status = DocumentStatus::Pending;
        self.chunk_count = 0;
        self.error = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn transition(
        &mut self,
        expected: DocumentStatus,
        next: DocumentStatus,
    ) -> Result<(), IngestError> {
        if self.status != expected {
            return Err(IngestError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub metadata: Metadata,
}

impl Chunk {
    pub fn chunk_id(&self) -> String {
        self.chunk_index.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub document_id: String,
    pub chunk_id: String,
}

impl RecordKey {
    pub fn new(document_id: impl Into<String>, chunk_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            chunk_id: chunk_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub document_id: String,
    pub chunk_id: String,
    pub embedding: Vec<f32>,
    pub content: String,
    pub metadata: Metadata,
}

impl VectorRecord {
    pub fn from_chunk(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.chunk_id(),
            document_id: chunk.document_id,
            embedding,
            content: chunk.content,
            metadata: chunk.metadata,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.document_id.clone(), self.chunk_id.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: String,
    pub chunk_id: String,
    pub chunk_index: u64,
    pub content: String,
    pub metadata: Metadata,
    pub score: f32,
}

impl SearchHit {
    pub fn from_record(record: &VectorRecord, score: f32) -> Self {
        let chunk_index = record
            .metadata
            .get("chunk_index")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        Self {
            document_id: record.document_id.clone(),
            chunk_id: record.chunk_id.clone(),
            chunk_index,
            content: record.content.clone(),
            metadata: record.metadata.clone(),
            score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestResult {
    pub document_id: String,
    pub success: bool,
    pub chunk_count: usize,
    pub char_count: usize,
    pub error: Option<String>,
}

impl IngestResult {
    pub fn failed(document_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            success: false,
            chunk_count: 0,
            char_count: 0,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_dimensions: usize,
    pub default_top_k: usize,
    pub context_top_k: usize,
    pub context_chars_per_token: usize,
    pub default_max_tokens: usize,
    pub extraction_timeout_secs: Option<u64>,
    pub embedding_timeout_secs: Option<u64>,
    pub model_dir: Option<String>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            embedding_dimensions: 384,
            default_top_k: 5,
            context_top_k: 10,
            context_chars_per_token: 4,
            default_max_tokens: 2_000,
            extraction_timeout_secs: None,
            embedding_timeout_secs: None,
            model_dir: None,
        }
    }
}

impl RetrievalOptions {
    /// Defaults overlaid with `RAG_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each `RAG_*`
    /// name. Malformed numbers are ignored with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        let number = |name: &str| lookup(name).and_then(|raw| parse_setting(name, &raw));

        if let Some(value) = number("RAG_CHUNK_SIZE") {
            options.chunk_size = value;
        }
        if let Some(value) = number("RAG_CHUNK_OVERLAP") {
            options.chunk_overlap = value;
        }
        if let Some(value) = number("RAG_EMBEDDING_DIM") {
            options.embedding_dimensions = value;
        }
        if let Some(value) = number("RAG_TIMEOUT_SECS") {
            options.extraction_timeout_secs = Some(value as u64);
            options.embedding_timeout_secs = Some(value as u64);
        }
        options.model_dir = lookup("RAG_MODEL_DIR")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        options
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.embedding_dimensions == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "embedding_dimensions must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn extraction_timeout(&self) -> Option<Duration> {
        self.extraction_timeout_secs.map(Duration::from_secs)
    }

    pub fn embedding_timeout(&self) -> Option<Duration> {
        self.embedding_timeout_secs.map(Duration::from_secs)
    }

    pub fn context_char_budget(&self, max_tokens: usize) -> usize {
        max_tokens.saturating_mul(self.context_chars_per_token)
    }
}

fn parse_setting(name: &str, raw: &str) -> Option<usize> {
    match raw.trim().parse::<usize>() {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(variable = name, value = %raw, %error, "ignoring malformed setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tags_fall_back_to_text() {
        assert_eq!(FileType::from_tag("md"), FileType::Markdown);
        assert_eq!(FileType::from_tag(".PDF"), FileType::Pdf);
        assert_eq!(FileType::from_tag("markdown"), FileType::Markdown);
        assert_eq!(FileType::from_tag("rtf"), FileType::Text);
        assert_eq!(FileType::from_path(Path::new("notes/a.docx")), FileType::Docx);
        assert_eq!(FileType::from_path(Path::new("README")), FileType::Text);
    }

    #[test]
    fn document_follows_ingestion_state_machine() -> Result<(), IngestError> {
        let mut document = Document::new("doc-1", "a.txt", FileType::Text, 12);
        assert_eq!(document.status, DocumentStatus::Pending);

        assert!(document.complete(3).is_err());

        document.start_processing()?;
        document.complete(3)?;
        assert_eq!(document.status, DocumentStatus::Completed);
        assert_eq!(document.chunk_count, 3);

        assert!(document.start_processing().is_err());
        assert!(document.fail("late").is_err());

        document.reset()?;
        document.start_processing()?;
        document.fail("empty")?;
        assert_eq!(document.status, DocumentStatus::Failed);
        assert_eq!(document.error.as_deref(), Some("empty"));
        Ok(())
    }

    #[test]
    fn hit_reads_chunk_index_from_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("chunk_index".to_string(), Value::from(4));
        let record = VectorRecord {
            document_id: "doc".to_string(),
            chunk_id: "4".to_string(),
            embedding: vec![1.0],
            content: "text".to_string(),
            metadata,
        };

        let hit = SearchHit::from_record(&record, 0.5);
        assert_eq!(hit.chunk_index, 4);
        assert_eq!(hit.score, 0.5);
    }

    #[test]
    fn settings_overlay_defaults() {
        let vars: std::collections::HashMap<&str, &str> = [
            ("RAG_CHUNK_SIZE", "800"),
            ("RAG_CHUNK_OVERLAP", " 80 "),
            ("RAG_EMBEDDING_DIM", "not-a-number"),
            ("RAG_TIMEOUT_SECS", "30"),
            ("RAG_MODEL_DIR", "/opt/models/minilm"),
        ]
        .into_iter()
        .collect();

        let options = RetrievalOptions::from_lookup(|name| vars.get(name).map(|value| value.to_string()));

        assert_eq!(options.chunk_size, 800);
        assert_eq!(options.chunk_overlap, 80);
        assert_eq!(options.embedding_dimensions, 384);
        assert_eq!(options.extraction_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(options.embedding_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(options.model_dir.as_deref(), Some("/opt/models/minilm"));
        assert_eq!(options.default_top_k, 5);
    }

    #[test]
    fn missing_or_blank_settings_keep_defaults() {
        let options = RetrievalOptions::from_lookup(|name| {
            (name == "RAG_MODEL_DIR").then(|| "   ".to_string())
        });

        assert_eq!(options.chunk_size, 500);
        assert_eq!(options.chunk_overlap, 50);
        assert_eq!(options.extraction_timeout(), None);
        assert_eq!(options.model_dir, None);
    }

    #[test]
    fn default_options_are_valid() {
        let options = RetrievalOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.context_char_budget(10), 40);

        let broken = RetrievalOptions {
            chunk_size: 0,
            ..RetrievalOptions::default()
        };
        assert!(matches!(
            broken.validate(),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }
}
