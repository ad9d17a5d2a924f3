use crate::embeddings::Embedder;
use crate::models::{Document, FileType, IngestResult, Metadata};
use crate::orchestrator::RetrievalService;
use crate::traits::VectorIndex;
use crate::IngestError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

const SUPPORTED_EXTENSIONS: [&str; 7] = ["txt", "md", "markdown", "csv", "json", "pdf", "docx"];

/// Supported documents under `folder`, recursively, sorted by path.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Stable document id derived from the path.
pub fn document_id_for_path(path: &Path) -> String {
    digest_bytes(path.to_string_lossy().as_bytes())
}

pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub documents: Vec<(Document, IngestResult)>,
    pub skipped: Vec<SkippedDocument>,
}

impl IngestionReport {
    pub fn chunk_count(&self) -> usize {
        self.documents
            .iter()
            .map(|(_, result)| result.chunk_count)
            .sum()
    }
}

/// Ingests each file on its own. A file that cannot be read or indexed is
/// reported in `skipped` and does not stop the others.
pub async fn ingest_paths<V, E>(
    service: &RetrievalService<V, E>,
    paths: &[PathBuf],
    metadata: &Metadata,
) -> IngestionReport
where
    V: VectorIndex,
    E: Embedder + 'static,
{
    let mut documents = Vec::new();
    let mut skipped = Vec::new();

    for path in paths {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unreadable file");
                skipped.push(SkippedDocument {
                    path: path.clone(),
                    reason: error.to_string(),
                });
                continue;
            }
        };

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        let mut document = Document::new(
            document_id_for_path(path),
            name,
            FileType::from_path(path),
            bytes.len() as u64,
        );

        let mut file_metadata = metadata.clone();
        file_metadata.insert("source_path".to_string(), Value::from(path.to_string_lossy().to_string()));
        file_metadata.insert("checksum".to_string(), Value::from(digest_bytes(&bytes)));

        let result = service
            .ingest_document(&mut document, bytes, file_metadata)
            .await;

        if result.success {
            documents.push((document, result));
        } else {
            skipped.push(SkippedDocument {
                path: path.clone(),
                reason: result.error.unwrap_or_default(),
            });
        }
    }

    IngestionReport { documents, skipped }
}

/// Discovers and ingests every supported file under `folder`.
pub async fn ingest_folder<V, E>(
    service: &RetrievalService<V, E>,
    folder: &Path,
) -> Result<IngestionReport, IngestError>
where
    V: VectorIndex,
    E: Embedder + 'static,
{
    let files = discover_documents(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no supported documents found in {}",
            folder.display()
        )));
    }

    Ok(ingest_paths(service, &files, &Metadata::new()).await)
}
