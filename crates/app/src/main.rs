use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use doc_retrieval_core::{
    discover_documents, ingest_paths, Embedder, FallbackEmbedder, InMemoryVectorIndex, Metadata,
    RetrievalOptions, RetrievalService,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Service = RetrievalService<InMemoryVectorIndex, FallbackEmbedder>;

#[derive(Parser)]
#[command(name = "doc-retrieval", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Maximum characters per chunk. Overrides RAG_CHUNK_SIZE.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Characters shared by consecutive chunks. Overrides RAG_CHUNK_OVERLAP.
    #[arg(long)]
    chunk_overlap: Option<usize>,

    /// Embedding vector length. Overrides RAG_EMBEDDING_DIM.
    #[arg(long)]
    embedding_dim: Option<usize>,

    /// Upper bound in seconds for extraction and for embedding. Overrides RAG_TIMEOUT_SECS.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Local directory holding the sentence embedding model. Overrides RAG_MODEL_DIR.
    #[arg(long)]
    model_dir: Option<String>,
}

#[derive(Args)]
struct Sources {
    /// Files or folders to ingest before answering. Folders are walked recursively.
    #[arg(long = "path", required = true)]
    paths: Vec<PathBuf>,

    /// Restrict results to these document ids. May be repeated.
    #[arg(long = "document-id")]
    document_ids: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest documents and list the chunks that best match a query.
    Search {
        #[command(flatten)]
        sources: Sources,
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of chunks to return. Defaults to 5.
        #[arg(long)]
        top_k: Option<usize>,
        /// Token budget for the assembled context. Defaults to 2000.
        #[arg(long)]
        max_tokens: Option<usize>,
        /// Print the response as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Ingest documents and print the context assembled for a query.
    Context {
        #[command(flatten)]
        sources: Sources,
        /// Search query
        #[arg(long)]
        query: String,
        /// Token budget for the assembled context. Defaults to 2000.
        #[arg(long)]
        max_tokens: Option<usize>,
    },
}

impl Cli {
    /// `RAG_*` settings from the environment, then any flags on top.
    fn options(&self) -> RetrievalOptions {
        let mut options = RetrievalOptions::from_env();

        if let Some(chunk_size) = self.chunk_size {
            options.chunk_size = chunk_size;
        }
        if let Some(chunk_overlap) = self.chunk_overlap {
            options.chunk_overlap = chunk_overlap;
        }
        if let Some(dimensions) = self.embedding_dim {
            options.embedding_dimensions = dimensions;
        }
        if let Some(secs) = self.timeout_secs {
            options.extraction_timeout_secs = Some(secs);
            options.embedding_timeout_secs = Some(secs);
        }
        if let Some(dir) = &self.model_dir {
            options.model_dir = Some(dir.clone());
        }

        options
    }
}

fn expand_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(discover_documents(path));
        } else {
            files.push(path.clone());
        }
    }
    files
}

async fn load_sources(service: &Service, sources: &Sources) -> anyhow::Result<()> {
    let files = expand_paths(&sources.paths);
    if files.is_empty() {
        anyhow::bail!("no supported documents found");
    }

    let report = ingest_paths(service, &files, &Metadata::new()).await;

    for skipped in &report.skipped {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
    }
    for (document, result) in &report.documents {
        info!(
            document_id = %document.id,
            name = %document.name,
            chunk_count = result.chunk_count,
            "document indexed"
        );
    }

    if report.documents.is_empty() {
        anyhow::bail!("all {} document(s) were skipped", report.skipped.len());
    }

    info!(
        documents = report.documents.len(),
        chunk_count = report.chunk_count(),
        model = service.embedder().model_id(),
        "ingestion finished"
    );
    Ok(())
}

fn scope(document_ids: &[String]) -> Option<&[String]> {
    if document_ids.is_empty() {
        None
    } else {
        Some(document_ids)
    }
}

fn display_source(metadata: &Metadata) -> String {
    metadata
        .get("source_path")
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let service = RetrievalService::in_memory(cli.options())?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "doc-retrieval boot"
    );

    match cli.command {
        Command::Search {
            sources,
            query,
            top_k,
            max_tokens,
            json,
        } => {
            load_sources(&service, &sources).await?;
            let top_k = top_k.unwrap_or(service.options().default_top_k);
            let max_tokens = max_tokens.unwrap_or(service.options().default_max_tokens);
            let response = service
                .search(&query, scope(&sources.document_ids), top_k, max_tokens)
                .await;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }

            println!("query: {query}");
            if response.results.is_empty() {
                println!("no matching chunks");
            }
            for hit in &response.results {
                println!(
                    "score={:.4} chunk={} document_id={}",
                    hit.score, hit.chunk_id, hit.document_id
                );
                let source = display_source(&hit.metadata);
                if !source.is_empty() {
                    println!("  source={source}");
                }
                println!("  chunk_text:\n{}", hit.content);
            }
        }
        Command::Context {
            sources,
            query,
            max_tokens,
        } => {
            load_sources(&service, &sources).await?;
            let max_tokens = max_tokens.unwrap_or(service.options().default_max_tokens);
            let context = service
                .get_context(&query, scope(&sources.document_ids), max_tokens)
                .await;
            println!("{context}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings() -> Result<(), Box<dyn std::error::Error>> {
        let cli = Cli::try_parse_from([
            "doc-retrieval",
            "--chunk-size",
            "300",
            "--timeout-secs",
            "5",
            "context",
            "--path",
            "notes",
            "--query",
            "pumps",
        ])?;

        let options = cli.options();
        assert_eq!(options.chunk_size, 300);
        assert_eq!(options.extraction_timeout_secs, Some(5));
        assert_eq!(options.embedding_timeout_secs, Some(5));
        Ok(())
    }
}
