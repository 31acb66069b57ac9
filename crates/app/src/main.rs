use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use doc_qa_core::{
    answer_question, compare_pair, ingest_document, ingest_folder, list_documents,
    process_and_ingest, DuplicatePolicy, IngestionOptions, IngestionReport, LlmConfig,
    ModelEndpoints, Neo4jConfig, OcrConfig, QueryOptions, RagContext, ServiceConfig,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    models: ModelArgs,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Args)]
struct StoreArgs {
    /// Neo4j HTTP endpoint
    #[arg(long, env = "NEO4J_URI", default_value = "http://localhost:7474")]
    neo4j_uri: String,

    /// Neo4j database name
    #[arg(long, env = "NEO4J_DATABASE", default_value = "neo4j")]
    neo4j_database: String,

    /// Neo4j username
    #[arg(long, env = "NEO4J_USER", default_value = "neo4j")]
    neo4j_user: String,

    /// Neo4j password
    #[arg(long, env = "NEO4J_PASSWORD", hide_env_values = true)]
    neo4j_password: Option<String>,
}

#[derive(Args)]
struct ModelArgs {
    /// API key for the generative language model
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    #[arg(long, env = "LLM_MODEL", default_value = doc_qa_core::config::DEFAULT_LLM_MODEL)]
    llm_model: String,

    #[arg(long, env = "GEMINI_BASE_URL", default_value = doc_qa_core::config::DEFAULT_GEMINI_URL)]
    gemini_base_url: String,

    /// Sentence-embedding server; the model runs in-process when unset
    #[arg(long, env = "EMBEDDING_URL")]
    embedding_url: Option<String>,

    /// Cross-encoder server; the model runs in-process when unset
    #[arg(long, env = "RERANKER_URL")]
    reranker_url: Option<String>,

    #[arg(long, env = "EMBEDDING_DIMENSION", default_value_t = doc_qa_core::DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimension: usize,

    /// Where in-process models are downloaded and cached
    #[arg(long, env = "MODEL_CACHE_DIR")]
    model_cache_dir: Option<PathBuf>,

    /// OCR service used when a PDF has no text layer
    #[arg(long, env = "OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    #[arg(long, env = "OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,
}

#[derive(Args)]
struct TuningArgs {
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 1000)]
    chunk_size: usize,

    #[arg(long, env = "CHUNK_OVERLAP", default_value_t = 150)]
    chunk_overlap: usize,

    /// What to do when a filename is ingested twice: reject, replace or append
    #[arg(long, env = "DUPLICATE_POLICY", default_value = "replace")]
    duplicate_policy: DuplicatePolicy,

    /// Upper bound on unioned vector and graph candidates
    #[arg(long, env = "CANDIDATE_CEILING", default_value_t = 10)]
    candidate_ceiling: usize,

    #[arg(long, env = "VECTOR_TOP_K", default_value_t = 5)]
    vector_top_k: usize,

    #[arg(long, env = "VECTOR_OVERSAMPLE", default_value_t = 4)]
    vector_oversample: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a PDF file, or every PDF under a folder.
    Ingest {
        path: PathBuf,
        /// Delete the file after ingestion, as an upload handler would.
        #[arg(long, default_value_t = false)]
        consume: bool,
    },
    /// Ask a question about one ingested document.
    Ask {
        #[arg(long)]
        file: String,
        #[arg(long)]
        question: String,
        /// Number of re-ranked chunks passed to the model.
        #[arg(long, default_value_t = 3)]
        top_k: usize,
    },
    /// List ingested documents.
    List,
    /// Compare what two documents say about a topic.
    Compare {
        #[arg(long)]
        first: String,
        #[arg(long)]
        second: String,
        #[arg(long)]
        topic: String,
    },
}

impl Cli {
    fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        let ocr = match &self.models.ocr_endpoint {
            Some(endpoint) => Some(OcrConfig {
                endpoint: doc_qa_core::config::parse_url("OCR_ENDPOINT", endpoint)?,
                api_key: self.models.ocr_api_key.clone(),
            }),
            None => None,
        };

        Ok(ServiceConfig {
            neo4j: Neo4jConfig {
                uri: self.store.neo4j_uri.clone(),
                database: self.store.neo4j_database.clone(),
                username: self.store.neo4j_user.clone(),
                password: self.store.neo4j_password.clone(),
            },
            llm: LlmConfig {
                api_key: self.models.gemini_api_key.clone(),
                model: self.models.llm_model.clone(),
                base_url: self.models.gemini_base_url.clone(),
            },
            models: ModelEndpoints {
                embedding_url: self.models.embedding_url.clone(),
                reranker_url: self.models.reranker_url.clone(),
                embedding_dimension: self.models.embedding_dimension,
                model_cache_dir: self.models.model_cache_dir.clone(),
            },
            ocr,
            ingestion: IngestionOptions {
                chunk_size: self.tuning.chunk_size,
                chunk_overlap: self.tuning.chunk_overlap,
                duplicate_policy: self.tuning.duplicate_policy,
            },
            query: QueryOptions {
                candidate_ceiling: self.tuning.candidate_ceiling,
                vector_top_k: self.tuning.vector_top_k,
                vector_oversample: self.tuning.vector_oversample,
                ..QueryOptions::default()
            },
        })
    }
}

fn print_report(report: &IngestionReport) {
    println!(
        "{} ingested: pages={} chunks={} entities={} extraction_failures={}{}",
        report.filename,
        report.page_count,
        report.chunk_count,
        report.entity_count,
        report.extraction_failures,
        if report.replaced_existing { " (replaced)" } else { "" }
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.service_config()?;
    let ctx = RagContext::connect(&config)
        .await
        .context("failed to start the question answering service")?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "doc-qa boot"
    );

    match cli.command {
        Command::Ingest { path, consume } => {
            if path.is_dir() {
                let report = ingest_folder(&ctx, &path)
                    .await
                    .with_context(|| format!("failed to ingest {}", path.display()))?;

                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
                }
                for ingested in &report.ingested {
                    print_report(ingested);
                }
                println!(
                    "{} documents ingested, {} skipped at {}",
                    report.ingested.len(),
                    report.skipped_files.len(),
                    Utc::now().to_rfc3339()
                );
            } else {
                let report = if consume {
                    process_and_ingest(&ctx, &path).await
                } else {
                    ingest_document(&ctx, &path).await
                }
                .with_context(|| format!("failed to ingest {}", path.display()))?;
                print_report(&report);
            }
        }
        Command::Ask {
            file,
            question,
            top_k,
        } => {
            let answer = answer_question(&ctx, &question, &file, Some(top_k)).await?;
            println!("{answer}");
        }
        Command::List => {
            let documents = list_documents(&ctx).await?;
            if documents.is_empty() {
                println!("No documents are currently available.");
            }
            for filename in documents {
                println!("{filename}");
            }
        }
        Command::Compare {
            first,
            second,
            topic,
        } => {
            let comparison = compare_pair(&ctx, &first, &second, &topic).await?;
            println!("{comparison}");
        }
    }

    Ok(())
}
