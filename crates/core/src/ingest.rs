use crate::chunking::{chunk_pages, ChunkingConfig};
use crate::context::RagContext;
use crate::extractor::{extract_page_texts, PageText};
use crate::models::{DocumentFingerprint, DuplicatePolicy, IngestionStage};
use crate::IngestError;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub run_id: Uuid,
    pub filename: String,
    pub page_count: usize,
    pub chunk_count: usize,
    pub entity_count: usize,
    pub extraction_failures: usize,
    pub replaced_existing: bool,
    pub stage: IngestionStage,
}

#[derive(Debug)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FolderReport {
    pub ingested: Vec<IngestionReport>,
    pub skipped_files: Vec<SkippedPdf>,
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_unstable();
    files
}

pub async fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn document_filename(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

pub async fn ingest_document(ctx: &RagContext, path: &Path) -> Result<IngestionReport, IngestError> {
    let filename = document_filename(path).map_err(|error| error.at(IngestionStage::Received))?;
    let checksum = digest_file(path)
        .await
        .map_err(|error| error.at(IngestionStage::Received))?;

    let pages = extract_page_texts(path, ctx.ocr.as_ref())
        .await
        .map_err(|error| error.at(IngestionStage::Parsed))?;

    let document = DocumentFingerprint {
        filename,
        source_path: path.to_string_lossy().to_string(),
        checksum,
        ingested_at: Utc::now(),
    };

    ingest_pages(ctx, document, &pages).await
}

pub async fn ingest_pages(
    ctx: &RagContext,
    document: DocumentFingerprint,
    pages: &[PageText],
) -> Result<IngestionReport, IngestError> {
    let run_id = Uuid::new_v4();
    let span = info_span!("ingest", %run_id, filename = %document.filename);

    async move {
        let result = run_stages(ctx, run_id, &document, pages).await;
        match &result {
            Ok(report) => info!(
                chunks = report.chunk_count,
                entities = report.entity_count,
                extraction_failures = report.extraction_failures,
                "document ingested"
            ),
            Err(failure) => error!(stage = ?failure.stage(), error = %failure, "ingestion failed"),
        }
        result
    }
    .instrument(span)
    .await
}

async fn run_stages(
    ctx: &RagContext,
    run_id: Uuid,
    document: &DocumentFingerprint,
    pages: &[PageText],
) -> Result<IngestionReport, IngestError> {
    let store = ctx.store.as_ref();
    let policy = ctx.ingestion.duplicate_policy;
    let filename = document.filename.as_str();

    let already_present = store
        .document_exists(filename)
        .await
        .map_err(|error| IngestError::from(error).at(IngestionStage::Received))?;
    if already_present {
        match policy {
            DuplicatePolicy::Reject => {
                return Err(IngestError::DuplicateDocument(filename.to_string())
                    .at(IngestionStage::Received));
            }
            DuplicatePolicy::Replace => warn!("document exists, its chunks will be replaced"),
            DuplicatePolicy::Append => warn!("document exists, appending a second chunk set"),
        }
    }

    let mut chunks = chunk_pages(pages, filename, ChunkingConfig::from(&ctx.ingestion))
        .map_err(|error| error.at(IngestionStage::Chunked))?;
    if chunks.is_empty() {
        return Err(IngestError::PdfParse(format!("{filename} has no extractable text"))
            .at(IngestionStage::Chunked));
    }
    debug!(pages = pages.len(), chunks = chunks.len(), "document chunked");

    let mut extraction_failures = 0;
    for chunk in &mut chunks {
        match ctx.entities.try_extract(&chunk.text).await {
            Ok(entities) => chunk.entities = entities.into_iter().collect(),
            Err(error) => {
                extraction_failures += 1;
                warn!(page = chunk.page_number, position = chunk.position, %error, "chunk keeps zero entities");
            }
        }
    }
    let entity_count = chunks
        .iter()
        .flat_map(|chunk| chunk.entities.iter())
        .collect::<BTreeSet<_>>()
        .len();
    debug!(entity_count, extraction_failures, "entities extracted");

    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
    let embeddings = ctx
        .embedder
        .embed_batch(&texts)
        .await
        .map_err(|error| IngestError::from(error).at(IngestionStage::Embedded))?;
    if embeddings.len() != chunks.len() {
        return Err(IngestError::InvalidArgument(format!(
            "{} embeddings returned for {} chunks",
            embeddings.len(),
            chunks.len()
        ))
        .at(IngestionStage::Embedded));
    }
    for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
        chunk.embedding = embedding;
    }

    let index = async {
        store.ensure_vector_index(ctx.embedder.dimensions()).await?;
        store.upsert_document(document).await?;
        store.write_chunks(filename, &chunks, policy).await
    };
    index
        .await
        .map_err(|error| IngestError::from(error).at(IngestionStage::Indexed))?;

    Ok(IngestionReport {
        run_id,
        filename: filename.to_string(),
        page_count: pages.len(),
        chunk_count: chunks.len(),
        entity_count,
        extraction_failures,
        replaced_existing: already_present && policy == DuplicatePolicy::Replace,
        stage: IngestionStage::Ingested,
    })
}

/// Upload entry point: ingests the file and removes it afterwards,
/// whether or not ingestion succeeded.
pub async fn process_and_ingest(ctx: &RagContext, path: &Path) -> Result<IngestionReport, IngestError> {
    let result = ingest_document(ctx, path).await;

    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed source file"),
        Err(cleanup) => warn!(path = %path.display(), error = %cleanup, "could not remove source file"),
    }

    result
}

pub async fn ingest_folder(ctx: &RagContext, folder: &Path) -> Result<FolderReport, IngestError> {
    let files = discover_pdf_files(folder);
    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    let mut report = FolderReport::default();
    for path in files {
        match ingest_document(ctx, &path).await {
            Ok(ingested) => report.ingested.push(ingested),
            Err(error) => report.skipped_files.push(SkippedPdf {
                path,
                reason: error.to_string(),
            }),
        }
    }

    Ok(report)
}
