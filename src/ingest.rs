//! Ingestion workflow.
//!
//! Brings a collection up to date with the documents directory:
//! scan → ledger check → chunk → embed → append → commit. Each document is
//! committed on its own, so an interrupted run keeps everything committed
//! before the failure and a rerun picks up where it stopped.
//!
//! The provenance ledger makes ingestion idempotent: a document whose
//! identity is already recorded is skipped, even if its content changed.
//! A changed-but-skipped document is reported and logged so the operator
//! can decide to rebuild the collection.
//!
//! A rebuild re-reads every document, builds both indexes and the ledger
//! from scratch in memory, and commits them as one new generation. Until
//! that commit the previous state stays current, so a failed rebuild
//! changes nothing.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use secure_rag_core::chunk::{chunk_text, ChunkParams};
use secure_rag_core::embedding::EmbeddingProvider;
use secure_rag_core::error::{Result, RetrievalError};
use secure_rag_core::instance::IndexInstance;
use secure_rag_core::ledger::{LedgerEntry, ProvenanceLedger};
use secure_rag_core::lexical::LexicalIndex;
use secure_rag_core::models::{Chunk, Document};
use secure_rag_core::vector::{embed_chunks, VectorIndex};

use crate::config::Config;
use crate::connector_fs;
use crate::store::{IndexSettings, InstanceStore};

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Documents found by the scan.
    pub scanned: usize,
    /// Documents newly added to the collection.
    pub added: usize,
    /// Documents already recorded in the ledger.
    pub skipped: usize,
    /// Subset of `skipped` whose content differs from the recorded hash.
    pub changed_but_skipped: usize,
    /// Chunks appended across all added documents.
    pub chunks_added: usize,
}

/// Settings a new collection is created with, taken from config and the
/// active provider.
pub fn index_settings(config: &Config, provider: &dyn EmbeddingProvider) -> Result<IndexSettings> {
    Ok(IndexSettings {
        model: provider.model_name().to_string(),
        dims: provider.dims(),
        metric: config.retrieval.metric,
        bm25: config.retrieval.bm25()?,
    })
}

/// Ingest every new document under `documents.path` into `collection`,
/// creating the collection if needed.
///
/// With `rebuild`, the collection is replaced by a fresh index of every
/// scanned document, so changed documents are re-embedded and documents
/// no longer on disk drop out.
pub async fn ensure_index_current(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    collection: &str,
    rebuild: bool,
) -> Result<IngestReport> {
    let docs = connector_fs::scan_documents(
        &config.documents.path,
        &config.documents.include_globs,
        &config.documents.exclude_globs,
    )?;
    info!(
        collection,
        root = %config.documents.path.display(),
        documents = docs.len(),
        rebuild,
        "ingest started"
    );
    if rebuild {
        rebuild_collection(config, provider, collection, docs).await
    } else {
        ingest_into(config, provider, collection, docs).await
    }
}

/// Add a single file to `collection`. Its identity is the file name.
pub async fn add_document(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    collection: &str,
    path: &Path,
) -> Result<IngestReport> {
    let doc = connector_fs::load_single_document(path)?;
    ingest_into(config, provider, collection, vec![doc]).await
}

async fn ingest_into(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    collection: &str,
    docs: Vec<Document>,
) -> Result<IngestReport> {
    let store = InstanceStore::new(&config.storage.base_dir);
    let params = config.chunking.params()?;
    let mut report = IngestReport {
        scanned: docs.len(),
        ..IngestReport::default()
    };

    let mut instance = store.open_or_create(collection, &index_settings(config, provider)?)?;
    instance
        .vectors()
        .check_compatible(provider.model_name(), provider.dims())?;

    let pending = partition_pending(&instance, docs, &mut report);
    if pending.is_empty() {
        info!(collection, skipped = report.skipped, "collection already current");
        return Ok(report);
    }

    for doc in &pending {
        let added = ingest_one(
            &store,
            &mut instance,
            provider,
            doc,
            &params,
            config.embedding.batch_size,
        )
        .await?;
        report.added += 1;
        report.chunks_added += added;
    }

    info!(
        collection,
        added = report.added,
        chunks = report.chunks_added,
        skipped = report.skipped,
        "ingest finished"
    );
    Ok(report)
}

async fn rebuild_collection(
    config: &Config,
    provider: &dyn EmbeddingProvider,
    collection: &str,
    docs: Vec<Document>,
) -> Result<IngestReport> {
    let store = InstanceStore::new(&config.storage.base_dir);
    let params = config.chunking.params()?;
    let settings = index_settings(config, provider)?;

    // The replaced generation may be unreadable; a rebuild is how it gets fixed.
    let generation = match store.open_instance(collection) {
        Ok(previous) => previous.generation() + 1,
        Err(RetrievalError::Configuration(_)) if !store.exists(collection) => 0,
        Err(e) => {
            warn!(collection, error = %e, "replacing a collection that failed to load");
            0
        }
    };

    let chunked: Vec<(Document, Vec<Chunk>)> = docs
        .into_iter()
        .map(|doc| {
            let chunks = chunk_text(&doc.id, &doc.text, &params);
            (doc, chunks)
        })
        .collect();
    let all_chunks: Vec<Chunk> = chunked
        .iter()
        .flat_map(|(_, chunks)| chunks.iter().cloned())
        .collect();

    let vectors = VectorIndex::build(
        provider,
        settings.metric,
        &chunked,
        config.embedding.batch_size,
    )
    .await?;
    let lexical = LexicalIndex::build(settings.bm25, &all_chunks);
    let mut ledger = ProvenanceLedger::new();
    for (doc, chunks) in &chunked {
        ledger.record(LedgerEntry {
            document_id: doc.id.clone(),
            content_hash: doc.content_hash.clone(),
            chunk_count: chunks.len() as u32,
            ingested_at: doc.ingested_at,
        })?;
    }

    let instance = IndexInstance::from_parts(collection, generation, vectors, lexical, ledger)?;
    store.commit(&instance)?;

    let report = IngestReport {
        scanned: chunked.len(),
        added: chunked.len(),
        chunks_added: all_chunks.len(),
        ..IngestReport::default()
    };
    info!(
        collection,
        documents = report.added,
        chunks = report.chunks_added,
        generation,
        "rebuild finished"
    );
    Ok(report)
}

/// Split `docs` into those not yet in the ledger, counting the rest.
fn partition_pending(
    instance: &IndexInstance,
    docs: Vec<Document>,
    report: &mut IngestReport,
) -> Vec<Document> {
    let ledger = instance.ledger();
    let mut pending = Vec::new();
    for doc in docs {
        match ledger.get(&doc.id) {
            Some(entry) => {
                report.skipped += 1;
                if entry.content_hash != doc.content_hash {
                    report.changed_but_skipped += 1;
                    warn!(
                        document = %doc.id,
                        "document changed since it was ingested; skipping (rebuild the collection to pick up changes)"
                    );
                } else {
                    debug!(document = %doc.id, "already ingested");
                }
            }
            None => pending.push(doc),
        }
    }
    pending
}

async fn ingest_one(
    store: &InstanceStore,
    instance: &mut IndexInstance,
    provider: &dyn EmbeddingProvider,
    doc: &Document,
    params: &ChunkParams,
    batch_size: usize,
) -> Result<usize> {
    let chunks = chunk_text(&doc.id, &doc.text, params);
    let entries = embed_chunks(provider, doc, &chunks, batch_size).await?;
    let record = store.commit_document(instance, doc, entries)?;
    debug!(
        document = %doc.id,
        chunks = record.chunk_count,
        generation = instance.generation(),
        "document committed"
    );
    Ok(record.chunk_count as usize)
}

/// Print a report the way the CLI shows it.
pub fn print_report(collection: &str, report: &IngestReport) {
    println!("ingest {}", collection);
    println!("  documents scanned: {}", report.scanned);
    println!("  documents added: {}", report.added);
    println!("  documents skipped: {}", report.skipped);
    if report.changed_but_skipped > 0 {
        println!(
            "  changed but skipped: {} (already in ledger)",
            report.changed_but_skipped
        );
    }
    println!("  chunks added: {}", report.chunks_added);
    println!("ok");
}
