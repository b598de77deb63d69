use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use secure_rag::config::{load_config, Config};
use secure_rag::embedding::create_provider;
use secure_rag::ingest::{add_document, ensure_index_current};
use secure_rag::search::{query, QueryRequest, QuerySettings};
use secure_rag::store::{InstanceStore, LEDGER_FILE, VECTOR_FILE};
use secure_rag_core::embedding::{EmbeddingProvider, HashProvider};
use secure_rag_core::error::{Result, RetrievalError};

const COLLECTION: &str = "lore";

const ALPHA: &str = "Starlight ponies gallop across silver meadows at dawn.";
const BETA: &str = "Raspberry hooves leave crimson prints beside the orchard gate.";
const GAMMA: &str = "Thunder clouds gather above granite mountains every winter.";

fn setup(docs: &[(&str, &str)]) -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let docs_dir = root.join("documents");
    fs::create_dir_all(&docs_dir).unwrap();
    for (name, text) in docs {
        fs::write(docs_dir.join(name), text).unwrap();
    }

    let config_path = root.join("srag.toml");
    fs::write(
        &config_path,
        format!(
            r#"[storage]
base_dir = "{root}/dbs"
default_collection = "{COLLECTION}"

[documents]
path = "{root}/documents"

[embedding]
provider = "hash"
dims = 64
"#,
            root = root.display()
        ),
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    (tmp, config)
}

fn docs_dir(config: &Config) -> PathBuf {
    config.documents.path.clone()
}

fn store(config: &Config) -> InstanceStore {
    InstanceStore::new(&config.storage.base_dir)
}

fn request(text: &str, k: i64) -> QueryRequest {
    QueryRequest {
        query: text.to_string(),
        k,
        source_filter: None,
    }
}

fn settings(config: &Config) -> QuerySettings {
    QuerySettings::from_config(&config.retrieval).unwrap()
}

/// Same model identity as `HashProvider::new(64)`, but every call fails.
struct FailingProvider;

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    fn model_name(&self) -> &str {
        "hash-64"
    }
    fn dims(&self) -> usize {
        64
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RetrievalError::Transient("embedding service unreachable".into()))
    }
}

#[tokio::test]
async fn test_ingest_then_query_returns_matching_document_first() {
    let (_tmp, config) = setup(&[("alpha.md", ALPHA), ("beta.md", BETA), ("gamma.md", GAMMA)]);
    let provider = create_provider(&config.embedding).unwrap();

    let report = ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.added, 3);
    assert_eq!(report.chunks_added, 3);

    let instance = store(&config).open_instance(COLLECTION).unwrap();
    let hits = query(&instance, provider.as_ref(), &request(BETA, 1), &settings(&config))
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, "beta.md");
    assert_eq!(hits[0].chunk_index, 0);
    assert!(hits[0].score > 0.9, "score was {}", hits[0].score);
    assert!((hits[0].lexical_score - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let (_tmp, config) = setup(&[("A.md", ALPHA)]);
    let provider = create_provider(&config.embedding).unwrap();

    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();
    let before = store(&config).open_instance(COLLECTION).unwrap();

    let report = ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();
    assert_eq!(report.added, 0);
    assert_eq!(report.skipped, 1);

    let after = store(&config).open_instance(COLLECTION).unwrap();
    assert_eq!(after.ledger().len(), 1);
    assert!(after.ledger().contains("A.md"));
    assert_eq!(after.chunk_count(), before.chunk_count());
    assert_eq!(after.generation(), before.generation());
}

#[tokio::test]
async fn test_changed_document_is_skipped_and_reported() {
    let (_tmp, config) = setup(&[("A.md", ALPHA)]);
    let provider = create_provider(&config.embedding).unwrap();

    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();
    fs::write(docs_dir(&config).join("A.md"), "Entirely rewritten text.").unwrap();

    let report = ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.changed_but_skipped, 1);
    assert_eq!(report.added, 0);

    let instance = store(&config).open_instance(COLLECTION).unwrap();
    let hits = query(&instance, provider.as_ref(), &request(ALPHA, 1), &settings(&config))
        .await
        .unwrap();
    assert_eq!(hits[0].content, ALPHA);
}

#[tokio::test]
async fn test_query_is_deterministic() {
    let (_tmp, config) = setup(&[("alpha.md", ALPHA), ("beta.md", BETA), ("gamma.md", GAMMA)]);
    let provider = create_provider(&config.embedding).unwrap();
    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();

    let instance = store(&config).open_instance(COLLECTION).unwrap();
    let req = request("silver hooves in winter", 3);
    let first = query(&instance, provider.as_ref(), &req, &settings(&config))
        .await
        .unwrap();
    let reloaded = store(&config).open_instance(COLLECTION).unwrap();
    let second = query(&reloaded, provider.as_ref(), &req, &settings(&config))
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_k_larger_than_corpus_returns_every_chunk_ranked() {
    let (_tmp, config) = setup(&[("alpha.md", ALPHA), ("beta.md", BETA), ("gamma.md", GAMMA)]);
    let provider = create_provider(&config.embedding).unwrap();
    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();

    let instance = store(&config).open_instance(COLLECTION).unwrap();
    let hits = query(&instance, provider.as_ref(), &request("orchard", 5), &settings(&config))
        .await
        .unwrap();

    assert_eq!(hits.len(), 3);
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for hit in &hits {
        assert!((0.0..=1.0).contains(&hit.score));
    }
}

#[tokio::test]
async fn test_source_filter_restricts_results() {
    let (_tmp, config) = setup(&[("alpha.md", ALPHA), ("beta.md", BETA)]);
    let provider = create_provider(&config.embedding).unwrap();
    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();

    let instance = store(&config).open_instance(COLLECTION).unwrap();
    let mut req = request(BETA, 5);
    req.source_filter = Some("alpha.md".to_string());
    let hits = query(&instance, provider.as_ref(), &req, &settings(&config))
        .await
        .unwrap();

    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.source == "alpha.md"));
}

#[tokio::test]
async fn test_empty_corpus_returns_no_hits() {
    let (_tmp, config) = setup(&[]);
    let provider = create_provider(&config.embedding).unwrap();

    let report = ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();
    assert_eq!(report.scanned, 0);

    let instance = store(&config)
        .open_or_create(
            COLLECTION,
            &secure_rag::ingest::index_settings(&config, provider.as_ref()).unwrap(),
        )
        .unwrap();
    let hits = query(&instance, provider.as_ref(), &request("anything", 3), &settings(&config))
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_non_positive_k_is_rejected() {
    let (_tmp, config) = setup(&[("alpha.md", ALPHA)]);
    let provider = create_provider(&config.embedding).unwrap();
    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();
    let instance = store(&config).open_instance(COLLECTION).unwrap();

    for k in [0, -1] {
        let err = query(&instance, provider.as_ref(), &request("ponies", k), &settings(&config))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidQuery(_)), "k={}: {:?}", k, err);
    }
}

#[tokio::test]
async fn test_query_with_mismatched_model_is_configuration_error() {
    let (_tmp, config) = setup(&[("alpha.md", ALPHA)]);
    let provider = create_provider(&config.embedding).unwrap();
    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();
    let instance = store(&config).open_instance(COLLECTION).unwrap();

    let other = HashProvider::new(32);
    let err = query(&instance, &other, &request("ponies", 1), &settings(&config))
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::Configuration(_)));
}

#[tokio::test]
async fn test_corrupted_ledger_fails_to_open() {
    let (_tmp, config) = setup(&[("alpha.md", ALPHA)]);
    let provider = create_provider(&config.embedding).unwrap();
    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();

    let dir = store(&config).generation_dir(COLLECTION).unwrap();
    fs::write(dir.join(LEDGER_FILE), "{ not json").unwrap();

    let err = store(&config).open_instance(COLLECTION).unwrap_err();
    assert!(matches!(err, RetrievalError::Corrupted(_)), "{:?}", err);
}

#[tokio::test]
async fn test_missing_vector_artifact_fails_to_open() {
    let (_tmp, config) = setup(&[("alpha.md", ALPHA)]);
    let provider = create_provider(&config.embedding).unwrap();
    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();

    let dir = store(&config).generation_dir(COLLECTION).unwrap();
    fs::remove_file(dir.join(VECTOR_FILE)).unwrap();

    let err = store(&config).open_instance(COLLECTION).unwrap_err();
    assert!(matches!(err, RetrievalError::Corrupted(_)), "{:?}", err);
}

#[tokio::test]
async fn test_failed_embedding_leaves_ledger_untouched() {
    let (_tmp, config) = setup(&[("alpha.md", ALPHA)]);
    let provider = create_provider(&config.embedding).unwrap();
    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();

    let extra = docs_dir(&config).join("beta.md");
    fs::write(&extra, BETA).unwrap();
    let err = add_document(&config, &FailingProvider, COLLECTION, &extra)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let instance = store(&config).open_instance(COLLECTION).unwrap();
    assert_eq!(instance.ledger().len(), 1);
    assert!(!instance.ledger().contains("beta.md"));
    assert_eq!(instance.chunk_count(), 1);

    // A retry with a working provider picks the document up.
    let report = add_document(&config, provider.as_ref(), COLLECTION, &extra)
        .await
        .unwrap();
    assert_eq!(report.added, 1);
}

#[tokio::test]
async fn test_rebuild_picks_up_changed_and_removed_documents() {
    let (_tmp, config) = setup(&[("A.md", ALPHA), ("B.md", BETA)]);
    let provider = create_provider(&config.embedding).unwrap();
    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();
    let before = store(&config).open_instance(COLLECTION).unwrap().generation();

    fs::write(docs_dir(&config).join("A.md"), GAMMA).unwrap();
    fs::remove_file(docs_dir(&config).join("B.md")).unwrap();

    let report = ensure_index_current(&config, provider.as_ref(), COLLECTION, true)
        .await
        .unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.added, 1);
    assert_eq!(report.chunks_added, 1);

    let instance = store(&config).open_instance(COLLECTION).unwrap();
    assert!(instance.generation() > before);
    assert_eq!(instance.ledger().len(), 1);
    assert!(!instance.ledger().contains("B.md"));

    let hits = query(&instance, provider.as_ref(), &request(GAMMA, 3), &settings(&config))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content, GAMMA);
    assert_eq!(hits[0].source, "A.md");

    // Afterwards the ledger matches the documents again.
    let report = ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.changed_but_skipped, 0);
}

#[tokio::test]
async fn test_rebuild_replaces_unreadable_collection() {
    let (_tmp, config) = setup(&[("A.md", ALPHA)]);
    let provider = create_provider(&config.embedding).unwrap();
    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();
    let gen_dir = store(&config).generation_dir(COLLECTION).unwrap();
    fs::write(gen_dir.join(VECTOR_FILE), "{ not json").unwrap();

    ensure_index_current(&config, provider.as_ref(), COLLECTION, true)
        .await
        .unwrap();
    let instance = store(&config).open_instance(COLLECTION).unwrap();
    assert!(instance.ledger().contains("A.md"));
}

#[tokio::test]
async fn test_failed_rebuild_keeps_committed_collection() {
    let (_tmp, config) = setup(&[("A.md", ALPHA)]);
    let provider = create_provider(&config.embedding).unwrap();
    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();
    fs::write(docs_dir(&config).join("A.md"), BETA).unwrap();

    let err = ensure_index_current(&config, &FailingProvider, COLLECTION, true)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let instance = store(&config).open_instance(COLLECTION).unwrap();
    let hits = query(&instance, provider.as_ref(), &request(ALPHA, 1), &settings(&config))
        .await
        .unwrap();
    assert_eq!(hits[0].content, ALPHA);
}

#[tokio::test]
async fn test_interrupted_commit_keeps_previous_documents() {
    let (_tmp, config) = setup(&[("A.md", ALPHA)]);
    let provider = create_provider(&config.embedding).unwrap();
    ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();

    // Simulate a process that died while writing the next generation: a
    // staged directory holding a newer ledger but no indexes.
    let committed = store(&config).generation_dir(COLLECTION).unwrap();
    let staged = committed
        .parent()
        .unwrap()
        .join("gen-99999999-interrupted");
    fs::create_dir(&staged).unwrap();
    fs::copy(committed.join(LEDGER_FILE), staged.join(LEDGER_FILE)).unwrap();

    let instance = store(&config).open_instance(COLLECTION).unwrap();
    assert_eq!(instance.ledger().len(), 1);
    let hits = query(&instance, provider.as_ref(), &request(ALPHA, 1), &settings(&config))
        .await
        .unwrap();
    assert_eq!(hits[0].content, ALPHA);

    fs::write(docs_dir(&config).join("B.md"), BETA).unwrap();
    let report = ensure_index_current(&config, provider.as_ref(), COLLECTION, false)
        .await
        .unwrap();
    assert_eq!(report.added, 1);
    assert!(!staged.exists());
    assert_eq!(store(&config).open_instance(COLLECTION).unwrap().ledger().len(), 2);
}

#[tokio::test]
async fn test_add_document_uses_file_name_identity() {
    let (tmp, config) = setup(&[]);
    let provider = create_provider(&config.embedding).unwrap();

    let outside: &Path = tmp.path();
    let file = outside.join("notes.md");
    fs::write(&file, GAMMA).unwrap();

    let report = add_document(&config, provider.as_ref(), COLLECTION, &file)
        .await
        .unwrap();
    assert_eq!(report.added, 1);

    let again = add_document(&config, provider.as_ref(), COLLECTION, &file)
        .await
        .unwrap();
    assert_eq!(again.skipped, 1);

    let instance = store(&config).open_instance(COLLECTION).unwrap();
    assert!(instance.ledger().contains("notes.md"));
}
