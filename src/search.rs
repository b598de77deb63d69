//! Query orchestration and CLI search output.
//!
//! [`query`] is the engine's query boundary: it validates the request,
//! embeds the query once under the provider timeout, runs the core
//! [`hybrid_search`], and trims returned content. The HTTP server and the
//! `srag search` command both call it.

use anyhow::Result as AnyResult;
use serde::Deserialize;
use tracing::debug;

use secure_rag_core::embedding::EmbeddingProvider;
use secure_rag_core::error::{Result, RetrievalError};
use secure_rag_core::fusion::FusionWeights;
use secure_rag_core::instance::IndexInstance;
use secure_rag_core::models::SearchHit;
use secure_rag_core::search::{hybrid_search, QueryPhase, SearchParams};

use crate::config::{Config, RetrievalConfig};
use crate::embedding::{create_provider, embed_query};
use crate::store::InstanceStore;

/// A query as received from a caller.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Signed so that `0` and negative values reach validation.
    pub k: i64,
    #[serde(default)]
    pub source_filter: Option<String>,
}

/// Per-process retrieval settings, validated once.
#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub overfetch_factor: usize,
    pub weights: FusionWeights,
    pub max_content_chars: usize,
}

impl QuerySettings {
    pub fn from_config(retrieval: &RetrievalConfig) -> Result<Self> {
        Ok(Self {
            overfetch_factor: retrieval.overfetch_factor,
            weights: retrieval.weights()?,
            max_content_chars: retrieval.max_content_chars,
        })
    }
}

/// Run one hybrid query.
///
/// # Errors
///
/// - [`RetrievalError::InvalidQuery`] if `k <= 0`.
/// - [`RetrievalError::Configuration`] if the provider does not match the
///   embedding model the collection was built with.
/// - [`RetrievalError::Transient`] if embedding the query fails or times out.
///
/// An empty collection yields an empty list without calling the
/// embedding provider. So does a blank (empty or whitespace-only) query,
/// even against a collection that has documents.
pub async fn query(
    instance: &IndexInstance,
    provider: &dyn EmbeddingProvider,
    request: &QueryRequest,
    settings: &QuerySettings,
) -> Result<Vec<SearchHit>> {
    debug!(phase = %QueryPhase::Idle, collection = instance.name(), k = request.k);
    if request.k <= 0 {
        return Err(RetrievalError::InvalidQuery(format!(
            "k must be >= 1, got {}",
            request.k
        )));
    }
    let params = SearchParams::new(
        request.k as usize,
        settings.overfetch_factor,
        settings.weights,
    )?
    .with_source_filter(request.source_filter.clone());

    if instance.is_empty() || request.query.trim().is_empty() {
        debug!(phase = %QueryPhase::Done, hits = 0);
        return Ok(Vec::new());
    }

    instance
        .vectors()
        .check_compatible(provider.model_name(), provider.dims())?;

    debug!(phase = %QueryPhase::Embedding, model = provider.model_name());
    let query_vec = embed_query(provider, &request.query).await?;

    let mut hits = hybrid_search(instance, &request.query, &query_vec, &params)?;
    for hit in &mut hits {
        hit.content = truncate_chars(&hit.content, settings.max_content_chars);
    }
    debug!(phase = %QueryPhase::Done, hits = hits.len());
    Ok(hits)
}

/// First `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// `srag search`: query a collection and print the results.
pub async fn run_search(
    config: &Config,
    query_text: &str,
    k: Option<i64>,
    source_filter: Option<String>,
    collection: &str,
    json: bool,
) -> AnyResult<()> {
    let store = InstanceStore::new(&config.storage.base_dir);
    let instance = store.open_instance(collection)?;
    let provider = create_provider(&config.embedding)?;
    let settings = QuerySettings::from_config(&config.retrieval)?;

    let request = QueryRequest {
        query: query_text.to_string(),
        k: k.unwrap_or(config.retrieval.default_k as i64),
        source_filter,
    };
    let hits = query(&instance, provider.as_ref(), &request, &settings).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let date = chrono::DateTime::from_timestamp(hit.ingested_at, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        println!(
            "{}. [{:.2}] {} #{}",
            i + 1,
            hit.score,
            hit.source,
            hit.chunk_index
        );
        println!(
            "    vector: {:.3}  lexical: {:.3}",
            hit.vector_score, hit.lexical_score
        );
        println!("    ingested: {}", date);
        println!("    excerpt: \"{}\"", hit.content.replace('\n', " ").trim());
        println!();
    }

    Ok(())
}
