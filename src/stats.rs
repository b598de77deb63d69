//! Collection statistics.
//!
//! Provides a quick summary of what a collection holds: document and chunk
//! counts, the embedding configuration it was built with, and a per-document
//! breakdown from the provenance ledger. Used by `srag stats`.

use anyhow::Result;

use crate::config::Config;
use crate::store::InstanceStore;

/// Run the stats command: load the collection and print a summary.
pub fn run_stats(config: &Config, collection: &str) -> Result<()> {
    let store = InstanceStore::new(&config.storage.base_dir);
    let instance = store.open_instance(collection)?;
    let size = store.disk_usage(collection)?;
    let vectors = instance.vectors();
    let lexical = instance.lexical();

    println!("Secure RAG — Collection Stats");
    println!("=============================");
    println!();
    println!("  Collection:  {}", instance.name());
    println!("  Directory:   {}", store.instance_dir(collection)?.display());
    println!("  Size:        {}", format_bytes(size));
    println!("  Generation:  {}", instance.generation());
    println!();
    println!("  Documents:   {}", instance.document_count());
    println!("  Chunks:      {}", instance.chunk_count());
    println!("  Model:       {}", vectors.model());
    println!("  Dimensions:  {}", vectors.dims());
    println!("  Metric:      {}", vectors.metric());
    println!(
        "  BM25:        k1={} b={} avgdl={:.1}",
        lexical.params().k1,
        lexical.params().b,
        lexical.avg_doc_len()
    );

    let entries = instance.ledger().entries();
    if !entries.is_empty() {
        println!();
        println!("  By document:");
        println!("  {:<40} {:>8}   {}", "DOCUMENT", "CHUNKS", "INGESTED");
        println!("  {}", "-".repeat(68));
        for e in entries {
            println!(
                "  {:<40} {:>8}   {}",
                e.document_id,
                e.chunk_count,
                format_ts_relative(e.ingested_at)
            );
        }
    }

    println!();
    Ok(())
}

/// `srag collections`: print collection names, one per line.
pub fn run_list_collections(config: &Config) -> Result<()> {
    let store = InstanceStore::new(&config.storage.base_dir);
    let names = store.list_instances()?;
    if names.is_empty() {
        println!("No collections in {}", store.base_dir().display());
        return Ok(());
    }
    for name in names {
        let marker = if name == config.storage.default_collection {
            " (default)"
        } else {
            ""
        };
        println!("{}{}", name, marker);
    }
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
