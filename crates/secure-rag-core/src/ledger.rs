//! Provenance ledger: which documents an instance already holds.
//!
//! The ledger enforces at-most-once ingestion per document identity. It is
//! append-only from the engine's point of view; removing entries is an
//! operator action outside this crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Ingestion record for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub document_id: String,
    /// Content hash at the time of ingestion.
    pub content_hash: String,
    /// Number of chunks the document contributed.
    pub chunk_count: u32,
    pub ingested_at: i64,
}

/// Ordered list of ingested documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceLedger {
    entries: Vec<LedgerEntry>,
    /// Document id -> position in `entries`.
    by_id: HashMap<String, usize>,
}

impl ProvenanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a ledger, rejecting duplicate identities.
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Result<Self> {
        let mut ledger = Self::new();
        for entry in entries {
            if ledger.contains(&entry.document_id) {
                return Err(RetrievalError::Corrupted(format!(
                    "ledger lists document '{}' more than once",
                    entry.document_id
                )));
            }
            ledger.push(entry);
        }
        Ok(ledger)
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.by_id.contains_key(document_id)
    }

    pub fn get(&self, document_id: &str) -> Option<&LedgerEntry> {
        self.by_id.get(document_id).map(|&i| &self.entries[i])
    }

    /// Append a record. Recording an identity twice is a caller bug and
    /// returns [`RetrievalError::Configuration`].
    pub fn record(&mut self, entry: LedgerEntry) -> Result<()> {
        if self.contains(&entry.document_id) {
            return Err(RetrievalError::Configuration(format!(
                "document '{}' is already recorded in the ledger",
                entry.document_id
            )));
        }
        self.push(entry);
        Ok(())
    }

    fn push(&mut self, entry: LedgerEntry) {
        self.by_id
            .insert(entry.document_id.clone(), self.entries.len());
        self.entries.push(entry);
    }

    /// Drop every entry at position `len` and beyond.
    pub fn truncate(&mut self, len: usize) {
        for dropped in self.entries.drain(len.min(self.entries.len())..) {
            self.by_id.remove(&dropped.document_id);
        }
    }

    /// Sum of `chunk_count` over all entries.
    pub fn total_chunks(&self) -> usize {
        self.entries.iter().map(|e| e.chunk_count as usize).sum()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
