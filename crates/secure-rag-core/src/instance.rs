//! Index instance: one named collection backed by two parallel indexes.
//!
//! An [`IndexInstance`] owns a [`VectorIndex`], a [`LexicalIndex`] and a
//! [`ProvenanceLedger`] that always describe the same ordered chunk set.
//! Every mutation goes through [`IndexInstance::append_document`], which
//! keeps the three aligned, and can be undone with a [`Checkpoint`] if
//! persisting the result fails.
//!
//! Chunk layout invariant: chunks are stored grouped by document, in
//! ledger order, so ledger entry *i* owns the `chunk_count` chunks that
//! follow those of entries `0..i`.

use crate::error::{Result, RetrievalError};
use crate::ledger::{LedgerEntry, ProvenanceLedger};
use crate::lexical::{Bm25Params, LexicalIndex};
use crate::models::Document;
use crate::vector::{VectorEntry, VectorIndex};

/// State captured before a mutation, for [`IndexInstance::rollback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    generation: u64,
    chunks: usize,
    documents: usize,
}

/// The queryable bundle for one collection.
#[derive(Debug, Clone)]
pub struct IndexInstance {
    name: String,
    generation: u64,
    vectors: VectorIndex,
    lexical: LexicalIndex,
    ledger: ProvenanceLedger,
}

impl IndexInstance {
    /// Create an empty instance around an empty vector index.
    pub fn new(name: impl Into<String>, vectors: VectorIndex, bm25: Bm25Params) -> Result<Self> {
        if !vectors.is_empty() {
            return Err(RetrievalError::Configuration(
                "a new instance must start from an empty vector index".to_string(),
            ));
        }
        Ok(Self {
            name: name.into(),
            generation: 0,
            vectors,
            lexical: LexicalIndex::new(bm25),
            ledger: ProvenanceLedger::new(),
        })
    }

    /// Assemble an instance from loaded parts and check they agree.
    pub fn from_parts(
        name: impl Into<String>,
        generation: u64,
        vectors: VectorIndex,
        lexical: LexicalIndex,
        ledger: ProvenanceLedger,
    ) -> Result<Self> {
        let instance = Self {
            name: name.into(),
            generation,
            vectors,
            lexical,
            ledger,
        };
        instance.validate()?;
        Ok(instance)
    }

    /// Check that the vector index, lexical index and ledger describe the
    /// same chunks in the same order.
    pub fn validate(&self) -> Result<()> {
        if self.vectors.len() != self.lexical.len() {
            return Err(RetrievalError::Corrupted(format!(
                "vector index holds {} chunks but lexical index holds {}",
                self.vectors.len(),
                self.lexical.len()
            )));
        }
        for (pos, (v, l)) in self
            .vectors
            .entries()
            .iter()
            .zip(self.lexical.docs())
            .enumerate()
        {
            if v.chunk.id != l.chunk_id {
                return Err(RetrievalError::Corrupted(format!(
                    "chunk order diverges at position {}: vector '{}' vs lexical '{}'",
                    pos, v.chunk.id, l.chunk_id
                )));
            }
        }
        if self.ledger.total_chunks() != self.vectors.len() {
            return Err(RetrievalError::Corrupted(format!(
                "ledger accounts for {} chunks but indexes hold {}",
                self.ledger.total_chunks(),
                self.vectors.len()
            )));
        }
        let mut pos = 0usize;
        for entry in self.ledger.entries() {
            let end = pos + entry.chunk_count as usize;
            if let Some(stray) = self.vectors.entries()[pos..end]
                .iter()
                .find(|e| e.chunk.document_id != entry.document_id)
            {
                return Err(RetrievalError::Corrupted(format!(
                    "chunk {} belongs to '{}' but sits in the range of '{}'",
                    stray.chunk.id, stray.chunk.document_id, entry.document_id
                )));
            }
            pos = end;
        }
        Ok(())
    }

    /// Append one document's embedded chunks to both indexes and record it.
    ///
    /// `entries` must be the document's chunks in order. A document with
    /// no chunks is still recorded so it is not re-read on every run.
    /// Bumps the generation. On error the instance is unchanged.
    pub fn append_document(
        &mut self,
        doc: &Document,
        entries: Vec<VectorEntry>,
    ) -> Result<LedgerEntry> {
        if self.ledger.contains(&doc.id) {
            return Err(RetrievalError::Configuration(format!(
                "document '{}' is already part of collection '{}'",
                doc.id, self.name
            )));
        }
        if let Some(stray) = entries.iter().find(|e| e.chunk.document_id != doc.id) {
            return Err(RetrievalError::Configuration(format!(
                "chunk {} belongs to '{}', not '{}'",
                stray.chunk.id, stray.chunk.document_id, doc.id
            )));
        }

        let record = LedgerEntry {
            document_id: doc.id.clone(),
            content_hash: doc.content_hash.clone(),
            chunk_count: entries.len() as u32,
            ingested_at: doc.ingested_at,
        };
        let chunks: Vec<_> = entries.iter().map(|e| e.chunk.clone()).collect();

        self.vectors.add(entries)?;
        self.lexical.add(&chunks);
        self.ledger.record(record.clone())?;
        self.generation += 1;
        Ok(record)
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            generation: self.generation,
            chunks: self.vectors.len(),
            documents: self.ledger.len(),
        }
    }

    /// Undo every [`append_document`](Self::append_document) made since `cp`.
    pub fn rollback(&mut self, cp: Checkpoint) {
        self.vectors.truncate(cp.chunks);
        self.lexical.truncate(cp.chunks);
        self.ledger.truncate(cp.documents);
        self.generation = cp.generation;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of committed document additions. Shared by all three
    /// persisted artifacts.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    pub fn ledger(&self) -> &ProvenanceLedger {
        &self.ledger
    }

    pub fn chunk_count(&self) -> usize {
        self.vectors.len()
    }

    pub fn document_count(&self) -> usize {
        self.ledger.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_text, ChunkParams};
    use crate::embedding::HashProvider;
    use crate::vector::Metric;

    fn empty() -> IndexInstance {
        let vectors = VectorIndex::new("hash-16", 16, Metric::Cosine).unwrap();
        IndexInstance::new("test", vectors, Bm25Params::default()).unwrap()
    }

    fn entries_for(doc: &Document) -> Vec<VectorEntry> {
        let provider = HashProvider::new(16);
        let params = ChunkParams::new(24, 4).unwrap();
        chunk_text(&doc.id, &doc.text, &params)
            .into_iter()
            .map(|chunk| VectorEntry {
                vector: provider.embed_one(&chunk.text),
                chunk,
                document_hash: doc.content_hash.clone(),
                ingested_at: doc.ingested_at,
            })
            .collect()
    }

    #[test]
    fn test_append_keeps_indexes_aligned() {
        let mut inst = empty();
        let a = Document::new("A.md", "orange horse with raspberry hooves gallops", 1);
        let b = Document::new("B.md", "herring heads", 2);
        let rec = inst.append_document(&a, entries_for(&a)).unwrap();
        inst.append_document(&b, entries_for(&b)).unwrap();

        assert!(rec.chunk_count > 1);
        assert_eq!(inst.generation(), 2);
        assert_eq!(inst.document_count(), 2);
        assert_eq!(inst.chunk_count(), inst.lexical().len());
        inst.validate().unwrap();
    }

    #[test]
    fn test_append_same_document_twice_rejected() {
        let mut inst = empty();
        let a = Document::new("A.md", "some text", 1);
        inst.append_document(&a, entries_for(&a)).unwrap();
        let err = inst.append_document(&a, entries_for(&a)).unwrap_err();
        assert!(matches!(err, RetrievalError::Configuration(_)));
        assert_eq!(inst.document_count(), 1);
        assert_eq!(inst.generation(), 1);
    }

    #[test]
    fn test_empty_document_recorded_without_chunks() {
        let mut inst = empty();
        let doc = Document::new("empty.md", "", 1);
        let rec = inst.append_document(&doc, Vec::new()).unwrap();
        assert_eq!(rec.chunk_count, 0);
        assert!(inst.ledger().contains("empty.md"));
        assert!(inst.is_empty());
    }

    #[test]
    fn test_rollback_restores_checkpoint() {
        let mut inst = empty();
        let a = Document::new("A.md", "first document text", 1);
        inst.append_document(&a, entries_for(&a)).unwrap();
        let cp = inst.checkpoint();
        let chunks_before = inst.chunk_count();

        let b = Document::new("B.md", "second document with more words in it", 2);
        inst.append_document(&b, entries_for(&b)).unwrap();
        inst.rollback(cp);

        assert_eq!(inst.chunk_count(), chunks_before);
        assert_eq!(inst.generation(), 1);
        assert!(!inst.ledger().contains("B.md"));
        inst.validate().unwrap();
    }

    #[test]
    fn test_from_parts_detects_misalignment() {
        let mut inst = empty();
        let a = Document::new("A.md", "first document text", 1);
        inst.append_document(&a, entries_for(&a)).unwrap();

        let mut lexical = inst.lexical().clone();
        lexical.truncate(0);
        let err = IndexInstance::from_parts(
            "test",
            1,
            inst.vectors().clone(),
            lexical,
            inst.ledger().clone(),
        )
        .unwrap_err();
        assert!(matches!(err, RetrievalError::Corrupted(_)));
    }

    #[test]
    fn test_from_parts_detects_ledger_gap() {
        let mut inst = empty();
        let a = Document::new("A.md", "first document text", 1);
        inst.append_document(&a, entries_for(&a)).unwrap();

        let err = IndexInstance::from_parts(
            "test",
            1,
            inst.vectors().clone(),
            inst.lexical().clone(),
            ProvenanceLedger::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RetrievalError::Corrupted(_)));
    }

    #[test]
    fn test_foreign_chunk_rejected() {
        let mut inst = empty();
        let a = Document::new("A.md", "text of a", 1);
        let b = Document::new("B.md", "text of b", 1);
        let err = inst.append_document(&a, entries_for(&b)).unwrap_err();
        assert!(matches!(err, RetrievalError::Configuration(_)));
        assert!(inst.ledger().is_empty());
    }
}
