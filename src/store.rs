//! On-disk persistence of index instances.
//!
//! Each collection is a directory under `storage.base_dir`:
//!
//! ```text
//! <collection>/
//!   CURRENT                         name of the committed generation
//!   gen-00000003-<uuid>/
//!     vector_index.json             model, dims, metric, per-chunk vectors (base64 LE f32)
//!     lexical_index.json            BM25 parameters and per-chunk term frequencies
//!     ledger.json                   ingested documents, in chunk order
//!   gen-00000002-<uuid>/            previous generation, kept for in-flight readers
//! ```
//!
//! # Commits
//!
//! A commit writes all three artifacts into a fresh generation directory,
//! fsyncs it, and then atomically replaces `CURRENT`. That rename is the
//! only step that changes what readers see, so a crash at any point
//! leaves either the old or the new generation fully readable. Generation
//! directories are never modified after `CURRENT` names them. Older ones
//! (and leftovers of crashed commits) are pruned after each commit, keeping
//! the previous generation for readers that resolved `CURRENT` before the
//! swap.
//!
//! A collection has a single writer. Readers need no lock.

use std::io::Write;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use secure_rag_core::embedding::{blob_to_vec, vec_to_blob};
use secure_rag_core::error::{Result, RetrievalError};
use secure_rag_core::instance::IndexInstance;
use secure_rag_core::ledger::{LedgerEntry, ProvenanceLedger};
use secure_rag_core::lexical::{Bm25Params, LexicalDoc, LexicalIndex};
use secure_rag_core::models::{Chunk, Document};
use secure_rag_core::vector::{Metric, VectorEntry, VectorIndex};

pub const VECTOR_FILE: &str = "vector_index.json";
pub const LEXICAL_FILE: &str = "lexical_index.json";
pub const LEDGER_FILE: &str = "ledger.json";
/// Pointer file naming the committed generation directory.
pub const CURRENT_FILE: &str = "CURRENT";

const GENERATION_PREFIX: &str = "gen-";

/// How often a load restarts after the generation it was reading was
/// replaced and pruned underneath it.
const LOAD_RETRIES: usize = 16;

/// Artifact schema version.
pub const FORMAT_VERSION: u32 = 2;

#[derive(Serialize, Deserialize)]
struct VectorFile {
    format_version: u32,
    generation: u64,
    model: String,
    dims: usize,
    metric: Metric,
    entries: Vec<VectorRecord>,
}

#[derive(Serialize, Deserialize)]
struct VectorRecord {
    chunk: Chunk,
    document_hash: String,
    ingested_at: i64,
    /// Base64 of little-endian f32 bytes.
    vector: String,
}

#[derive(Serialize, Deserialize)]
struct LexicalFile {
    format_version: u32,
    generation: u64,
    k1: f64,
    b: f64,
    docs: Vec<LexicalDoc>,
}

#[derive(Serialize, Deserialize)]
struct LedgerFile {
    format_version: u32,
    generation: u64,
    entries: Vec<LedgerEntry>,
}

/// Settings a new instance is created with. Fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub model: String,
    pub dims: usize,
    pub metric: Metric,
    pub bm25: Bm25Params,
}

/// Directory of named index instances.
#[derive(Debug, Clone)]
pub struct InstanceStore {
    base_dir: PathBuf,
}

impl InstanceStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory of collection `name`. Names must be a single path component.
    pub fn instance_dir(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && !name.starts_with('.');
        if !valid {
            return Err(RetrievalError::Configuration(format!(
                "invalid collection name '{}'",
                name
            )));
        }
        Ok(self.base_dir.join(name))
    }

    /// A collection exists once its first generation has been committed.
    pub fn exists(&self, name: &str) -> bool {
        self.instance_dir(name)
            .map(|d| d.join(CURRENT_FILE).is_file())
            .unwrap_or(false)
    }

    /// Directory holding the committed artifacts of `name`.
    pub fn generation_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.instance_dir(name)?;
        match read_current(&dir)? {
            Some(current) => Ok(dir.join(current)),
            None => Err(missing(name, &dir)),
        }
    }

    /// Names of all collections under the base directory, sorted.
    ///
    /// A missing base directory simply has no collections.
    pub fn list_instances(&self) -> Result<Vec<String>> {
        let read_dir = match std::fs::read_dir(&self.base_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RetrievalError::Transient(format!(
                    "failed to list {}: {}",
                    self.base_dir.display(),
                    e
                )))
            }
        };

        let mut names = Vec::new();
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.is_dir() && path.join(CURRENT_FILE).is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Create and persist an empty collection.
    ///
    /// Fails with [`RetrievalError::Configuration`] if the collection
    /// already exists. A directory left by a create that crashed before
    /// its first commit does not count.
    pub fn create_instance(&self, name: &str, settings: &IndexSettings) -> Result<IndexInstance> {
        let dir = self.instance_dir(name)?;
        if self.exists(name) {
            return Err(RetrievalError::Configuration(format!(
                "collection '{}' already exists at {}",
                name,
                dir.display()
            )));
        }

        let vectors = VectorIndex::new(settings.model.clone(), settings.dims, settings.metric)?;
        let instance = IndexInstance::new(name, vectors, settings.bm25)?;
        self.commit(&instance)?;
        info!(collection = name, dir = %dir.display(), "created collection");
        Ok(instance)
    }

    /// Load the committed generation of an existing collection.
    ///
    /// Fails with [`RetrievalError::Configuration`] if it does not exist
    /// and [`RetrievalError::Corrupted`] if it cannot be loaded intact.
    pub fn open_instance(&self, name: &str) -> Result<IndexInstance> {
        let dir = self.instance_dir(name)?;
        if !self.exists(name) {
            return Err(missing(name, &dir));
        }
        self.load(name, &dir)
    }

    pub fn open_or_create(&self, name: &str, settings: &IndexSettings) -> Result<IndexInstance> {
        if self.exists(name) {
            self.open_instance(name)
        } else {
            self.create_instance(name, settings)
        }
    }

    /// Persist `instance` as the collection's new committed generation.
    ///
    /// Replaces whatever was committed before, so it also installs a
    /// rebuilt instance. On error the previous generation stays current.
    pub fn commit(&self, instance: &IndexInstance) -> Result<()> {
        let dir = self.instance_dir(instance.name())?;
        std::fs::create_dir_all(&dir).map_err(|e| {
            RetrievalError::Transient(format!("failed to create {}: {}", dir.display(), e))
        })?;
        let previous = read_current(&dir)?;

        let generation = instance.generation();
        let gen_name = format!(
            "{}{:08}-{}",
            GENERATION_PREFIX,
            generation,
            Uuid::new_v4().simple()
        );
        let gen_dir = dir.join(&gen_name);
        std::fs::create_dir(&gen_dir).map_err(|e| {
            RetrievalError::Transient(format!("failed to create {}: {}", gen_dir.display(), e))
        })?;

        let staged = write_generation(&gen_dir, instance)
            .and_then(|()| write_atomic(&dir, CURRENT_FILE, gen_name.as_bytes()))
            .and_then(|()| sync_dir(&dir));
        if let Err(e) = staged {
            if let Err(cleanup) = std::fs::remove_dir_all(&gen_dir) {
                warn!(dir = %gen_dir.display(), error = %cleanup, "failed to remove staged generation");
            }
            return Err(e);
        }

        debug!(collection = instance.name(), generation, dir = %gen_name, "committed collection");
        prune_generations(&dir, &gen_name, previous.as_deref());
        Ok(())
    }

    /// Append one embedded document to `instance` and commit it.
    ///
    /// If the commit fails, the in-memory instance is rolled back. The
    /// committed generation on disk was never replaced, so the ledger
    /// never records a document whose index writes did not all succeed.
    pub fn commit_document(
        &self,
        instance: &mut IndexInstance,
        doc: &Document,
        entries: Vec<VectorEntry>,
    ) -> Result<LedgerEntry> {
        let checkpoint = instance.checkpoint();
        let record = instance.append_document(doc, entries)?;

        if let Err(e) = self.commit(instance) {
            warn!(document = %doc.id, error = %e, "commit failed, rolling back");
            instance.rollback(checkpoint);
            return Err(e);
        }
        Ok(record)
    }

    /// Total size in bytes of the committed artifacts.
    pub fn disk_usage(&self, name: &str) -> Result<u64> {
        let gen_dir = self.generation_dir(name)?;
        Ok([VECTOR_FILE, LEXICAL_FILE, LEDGER_FILE]
            .iter()
            .filter_map(|f| std::fs::metadata(gen_dir.join(f)).ok())
            .map(|m| m.len())
            .sum())
    }

    /// Load whatever `CURRENT` names, restarting if a concurrent commit
    /// replaced and pruned it mid-read.
    fn load(&self, name: &str, dir: &Path) -> Result<IndexInstance> {
        let mut attempt = 0;
        loop {
            let current = read_current(dir)?.ok_or_else(|| missing(name, dir))?;
            let err = match load_generation(name, &dir.join(&current)) {
                Ok(instance) => return Ok(instance),
                Err(e) => e,
            };

            let moved = matches!(read_current(dir), Ok(Some(now)) if now != current);
            if !moved || attempt >= LOAD_RETRIES {
                return Err(err);
            }
            attempt += 1;
            debug!(collection = name, generation = %current, "generation replaced during load, retrying");
        }
    }
}

fn missing(name: &str, dir: &Path) -> RetrievalError {
    RetrievalError::Configuration(format!(
        "collection '{}' does not exist (looked in {})",
        name,
        dir.display()
    ))
}

/// Name of the committed generation directory, if any.
fn read_current(dir: &Path) -> Result<Option<String>> {
    let path = dir.join(CURRENT_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(RetrievalError::Transient(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )))
        }
    };
    let name = raw.trim();
    if !name.starts_with(GENERATION_PREFIX) || name.contains(['/', '\\']) {
        return Err(RetrievalError::Corrupted(format!(
            "{} names '{}', not a generation directory",
            path.display(),
            name
        )));
    }
    Ok(Some(name.to_string()))
}

fn write_generation(gen_dir: &Path, instance: &IndexInstance) -> Result<()> {
    let generation = instance.generation();
    let vectors = instance.vectors();
    let vector_file = VectorFile {
        format_version: FORMAT_VERSION,
        generation,
        model: vectors.model().to_string(),
        dims: vectors.dims(),
        metric: vectors.metric(),
        entries: vectors
            .entries()
            .iter()
            .map(|e| VectorRecord {
                chunk: e.chunk.clone(),
                document_hash: e.document_hash.clone(),
                ingested_at: e.ingested_at,
                vector: STANDARD.encode(vec_to_blob(&e.vector)),
            })
            .collect(),
    };
    let params = instance.lexical().params();
    let lexical_file = LexicalFile {
        format_version: FORMAT_VERSION,
        generation,
        k1: params.k1,
        b: params.b,
        docs: instance.lexical().docs().to_vec(),
    };
    let ledger_file = LedgerFile {
        format_version: FORMAT_VERSION,
        generation,
        entries: instance.ledger().entries().to_vec(),
    };

    write_json(gen_dir, VECTOR_FILE, &vector_file)?;
    write_json(gen_dir, LEXICAL_FILE, &lexical_file)?;
    write_json(gen_dir, LEDGER_FILE, &ledger_file)?;
    sync_dir(gen_dir)
}

fn load_generation(name: &str, gen_dir: &Path) -> Result<IndexInstance> {
    let vector_file: VectorFile = read_json(gen_dir, VECTOR_FILE)?;
    let lexical_file: LexicalFile = read_json(gen_dir, LEXICAL_FILE)?;
    let ledger_file: LedgerFile = read_json(gen_dir, LEDGER_FILE)?;

    for (file, version) in [
        (VECTOR_FILE, vector_file.format_version),
        (LEXICAL_FILE, lexical_file.format_version),
        (LEDGER_FILE, ledger_file.format_version),
    ] {
        if version != FORMAT_VERSION {
            return Err(RetrievalError::Corrupted(format!(
                "{} has format version {}, expected {}",
                file, version, FORMAT_VERSION
            )));
        }
    }

    let generation = vector_file.generation;
    if lexical_file.generation != generation || ledger_file.generation != generation {
        return Err(RetrievalError::Corrupted(format!(
            "artifacts in {} disagree on their generation ({}, {}, {})",
            gen_dir.display(),
            generation,
            lexical_file.generation,
            ledger_file.generation
        )));
    }

    let entries = vector_file
        .entries
        .into_iter()
        .map(|r| {
            let bytes = STANDARD.decode(&r.vector).map_err(|e| {
                RetrievalError::Corrupted(format!(
                    "chunk {} has an invalid vector encoding: {}",
                    r.chunk.id, e
                ))
            })?;
            Ok(VectorEntry {
                vector: blob_to_vec(&bytes)?,
                chunk: r.chunk,
                document_hash: r.document_hash,
                ingested_at: r.ingested_at,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let vectors = VectorIndex::from_entries(
        vector_file.model,
        vector_file.dims,
        vector_file.metric,
        entries,
    )?;

    let bm25 = Bm25Params::new(lexical_file.k1, lexical_file.b)
        .map_err(|e| RetrievalError::Corrupted(format!("{}: {}", LEXICAL_FILE, e)))?;
    let lexical = LexicalIndex::from_docs(bm25, lexical_file.docs);
    let ledger = ProvenanceLedger::from_entries(ledger_file.entries)?;

    let instance = IndexInstance::from_parts(name, generation, vectors, lexical, ledger)?;
    debug!(
        collection = name,
        generation,
        chunks = instance.chunk_count(),
        "loaded collection"
    );
    Ok(instance)
}

/// Remove every generation directory except `current` and `previous`.
///
/// Failures are logged only; a leftover directory costs disk, not
/// correctness.
fn prune_generations(dir: &Path, current: &str, previous: Option<&str>) {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot list generations to prune");
            return;
        }
    };
    for entry in read_dir.flatten() {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if !name.starts_with(GENERATION_PREFIX) || name == current || Some(&*name) == previous {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => debug!(dir = %name, "pruned generation"),
            Err(e) => warn!(dir = %name, error = %e, "failed to prune generation"),
        }
    }
}

fn write_json<T: Serialize>(dir: &Path, file_name: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| {
        RetrievalError::Transient(format!("failed to serialize {}: {}", file_name, e))
    })?;
    write_atomic(dir, file_name, &bytes)
}

/// Atomically replace `dir/file_name` with `bytes`.
fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<()> {
    let target = dir.join(file_name);
    let transient =
        |e: std::io::Error| RetrievalError::Transient(format!("failed to write {}: {}", target.display(), e));

    let mut tmp = NamedTempFile::new_in(dir).map_err(transient)?;
    tmp.write_all(bytes).map_err(transient)?;
    tmp.as_file().sync_all().map_err(transient)?;
    tmp.persist(&target).map_err(|e| transient(e.error))?;
    Ok(())
}

/// Flush directory entries so renames inside `dir` survive a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    std::fs::File::open(dir)
        .and_then(|f| f.sync_all())
        .map_err(|e| RetrievalError::Transient(format!("failed to sync {}: {}", dir.display(), e)))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn read_json<T: DeserializeOwned>(dir: &Path, file_name: &str) -> Result<T> {
    let path = dir.join(file_name);
    let bytes = std::fs::read(&path).map_err(|e| {
        RetrievalError::Corrupted(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        RetrievalError::Corrupted(format!("{} is malformed: {}", path.display(), e))
    })
}
