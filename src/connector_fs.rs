//! Filesystem document discovery.
//!
//! Walks the configured documents directory and turns every matching
//! UTF-8 file into a [`Document`] whose identity is its path relative to
//! the root. Results are sorted by identity so ingestion order, and thus
//! chunk order, is deterministic.

use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use secure_rag_core::error::{Result, RetrievalError};
use secure_rag_core::models::Document;

/// Scan `root` for documents matching `include` and not `exclude`.
///
/// # Errors
///
/// - [`RetrievalError::Configuration`] if `root` does not exist or a glob
///   is invalid.
/// - [`RetrievalError::Transient`] if the directory walk or a read fails.
pub fn scan_documents(root: &Path, include: &[String], exclude: &[String]) -> Result<Vec<Document>> {
    if !root.is_dir() {
        return Err(RetrievalError::Configuration(format!(
            "documents directory does not exist: {}",
            root.display()
        )));
    }

    let include_set = build_globset(include)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), ".git/**".to_string()];
    default_excludes.extend(exclude.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let now = Utc::now().timestamp();
    let mut docs = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| {
            RetrievalError::Transient(format!("failed to walk {}: {}", root.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match read_text(path)? {
            Some(text) => docs.push(Document::new(rel_str, text, now)),
            None => warn!(path = %path.display(), "skipping non-UTF-8 file"),
        }
    }

    // Sort for deterministic ordering
    docs.sort_by(|a, b| a.id.cmp(&b.id));
    debug!(root = %root.display(), found = docs.len(), "scanned documents");

    Ok(docs)
}

/// Load one file as a document identified by its file name.
pub fn load_single_document(path: &Path) -> Result<Document> {
    if !path.is_file() {
        return Err(RetrievalError::Configuration(format!(
            "file not found: {}",
            path.display()
        )));
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            RetrievalError::Configuration(format!("path has no file name: {}", path.display()))
        })?;
    let text = read_text(path)?.ok_or_else(|| {
        RetrievalError::Configuration(format!("{} is not valid UTF-8 text", path.display()))
    })?;
    Ok(Document::new(name, text, Utc::now().timestamp()))
}

/// Read a file as UTF-8. `Ok(None)` means the bytes are not valid UTF-8.
fn read_text(path: &Path) -> Result<Option<String>> {
    let bytes = std::fs::read(path).map_err(|e| {
        RetrievalError::Transient(format!("failed to read {}: {}", path.display(), e))
    })?;
    Ok(String::from_utf8(bytes).ok())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            RetrievalError::Configuration(format!("invalid glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RetrievalError::Configuration(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn md() -> Vec<String> {
        vec!["**/*.md".to_string()]
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("b.md"), "bee").unwrap();
        fs::write(root.join("sub/a.md"), "ay").unwrap();
        fs::write(root.join("notes.txt"), "ignored").unwrap();
        fs::write(root.join(".git/HEAD.md"), "ignored").unwrap();

        let docs = scan_documents(root, &md(), &[]).unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b.md", "sub/a.md"]);
        assert_eq!(docs[0].text, "bee");
        assert_eq!(docs[0].content_hash.len(), 64);
    }

    #[test]
    fn test_exclude_globs() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        fs::write(tmp.path().join("keep.md"), "k").unwrap();
        fs::write(tmp.path().join("drafts/skip.md"), "s").unwrap();

        let docs = scan_documents(tmp.path(), &md(), &["drafts/**".to_string()]).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "keep.md");
    }

    #[test]
    fn test_non_utf8_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("bad.md"), [0xff, 0xfe, 0x00]).unwrap();
        fs::write(tmp.path().join("good.md"), "ok").unwrap();
        let docs = scan_documents(tmp.path(), &md(), &[]).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_missing_root_is_configuration_error() {
        let err = scan_documents(Path::new("/definitely/not/here"), &md(), &[]).unwrap_err();
        assert!(matches!(err, RetrievalError::Configuration(_)));
    }

    #[test]
    fn test_load_single_document_uses_file_name() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("lore.md");
        fs::write(&path, "orange horse").unwrap();
        let doc = load_single_document(&path).unwrap();
        assert_eq!(doc.id, "lore.md");
        assert_eq!(doc.text, "orange horse");
        assert!(load_single_document(&tmp.path().join("missing.md")).is_err());
    }
}
