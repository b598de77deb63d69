//! # Secure RAG Core
//!
//! Retrieval logic for Secure RAG: data models, chunking, the embedding
//! provider trait, the vector and BM25 lexical indexes, the provenance
//! ledger, and hybrid score fusion.
//!
//! This crate contains no tokio, HTTP, or filesystem I/O. Persistence,
//! provider clients and orchestration live in the `secure-rag` crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod instance;
pub mod ledger;
pub mod lexical;
pub mod models;
pub mod search;
pub mod vector;
