//! # Secure RAG
//!
//! A local-first hybrid retrieval engine for grounding locally hosted
//! language models in a private document collection.
//!
//! Documents are chunked, embedded by a local (or remote) embedding model,
//! and stored in named collections that pair a dense vector index with a
//! BM25 lexical index and a provenance ledger. Queries fuse both scores
//! into one ranked list, served from a CLI and a small HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────────────┐
//! │ Documents   │──▶│  Pipeline    │──▶│ Collection directory │
//! │ (*.md)      │   │ Chunk+Embed  │   │ vector+lexical+ledger│
//! └─────────────┘   └──────────────┘   └──────────┬───────────┘
//!                                                 │
//!                      ┌──────────────────────────┤
//!                      ▼                          ▼
//!                 ┌──────────┐              ┌──────────┐
//!                 │   CLI    │              │   HTTP   │
//!                 │  (srag)  │              │ /search  │
//!                 └──────────┘              └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | Tracing subscriber setup |
//! | [`embedding`] | Ollama / OpenAI / hash providers with timeout |
//! | [`connector_fs`] | Filesystem document discovery |
//! | [`store`] | Atomic on-disk persistence of collections |
//! | [`ingest`] | Idempotent ingestion workflow |
//! | [`search`] | Query orchestration |
//! | [`server`] | HTTP search server |
//! | [`stats`] | Collection statistics |
//!
//! Retrieval algorithms (chunking, BM25, vector search, fusion) live in
//! the `secure-rag-core` crate.

pub mod config;
pub mod connector_fs;
pub mod embedding;
pub mod ingest;
pub mod logging;
pub mod search;
pub mod server;
pub mod stats;
pub mod store;
