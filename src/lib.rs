//! # script-rag
//!
//! Vector-indexed retrieval over screenplay and anime-script text.
//!
//! Scripts are split into overlapping character windows, embedded, and
//! stored in a vector index alongside their metadata. Similarity queries
//! return ranked chunks or a ready-to-paste context block for a generation
//! prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌─────────────────┐
//! │ extract  │──▶│ chunker │──▶│ provider │──▶│ index + metadata│
//! │ PDF/text │   └─────────┘   └──────────┘   └───────┬─────────┘
//! └──────────┘                                        │ snapshot
//!                                                     ▼
//!                                             ┌───────────────┐
//!                                             │ gen-N/ CURRENT│
//!                                             └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! srag add scripts/episode01.pdf
//! srag query "the pilot refuses to get in the robot" --top-k 3
//! srag context "rooftop confrontation at dusk" --max-chars 1500
//! srag info
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding provider implementations |
//! | [`extract`] | PDF and plain-text extraction |
//! | [`persist`] | Atomic snapshots and the writer lock |
//! | [`service`] | Retrieval service |
//! | [`commands`] | CLI command implementations |
//! | [`logging`] | Tracing subscriber setup |
//!
//! Chunking, the vector index, metadata and the error taxonomy live in the
//! `script-rag-core` crate.

pub mod commands;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod logging;
pub mod persist;
pub mod service;
