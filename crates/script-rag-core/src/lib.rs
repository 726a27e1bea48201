//! # script-rag core
//!
//! Pure retrieval logic for script-rag: data models, the character-window
//! chunker, the embedding provider trait, the vector index abstraction with
//! its flat baseline, the chunk metadata store, and the error taxonomy.
//!
//! This crate performs no filesystem or network I/O. Snapshot persistence,
//! embedding backends, and the retrieval service live in the `script-rag`
//! app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod metadata;
pub mod models;

pub use error::{RagError, RagResult};
