//! # Knowledge Harness Core
//!
//! Runtime-free logic for Knowledge Harness: data models, the error
//! taxonomy, the deterministic chunker, collaborator traits (fetcher,
//! embedder, generative model, vector store), tutorial prompt/parse/fallback
//! handling, and the semantic search aggregator.
//!
//! This crate contains no tokio, sqlx, or network dependencies. Concrete
//! collaborators and the asynchronous task machinery live in the
//! `knowledge-harness` application crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod generation;
pub mod models;
pub mod search;
pub mod store;
pub mod tutorial;

pub use error::{Error, Result};
