//! # Knowledge Harness
//!
//! Ingests articles and videos, stores them as embedded chunks, derives
//! structured tutorials from them with a generative model, and serves
//! semantic search over everything stored.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │  HTTP / CLI  │──▶│ WorkerPool   │──▶│  Pipelines  │
//! │  (service)   │   │ TaskRegistry │   │ content/tut │
//! └──────┬───────┘   └──────────────┘   └──────┬──────┘
//!        │                                     ▼
//!        │           ┌──────────────┐   ┌─────────────┐
//!        └──────────▶│SemanticSearch│──▶│ VectorStore │
//!                    └──────────────┘   └─────────────┘
//! ```
//!
//! The data model, chunker, tutorial parsing, collaborator traits, and the
//! search aggregator live in `knowledge-harness-core`. This crate adds the
//! runtime pieces: tasks and workers, concrete providers, SQLite storage,
//! and the outer surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`tasks`] | Bounded in-memory task registry |
//! | [`worker`] | Bounded worker pool |
//! | [`pipeline`] | Content and tutorial pipelines |
//! | [`service`] | Facade used by the server and the CLI |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Generative model backends |
//! | [`fetch`] | HTTP content fetcher |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod embedding;
pub mod fetch;
pub mod generation;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod retry;
pub mod server;
pub mod service;
pub mod sqlite_store;
pub mod tasks;
pub mod worker;
