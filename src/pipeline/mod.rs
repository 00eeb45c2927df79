//! Asynchronous processing pipelines.
//!
//! Each pipeline is a plain async function over its collaborators. It
//! knows nothing about tasks: the worker pool wraps a pipeline run in a
//! job and records the outcome on the task registry.
//!
//! - [`content`]: fetch → normalize → chunk → embed → persist.
//! - [`tutorial`]: retrieve → generate → parse (or fall back) → embed →
//!   persist.

pub mod content;
pub mod tutorial;

pub use content::ContentPipeline;
pub use tutorial::TutorialPipeline;
