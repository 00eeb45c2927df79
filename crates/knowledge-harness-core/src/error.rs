//! Error taxonomy shared by the pipelines, the search aggregator, and the
//! service facade.
//!
//! Pipeline errors are captured at the pipeline boundary and recorded as a
//! FAILED task (their `Display` output becomes the task's error message).
//! Synchronous operations surface them directly.
//!
//! Schema problems in generated tutorial output are deliberately absent:
//! they are modelled by [`crate::tutorial::SchemaError`], which is consumed by
//! the summary fallback and never converts into [`Error`].

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a Knowledge Harness operation can report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The content could not be retrieved (network, HTTP status, timeout).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The content was retrieved but could not be turned into text.
    #[error("parse error: {0}")]
    Parse(String),

    /// The embedding provider failed or returned malformed output.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The generative model call failed.
    #[error("generation error: {0}")]
    Generation(String),

    /// The vector store rejected or failed a read/write.
    #[error("storage error: {0}")]
    Storage(String),

    /// An id (task, content, tutorial, record) is unknown.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The request itself is malformed (bad content type, empty query, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// A result accessor was called before the task completed.
    #[error("task {task_id} is not completed (status: {status})")]
    TaskNotReady { task_id: String, status: String },

    /// The job queue is saturated; the submission was rejected.
    #[error("overloaded: {0}")]
    Overloaded(String),
}

impl Error {
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable machine-readable code, used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Fetch(_) => "fetch_error",
            Error::Parse(_) => "parse_error",
            Error::Embedding(_) => "embedding_error",
            Error::Generation(_) => "generation_error",
            Error::Storage(_) => "storage_error",
            Error::NotFound { .. } => "not_found",
            Error::Validation(_) => "bad_request",
            Error::TaskNotReady { .. } => "task_not_ready",
            Error::Overloaded(_) => "overloaded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        let e = Error::not_found("task", "abc");
        assert_eq!(e.to_string(), "task not found: abc");
        assert_eq!(e.code(), "not_found");

        let e = Error::fetch("connection refused");
        assert_eq!(e.to_string(), "fetch error: connection refused");
    }

    #[test]
    fn test_task_not_ready_message() {
        let e = Error::TaskNotReady {
            task_id: "t1".into(),
            status: "processing".into(),
        };
        assert!(e.to_string().contains("processing"));
        assert_eq!(e.code(), "task_not_ready");
    }
}
