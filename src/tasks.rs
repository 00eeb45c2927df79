//! In-memory task registry.
//!
//! Tracks the lifecycle of asynchronous jobs keyed by an opaque UUID:
//!
//! ```text
//! QUEUED ──▶ PROCESSING ──▶ COMPLETED
//!    │            │
//!    └────────────┴───────▶ FAILED
//! ```
//!
//! COMPLETED and FAILED are terminal; once a task reaches either, every
//! further transition is rejected with [`TaskError::AlreadyTerminal`] and
//! the task is left unchanged.
//!
//! # Concurrency
//!
//! The id→entry map sits behind a `RwLock` and every entry has its own
//! `Mutex`. A transition holds the map read lock only long enough to clone
//! the entry's `Arc`, then mutates under the entry lock, so writes to
//! different tasks never contend and writes to one task are serialized.
//! Readers clone a whole snapshot under the entry lock and never observe a
//! half-applied transition. No lock is held across an `.await`.
//!
//! # Bounding
//!
//! `create` first drops terminal tasks older than the TTL. If the registry
//! is still at `max_entries`, the oldest terminal tasks are dropped. Queued
//! and processing tasks are never evicted; when only those remain,
//! `create` fails with [`TaskError::Full`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use uuid::Uuid;

use knowledge_harness_core::models::{ProcessedContent, TutorialArtifact};
use knowledge_harness_core::Error;

use crate::config::TasksConfig;

/// What a task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Content,
    Tutorial,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Content => f.write_str("content"),
            TaskKind::Tutorial => f.write_str("tutorial"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a completed task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult {
    Content(ProcessedContent),
    Tutorial(TutorialArtifact),
}

impl TaskResult {
    /// The id callers use to fetch the produced artifact.
    pub fn reference(&self) -> &str {
        match self {
            TaskResult::Content(c) => &c.content_id,
            TaskResult::Tutorial(t) => &t.id,
        }
    }
}

/// A state change, carrying the payload that belongs to the new state.
#[derive(Debug, Clone)]
pub enum TaskUpdate {
    Processing,
    Completed(TaskResult),
    Failed(String),
}

impl TaskUpdate {
    fn target(&self) -> TaskStatus {
        match self {
            TaskUpdate::Processing => TaskStatus::Processing,
            TaskUpdate::Completed(_) => TaskStatus::Completed,
            TaskUpdate::Failed(_) => TaskStatus::Failed,
        }
    }
}

/// Snapshot of one task.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    fn apply(&mut self, update: TaskUpdate) -> Result<(), TaskError> {
        let to = update.target();
        if self.status.is_terminal() {
            return Err(TaskError::AlreadyTerminal {
                id: self.id.clone(),
                status: self.status,
            });
        }
        let allowed = matches!(
            (self.status, to),
            (TaskStatus::Queued, TaskStatus::Processing)
                | (TaskStatus::Queued, TaskStatus::Completed)
                | (TaskStatus::Queued, TaskStatus::Failed)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        );
        if !allowed {
            return Err(TaskError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }

        match update {
            TaskUpdate::Processing => {}
            TaskUpdate::Completed(result) => self.result = Some(result),
            TaskUpdate::Failed(message) => self.error = Some(message),
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("task {id} is already {status}")]
    AlreadyTerminal { id: String, status: TaskStatus },
    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("task registry is full ({max_entries} active tasks)")]
    Full { max_entries: usize },
}

impl From<TaskError> for Error {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::NotFound(id) => Error::not_found("task", id),
            TaskError::Full { .. } => Error::Overloaded(e.to_string()),
            other => Error::validation(other.to_string()),
        }
    }
}

/// Number of tasks in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// TTLs are capped at roughly a century.
const MAX_TTL_SECS: u64 = 100 * 365 * 86_400;

/// Bounded, TTL-evicting registry of tasks.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Arc<Mutex<Task>>>>,
    max_entries: usize,
    ttl: Option<Duration>,
}

impl TaskRegistry {
    /// `max_entries == 0` disables the bound; `ttl_secs == 0` disables
    /// age-based eviction.
    pub fn new(max_entries: usize, ttl_secs: u64) -> Self {
        let ttl = (ttl_secs > 0).then(|| Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64));
        Self {
            tasks: RwLock::new(HashMap::new()),
            max_entries,
            ttl,
        }
    }

    pub fn from_config(config: &TasksConfig) -> Self {
        Self::new(config.max_entries, config.ttl_secs)
    }

    /// Register a new QUEUED task.
    pub fn create(&self, kind: TaskKind) -> Result<Task, TaskError> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            kind,
            status: TaskStatus::Queued,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };

        let mut tasks = self.tasks.write();
        if let Some(ttl) = self.ttl {
            evict_terminal_before(&mut tasks, now - ttl);
        }
        if self.max_entries > 0 && tasks.len() >= self.max_entries {
            let excess = tasks.len() + 1 - self.max_entries;
            evict_oldest_terminal(&mut tasks, excess);
            if tasks.len() >= self.max_entries {
                return Err(TaskError::Full {
                    max_entries: self.max_entries,
                });
            }
        }

        tasks.insert(task.id.clone(), Arc::new(Mutex::new(task.clone())));
        tracing::debug!(task_id = %task.id, %kind, "task created");
        Ok(task)
    }

    fn entry(&self, id: &str) -> Result<Arc<Mutex<Task>>, TaskError> {
        self.tasks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    /// Apply `update` to task `id` and return the new snapshot.
    pub fn transition(&self, id: &str, update: TaskUpdate) -> Result<Task, TaskError> {
        let entry = self.entry(id)?;
        let mut task = entry.lock();
        task.apply(update)?;
        Ok(task.clone())
    }

    /// Current snapshot of task `id`.
    pub fn get(&self, id: &str) -> Result<Task, TaskError> {
        let entry = self.entry(id)?;
        let task = entry.lock().clone();
        Ok(task)
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counts(&self) -> TaskCounts {
        let entries: Vec<Arc<Mutex<Task>>> = self.tasks.read().values().cloned().collect();
        let mut counts = TaskCounts::default();
        for entry in entries {
            match entry.lock().status {
                TaskStatus::Queued => counts.queued += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Drop terminal tasks last updated before `cutoff`. Returns how many
    /// were removed.
    pub fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut tasks = self.tasks.write();
        evict_terminal_before(&mut tasks, cutoff)
    }
}

fn evict_terminal_before(tasks: &mut HashMap<String, Arc<Mutex<Task>>>, cutoff: DateTime<Utc>) -> usize {
    let before = tasks.len();
    tasks.retain(|_, entry| {
        let t = entry.lock();
        !(t.status.is_terminal() && t.updated_at < cutoff)
    });
    let removed = before - tasks.len();
    if removed > 0 {
        tracing::debug!(removed, "evicted expired tasks");
    }
    removed
}

fn evict_oldest_terminal(tasks: &mut HashMap<String, Arc<Mutex<Task>>>, count: usize) {
    let mut terminal: Vec<(DateTime<Utc>, String)> = tasks
        .iter()
        .filter_map(|(id, entry)| {
            let t = entry.lock();
            t.status.is_terminal().then(|| (t.updated_at, id.clone()))
        })
        .collect();
    terminal.sort();
    for (_, id) in terminal.into_iter().take(count) {
        tasks.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_harness_core::models::{ContentMetadata, ContentType};

    fn content_result(id: &str) -> TaskResult {
        TaskResult::Content(ProcessedContent {
            content_id: id.into(),
            metadata: ContentMetadata {
                content_id: id.into(),
                title: "t".into(),
                author: "a".into(),
                source_url: "https://x".into(),
                content_type: ContentType::Article,
                duration: None,
                published_date: None,
                view_count: None,
                processed_date: "2024-01-01T00:00:00Z".into(),
                content_hash: "h".into(),
            },
            chunks: vec!["c".into()],
        })
    }

    #[test]
    fn test_create_is_queued() {
        let reg = TaskRegistry::new(0, 0);
        let t = reg.create(TaskKind::Content).unwrap();
        assert_eq!(t.status, TaskStatus::Queued);
        assert_eq!(reg.get(&t.id).unwrap().status, TaskStatus::Queued);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_happy_path_transitions() {
        let reg = TaskRegistry::new(0, 0);
        let t = reg.create(TaskKind::Content).unwrap();
        reg.transition(&t.id, TaskUpdate::Processing).unwrap();
        let done = reg
            .transition(&t.id, TaskUpdate::Completed(content_result("c1")))
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result.unwrap().reference(), "c1");
    }

    #[test]
    fn test_terminal_is_final() {
        let reg = TaskRegistry::new(0, 0);
        let t = reg.create(TaskKind::Tutorial).unwrap();
        reg.transition(&t.id, TaskUpdate::Failed("boom".into()))
            .unwrap();

        let err = reg
            .transition(&t.id, TaskUpdate::Completed(content_result("x")))
            .unwrap_err();
        assert!(matches!(err, TaskError::AlreadyTerminal { .. }));
        let err = reg.transition(&t.id, TaskUpdate::Processing).unwrap_err();
        assert!(matches!(err, TaskError::AlreadyTerminal { .. }));

        let snap = reg.get(&t.id).unwrap();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert_eq!(snap.error.as_deref(), Some("boom"));
        assert!(snap.result.is_none());
    }

    #[test]
    fn test_processing_twice_is_invalid() {
        let reg = TaskRegistry::new(0, 0);
        let t = reg.create(TaskKind::Content).unwrap();
        reg.transition(&t.id, TaskUpdate::Processing).unwrap();
        assert!(matches!(
            reg.transition(&t.id, TaskUpdate::Processing),
            Err(TaskError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_unknown_task() {
        let reg = TaskRegistry::new(0, 0);
        assert_eq!(
            reg.get("nope").unwrap_err(),
            TaskError::NotFound("nope".into())
        );
        let err: Error = TaskError::NotFound("nope".into()).into();
        assert!(matches!(err, Error::NotFound { kind: "task", .. }));
    }

    #[test]
    fn test_concurrent_terminal_transitions_have_one_winner() {
        let reg = Arc::new(TaskRegistry::new(0, 0));
        let t = reg.create(TaskKind::Content).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let reg = reg.clone();
                let id = t.id.clone();
                std::thread::spawn(move || {
                    let update = if i % 2 == 0 {
                        TaskUpdate::Completed(content_result(&format!("c{}", i)))
                    } else {
                        TaskUpdate::Failed(format!("e{}", i))
                    };
                    reg.transition(&id, update).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert!(reg.get(&t.id).unwrap().status.is_terminal());
    }

    #[test]
    fn test_full_when_only_live_tasks() {
        let reg = TaskRegistry::new(2, 0);
        let a = reg.create(TaskKind::Content).unwrap();
        let b = reg.create(TaskKind::Content).unwrap();
        reg.transition(&b.id, TaskUpdate::Processing).unwrap();

        assert!(matches!(
            reg.create(TaskKind::Content),
            Err(TaskError::Full { max_entries: 2 })
        ));
        assert!(reg.get(&a.id).is_ok());
        assert!(reg.get(&b.id).is_ok());
    }

    #[test]
    fn test_evicts_oldest_terminal_when_full() {
        let reg = TaskRegistry::new(2, 0);
        let old = reg.create(TaskKind::Content).unwrap();
        reg.transition(&old.id, TaskUpdate::Failed("x".into()))
            .unwrap();
        let live = reg.create(TaskKind::Content).unwrap();

        let fresh = reg.create(TaskKind::Content).unwrap();
        assert_eq!(reg.len(), 2);
        assert!(reg.get(&old.id).is_err());
        assert!(reg.get(&live.id).is_ok());
        assert!(reg.get(&fresh.id).is_ok());
    }

    #[test]
    fn test_purge_keeps_live_tasks() {
        let reg = TaskRegistry::new(0, 60);
        let done = reg.create(TaskKind::Content).unwrap();
        reg.transition(&done.id, TaskUpdate::Failed("x".into()))
            .unwrap();
        let live = reg.create(TaskKind::Content).unwrap();

        let removed = reg.purge_terminal_before(Utc::now() + Duration::seconds(120));
        assert_eq!(removed, 1);
        assert!(reg.get(&live.id).is_ok());
    }

    #[test]
    fn test_counts() {
        let reg = TaskRegistry::new(0, 0);
        let a = reg.create(TaskKind::Content).unwrap();
        reg.create(TaskKind::Content).unwrap();
        reg.transition(&a.id, TaskUpdate::Processing).unwrap();
        let c = reg.counts();
        assert_eq!(c.queued, 1);
        assert_eq!(c.processing, 1);
        assert_eq!(c.completed + c.failed, 0);
    }
}
