//! Bounded worker pool for pipeline jobs.
//!
//! A `flume` channel of `queue_capacity` slots feeds `max_workers` long-lived
//! worker loops. Submission never blocks: when the queue is full the task
//! is marked FAILED and the caller gets [`Error::Overloaded`].
//!
//! Each job runs in its own spawned tokio task so that a panic inside a
//! pipeline surfaces as a `JoinError` and is recorded on the task instead
//! of killing the worker loop. The pool owns every registry transition of a
//! job after submission: QUEUED → PROCESSING when a worker picks it up,
//! then COMPLETED or FAILED from the job's outcome.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use knowledge_harness_core::{Error, Result};

use crate::config::WorkersConfig;
use crate::tasks::{Task, TaskKind, TaskRegistry, TaskResult, TaskUpdate};

type JobFuture = Pin<Box<dyn Future<Output = Result<TaskResult>> + Send + 'static>>;

struct QueuedJob {
    task_id: String,
    kind: TaskKind,
    future: JobFuture,
}

/// Fixed-size pool of workers draining a bounded job queue.
pub struct WorkerPool {
    registry: Arc<TaskRegistry>,
    sender: Mutex<Option<flume::Sender<QueuedJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    queue_capacity: usize,
}

impl WorkerPool {
    /// Start `max_workers` worker loops. Must be called inside a tokio
    /// runtime.
    pub fn start(registry: Arc<TaskRegistry>, max_workers: usize, queue_capacity: usize) -> Self {
        let max_workers = max_workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = flume::bounded::<QueuedJob>(queue_capacity);

        let workers = (0..max_workers)
            .map(|i| {
                let rx = rx.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    debug!(worker = i, "worker started");
                    while let Ok(job) = rx.recv_async().await {
                        run_job(&registry, job).await;
                    }
                    debug!(worker = i, "worker stopped");
                })
            })
            .collect();

        info!(max_workers, queue_capacity, "worker pool started");

        Self {
            registry,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            queue_capacity,
        }
    }

    pub fn from_config(registry: Arc<TaskRegistry>, config: &WorkersConfig) -> Self {
        Self::start(registry, config.max_workers, config.queue_capacity)
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Jobs waiting for a worker.
    pub fn queued_jobs(&self) -> usize {
        self.sender.lock().as_ref().map(|s| s.len()).unwrap_or(0)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Register a task of `kind` and queue the job built by `make_job`.
    ///
    /// `make_job` receives the new task id. On success the returned
    /// snapshot is still QUEUED; the caller polls the registry for
    /// progress.
    pub fn submit<F, Fut>(&self, kind: TaskKind, make_job: F) -> Result<Task>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<TaskResult>> + Send + 'static,
    {
        let task = self.registry.create(kind)?;
        let job = QueuedJob {
            task_id: task.id.clone(),
            kind,
            future: Box::pin(make_job(task.id.clone())),
        };

        let sent = match self.sender.lock().as_ref() {
            Some(tx) => tx.try_send(job).map_err(|e| match e {
                flume::TrySendError::Full(_) => "job queue is full",
                flume::TrySendError::Disconnected(_) => "worker pool is shut down",
            }),
            None => Err("worker pool is shut down"),
        };

        match sent {
            Ok(()) => {
                debug!(task_id = %task.id, %kind, "job queued");
                Ok(task)
            }
            Err(reason) => {
                warn!(task_id = %task.id, %kind, reason, "rejecting job");
                if let Err(e) = self
                    .registry
                    .transition(&task.id, TaskUpdate::Failed(reason.to_string()))
                {
                    warn!(task_id = %task.id, error = %e, "could not fail rejected task");
                }
                Err(Error::Overloaded(reason.to_string()))
            }
        }
    }

    /// Stop accepting jobs, let the workers drain the queue, and wait for
    /// them to exit.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "worker loop terminated abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

async fn run_job(registry: &TaskRegistry, job: QueuedJob) {
    let QueuedJob {
        task_id,
        kind,
        future,
    } = job;
    let span = tracing::info_span!("task", task_id = %task_id, %kind);

    async move {
        if let Err(e) = registry.transition(&task_id, TaskUpdate::Processing) {
            warn!(error = %e, "skipping job whose task cannot start");
            return;
        }

        let update = match tokio::spawn(future.in_current_span()).await {
            Ok(Ok(result)) => {
                info!(result = result.reference(), "task completed");
                TaskUpdate::Completed(result)
            }
            Ok(Err(e)) => {
                error!(error = %e, "task failed");
                TaskUpdate::Failed(e.to_string())
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    "job panicked".to_string()
                } else {
                    format!("job aborted: {}", join_err)
                };
                error!(error = %message, "task failed");
                TaskUpdate::Failed(message)
            }
        };

        if let Err(e) = registry.transition(&task_id, update) {
            warn!(error = %e, "could not record task outcome");
        }
    }
    .instrument(span)
    .await
}
