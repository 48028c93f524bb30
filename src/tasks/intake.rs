//! Task intake: the bounded queue and the loop that drains it.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::TaskExecutor;
use super::model::{Task, TaskReport};
use crate::engine::EngineClient;
use crate::error::TaskError;

/// Sending half of the intake queue.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<Task>,
    capacity: usize,
}

impl TaskQueue {
    /// Create a queue holding at most `capacity` pending tasks.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Task>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                capacity: capacity.max(1),
            },
            rx,
        )
    }

    /// Enqueue a task without waiting.
    pub fn dispatch(&self, task: Task) -> Result<Uuid, TaskError> {
        let task_id = task.task_id;
        self.tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TaskError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => TaskError::Stopped,
        })?;
        debug!(task_id = %task_id, "Task queued");
        Ok(task_id)
    }

    /// Tasks waiting to be picked up.
    pub fn pending(&self) -> usize {
        self.capacity - self.tx.capacity()
    }
}

/// Spawn the intake loop. It stops when `shutdown` flips to true or every
/// queue handle is dropped.
pub fn spawn_intake(
    executor: Arc<TaskExecutor>,
    engine: Arc<dyn EngineClient>,
    rx: mpsc::Receiver<Task>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_intake(executor, engine, rx, shutdown))
}

async fn run_intake(
    executor: Arc<TaskExecutor>,
    engine: Arc<dyn EngineClient>,
    mut rx: mpsc::Receiver<Task>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Task intake started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let task = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            next = rx.recv() => match next {
                Some(task) => task,
                None => break,
            },
        };

        handle_task(&executor, engine.as_ref(), task).await;
    }

    // Anything still queued will never run; let the engines know.
    rx.close();
    let mut abandoned = 0usize;
    while let Ok(task) = rx.try_recv() {
        abandoned += 1;
        if let Some(destination) = task.callback_url.as_deref() {
            let report = TaskReport::failed(task.task_id, TaskError::Stopped.to_string());
            if let Err(e) = engine.report(destination, &report).await {
                warn!(task_id = %task.task_id, error = %e, "Failed to report abandoned task");
            }
        }
    }

    info!(abandoned, "Task intake stopped");
}

/// Run one task and deliver its report. Never panics, never propagates.
async fn handle_task(executor: &TaskExecutor, engine: &dyn EngineClient, task: Task) {
    let task_id = task.task_id;
    let destination = task.callback_url.clone();

    let report = match executor.submit(task).await {
        Ok(result) => TaskReport::finished(&result),
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "Task failed");
            TaskReport::failed(task_id, e.to_string())
        }
    };

    match destination {
        Some(destination) => {
            if let Err(e) = engine.report(&destination, &report).await {
                warn!(task_id = %task_id, error = %e, "Failed to deliver task report");
            }
        }
        None => debug!(task_id = %task_id, "No callback for task, report dropped"),
    }
}
