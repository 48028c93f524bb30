//! Task execution: validate, resolve, run the unit, persist.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{FieldMap, Task, TaskData, TaskPayload, TaskResult};
use crate::error::TaskError;
use crate::processing::ProcessingUnit;
use crate::service::ServiceDescriptor;
use crate::storage::Storage;

/// Flips the descriptor to busy for as long as it lives.
struct BusyGuard {
    descriptor: Arc<ServiceDescriptor>,
    entered: bool,
}

impl BusyGuard {
    fn enter(descriptor: Arc<ServiceDescriptor>) -> Self {
        let entered = descriptor.status.mark_busy();
        Self {
            descriptor,
            entered,
        }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if self.entered {
            self.descriptor.status.mark_idle();
        }
    }
}

/// Runs dispatched tasks through a processing unit.
///
/// One task holds the processing permit at a time, which keeps the descriptor
/// status single-writer. The permit and the busy flag travel with the blocking
/// work, so dropping a caller mid-task releases neither early. A failing or
/// panicking unit fails only its own task.
pub struct TaskExecutor {
    unit: Arc<dyn ProcessingUnit>,
    storage: Arc<dyn Storage>,
    descriptor: Arc<ServiceDescriptor>,
    permit: Arc<Mutex<()>>,
}

impl TaskExecutor {
    pub fn new(
        unit: Arc<dyn ProcessingUnit>,
        storage: Arc<dyn Storage>,
        descriptor: Arc<ServiceDescriptor>,
    ) -> Self {
        Self {
            unit,
            storage,
            descriptor,
            permit: Arc::new(Mutex::new(())),
        }
    }

    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Check a task against the declared input fields without running it.
    pub fn validate(&self, task: &Task) -> Result<(), TaskError> {
        for field in &self.descriptor.data_in_fields {
            let payload = task
                .data_in
                .get(&field.name)
                .ok_or_else(|| TaskError::MissingInput {
                    field: field.name.clone(),
                })?;

            if !field.accepts(payload.content_type()) {
                return Err(TaskError::UnsupportedMediaType {
                    field: field.name.clone(),
                    content_type: payload.content_type().to_string(),
                    accepted: field.accepted_list(),
                });
            }
        }

        for name in task.data_in.keys() {
            if self.descriptor.input_field(name).is_none() {
                debug!(task_id = %task.task_id, field = %name, "Ignoring undeclared input field");
            }
        }
        Ok(())
    }

    /// Execute one task end to end and return its persisted result.
    pub async fn submit(&self, task: Task) -> Result<TaskResult, TaskError> {
        let task_id = task.task_id;
        self.validate(&task)?;

        let inputs = self.resolve(&task).await?;
        let outputs = self.execute(task_id, inputs).await?;
        self.persist(task_id, outputs).await
    }

    /// Materialise declared inputs, fetching stored payloads.
    async fn resolve(&self, task: &Task) -> Result<FieldMap, TaskError> {
        let mut inputs = FieldMap::new();
        for field in &self.descriptor.data_in_fields {
            let Some(payload) = task.data_in.get(&field.name) else {
                continue;
            };
            let data = match payload {
                TaskPayload::Inline { content_type, data } => TaskData {
                    data: data.clone(),
                    content_type: content_type.clone(),
                },
                TaskPayload::Stored {
                    content_type,
                    handle,
                } => TaskData {
                    data: self.storage.retrieve(handle).await?,
                    content_type: content_type.clone(),
                },
            };
            inputs.insert(field.name.clone(), data);
        }
        Ok(inputs)
    }

    /// Run the unit on the blocking pool, converting errors and panics.
    async fn execute(&self, task_id: Uuid, inputs: FieldMap) -> Result<FieldMap, TaskError> {
        let permit = Arc::clone(&self.permit).lock_owned().await;
        let busy = BusyGuard::enter(Arc::clone(&self.descriptor));

        let started = Instant::now();
        let unit = Arc::clone(&self.unit);
        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _busy = busy;
            unit.process(&inputs)
        })
        .await;

        let outputs = match joined {
            Ok(Ok(outputs)) => outputs,
            Ok(Err(e)) => {
                warn!(task_id = %task_id, error = %e, "Processing unit returned an error");
                return Err(TaskError::Processing {
                    task_id,
                    reason: e.to_string(),
                });
            }
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "processing was cancelled".to_string()
                };
                warn!(task_id = %task_id, reason = %reason, "Processing unit panicked");
                return Err(TaskError::Processing { task_id, reason });
            }
        };

        for field in &self.descriptor.data_out_fields {
            let Some(data) = outputs.get(&field.name) else {
                return Err(TaskError::Processing {
                    task_id,
                    reason: format!("unit produced no {} output", field.name),
                });
            };
            if !field.accepts(&data.content_type) {
                return Err(TaskError::Processing {
                    task_id,
                    reason: format!(
                        "output {} has undeclared type {}",
                        field.name, data.content_type
                    ),
                });
            }
        }

        debug!(
            task_id = %task_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Processing finished"
        );
        Ok(outputs)
    }

    /// Store every output. Any failure fails the whole task.
    async fn persist(&self, task_id: Uuid, outputs: FieldMap) -> Result<TaskResult, TaskError> {
        let mut handles = BTreeMap::new();
        for (field, data) in &outputs {
            let handle = self.storage.store(data.data.clone()).await?;
            handles.insert(field.clone(), handle);
        }

        info!(task_id = %task_id, outputs = outputs.len(), "Task completed");
        Ok(TaskResult {
            task_id,
            outputs,
            handles,
        })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("unit panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("unit panicked: {s}")
    } else {
        "unit panicked".to_string()
    }
}
