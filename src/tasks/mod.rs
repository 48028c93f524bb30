//! Tasks: the wire model, the executor and the intake queue.

pub mod executor;
pub mod intake;
pub mod model;

pub use executor::TaskExecutor;
pub use intake::{TaskQueue, spawn_intake};
pub use model::{
    FieldMap, OutputRef, Task, TaskData, TaskPayload, TaskReport, TaskResult, TaskStatus,
};
