//! Service identity and status.

pub mod model;

pub use model::{
    ExecutionUnitTag, FieldDescription, FieldType, ServiceDescriptor, ServiceStatus, StatusCell,
    UnitManifest,
};
