//! Processing units: the pluggable, stateless computation a worker offers.

pub mod average_shade;

pub use average_shade::AverageShade;

use crate::error::ProcessingError;
use crate::service::UnitManifest;
use crate::tasks::model::FieldMap;

/// A pure mapping from input fields to output fields.
///
/// Implementations hold no per-task state and do no I/O, so the executor is
/// free to run them on the blocking pool and in parallel.
pub trait ProcessingUnit: Send + Sync + 'static {
    /// Static description used to build the service descriptor.
    fn manifest(&self) -> UnitManifest;

    /// Run the computation. Inputs have already been validated against the
    /// manifest's `data_in_fields`.
    fn process(&self, inputs: &FieldMap) -> Result<FieldMap, ProcessingError>;
}
