//! Shade worker: a self-registering compute node for orchestration engines.

pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod processing;
pub mod registration;
pub mod routes;
pub mod selftest;
pub mod service;
pub mod storage;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use config::WorkerConfig;
pub use error::{Error, Result};
pub use lifecycle::{LifecycleCoordinator, LifecyclePhase};
