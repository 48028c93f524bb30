//! Engine transport: the HTTP conversation with remote orchestration engines.

pub mod client;

pub use client::HttpEngineClient;

use std::fmt;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::service::ServiceDescriptor;
use crate::tasks::model::TaskReport;

/// A configured engine base URL, normalised without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineEndpoint(String);

impl EngineEndpoint {
    /// Validate an absolute http(s) URL.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let url = reqwest::Url::parse(raw.trim()).map_err(|e| format!("{raw}: {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("{raw}: engine URLs must use http or https"));
        }
        Ok(Self(url.as_str().trim_end_matches('/').to_string()))
    }

    pub fn localhost() -> Self {
        Self("http://localhost:8080".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join a path onto the endpoint.
    pub fn join(&self, path: &str) -> String {
        format!("{}/{}", self.0, path.trim_start_matches('/'))
    }
}

impl fmt::Display for EngineEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Calls a worker makes towards an engine.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Register the descriptor with the engine. `Ok` means the engine accepted it.
    async fn announce(
        &self,
        descriptor: &ServiceDescriptor,
        endpoint: &EngineEndpoint,
    ) -> Result<(), EngineError>;

    /// Tell the engine this worker is going away.
    async fn deregister(
        &self,
        descriptor: &ServiceDescriptor,
        endpoint: &EngineEndpoint,
    ) -> Result<(), EngineError>;

    /// Deliver the outcome of a task to its callback URL.
    async fn report(&self, destination: &str, report: &TaskReport) -> Result<(), EngineError>;
}
