//! reqwest-backed engine client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{EngineClient, EngineEndpoint};
use crate::error::EngineError;
use crate::service::ServiceDescriptor;
use crate::tasks::model::TaskReport;

/// Talks to engines over plain JSON/HTTP.
///
/// - announce: `POST {engine}/services` with the descriptor
/// - deregister: `DELETE {engine}/services/{slug}`
/// - report: `PATCH {callback_url}` with the task report
#[derive(Debug, Clone)]
pub struct HttpEngineClient {
    client: reqwest::Client,
}

impl HttpEngineClient {
    /// Every request is bounded by `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Turn a non-2xx response into a readable reason.
    async fn failure_reason(resp: reqwest::Response) -> String {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if body.is_empty() {
            format!("engine answered {status}")
        } else {
            format!("engine answered {status}: {body}")
        }
    }
}

#[async_trait]
impl EngineClient for HttpEngineClient {
    async fn announce(
        &self,
        descriptor: &ServiceDescriptor,
        endpoint: &EngineEndpoint,
    ) -> Result<(), EngineError> {
        let url = endpoint.join("services");
        debug!(url = %url, slug = %descriptor.slug, "Sending announcement");

        let fail = |reason: String| EngineError::AnnouncementFailure {
            endpoint: endpoint.to_string(),
            reason,
        };

        let resp = self
            .client
            .post(&url)
            .json(descriptor)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(fail(Self::failure_reason(resp).await))
        }
    }

    async fn deregister(
        &self,
        descriptor: &ServiceDescriptor,
        endpoint: &EngineEndpoint,
    ) -> Result<(), EngineError> {
        let url = endpoint.join(&format!("services/{}", descriptor.slug));
        debug!(url = %url, "Sending deregistration");

        let fail = |reason: String| EngineError::DeregistrationFailure {
            endpoint: endpoint.to_string(),
            reason,
        };

        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(fail(Self::failure_reason(resp).await))
        }
    }

    async fn report(&self, destination: &str, report: &TaskReport) -> Result<(), EngineError> {
        debug!(destination = %destination, task_id = %report.task_id, "Reporting task");

        let fail = |reason: String| EngineError::ReportFailure {
            task_id: report.task_id,
            destination: destination.to_string(),
            reason,
        };

        let resp = self
            .client
            .patch(destination)
            .json(report)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(fail(Self::failure_reason(resp).await))
        }
    }
}
