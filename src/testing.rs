//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;

use crate::engine::{EngineClient, EngineEndpoint};
use crate::error::{EngineError, ProcessingError};
use crate::processing::{AverageShade, ProcessingUnit};
use crate::service::{ServiceDescriptor, UnitManifest};
use crate::tasks::model::{FieldMap, TaskReport};

pub fn test_descriptor() -> ServiceDescriptor {
    ServiceDescriptor::from_manifest(AverageShade.manifest(), "http://worker:9090")
}

pub fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> image::RgbImage {
    image::RgbImage::from_pixel(width, height, image::Rgb(rgb))
}

pub fn encode_image(img: &image::RgbImage, format: image::ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

/// Processing unit driven by a closure, advertising the average-shade manifest.
pub struct FnUnit<F> {
    f: F,
}

impl<F> FnUnit<F>
where
    F: Fn(&FieldMap) -> Result<FieldMap, ProcessingError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ProcessingUnit for FnUnit<F>
where
    F: Fn(&FieldMap) -> Result<FieldMap, ProcessingError> + Send + Sync + 'static,
{
    fn manifest(&self) -> UnitManifest {
        AverageShade.manifest()
    }

    fn process(&self, inputs: &FieldMap) -> Result<FieldMap, ProcessingError> {
        (self.f)(inputs)
    }
}

#[derive(Default)]
struct MockState {
    announce_failures: HashMap<EngineEndpoint, u32>,
    announces: HashMap<EngineEndpoint, u32>,
    first_announce: HashMap<EngineEndpoint, Instant>,
    in_flight: HashMap<EngineEndpoint, u32>,
    max_in_flight: HashMap<EngineEndpoint, u32>,
    deregister_failures: HashSet<EngineEndpoint>,
    deregisters: HashMap<EngineEndpoint, u32>,
    reports: Vec<(String, TaskReport)>,
    report_failures: bool,
}

/// In-memory engine that records every call.
#[derive(Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `times` announcements to `endpoint`.
    pub fn fail_announces(&self, endpoint: &EngineEndpoint, times: u32) {
        self.state
            .lock()
            .unwrap()
            .announce_failures
            .insert(endpoint.clone(), times);
    }

    pub fn fail_deregisters(&self, endpoint: &EngineEndpoint) {
        self.state
            .lock()
            .unwrap()
            .deregister_failures
            .insert(endpoint.clone());
    }

    pub fn fail_reports(&self) {
        self.state.lock().unwrap().report_failures = true;
    }

    pub fn announce_calls(&self, endpoint: &EngineEndpoint) -> u32 {
        self.state
            .lock()
            .unwrap()
            .announces
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    pub fn first_announce_at(&self, endpoint: &EngineEndpoint) -> Option<Instant> {
        self.state
            .lock()
            .unwrap()
            .first_announce
            .get(endpoint)
            .copied()
    }

    pub fn max_concurrent_announces(&self, endpoint: &EngineEndpoint) -> u32 {
        self.state
            .lock()
            .unwrap()
            .max_in_flight
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    pub fn deregister_calls(&self, endpoint: &EngineEndpoint) -> u32 {
        self.state
            .lock()
            .unwrap()
            .deregisters
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    pub fn reports(&self) -> Vec<(String, TaskReport)> {
        self.state.lock().unwrap().reports.clone()
    }
}

#[async_trait]
impl EngineClient for MockEngine {
    async fn announce(
        &self,
        _descriptor: &ServiceDescriptor,
        endpoint: &EngineEndpoint,
    ) -> Result<(), EngineError> {
        let fail = {
            let mut state = self.state.lock().unwrap();
            *state.announces.entry(endpoint.clone()).or_default() += 1;
            state
                .first_announce
                .entry(endpoint.clone())
                .or_insert_with(Instant::now);
            let in_flight = state.in_flight.entry(endpoint.clone()).or_default();
            *in_flight += 1;
            let current = *in_flight;
            let max = state.max_in_flight.entry(endpoint.clone()).or_default();
            *max = (*max).max(current);

            match state.announce_failures.get_mut(endpoint) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        tokio::task::yield_now().await;

        if let Some(in_flight) = self.state.lock().unwrap().in_flight.get_mut(endpoint) {
            *in_flight -= 1;
        }

        if fail {
            Err(EngineError::AnnouncementFailure {
                endpoint: endpoint.to_string(),
                reason: "mock rejection".into(),
            })
        } else {
            Ok(())
        }
    }

    async fn deregister(
        &self,
        _descriptor: &ServiceDescriptor,
        endpoint: &EngineEndpoint,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        *state.deregisters.entry(endpoint.clone()).or_default() += 1;
        if state.deregister_failures.contains(endpoint) {
            return Err(EngineError::DeregistrationFailure {
                endpoint: endpoint.to_string(),
                reason: "mock unreachable".into(),
            });
        }
        Ok(())
    }

    async fn report(&self, destination: &str, report: &TaskReport) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.reports.push((destination.to_string(), report.clone()));
        if state.report_failures {
            return Err(EngineError::ReportFailure {
                task_id: report.task_id,
                destination: destination.to_string(),
                reason: "mock unreachable".into(),
            });
        }
        Ok(())
    }
}
