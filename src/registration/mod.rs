//! Registration with remote engines: announce on startup, deregister on exit.
//!
//! Every endpoint gets its own independent attempt sequence. A failing engine
//! only costs its own retries; it never delays or cancels the others.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::engine::{EngineClient, EngineEndpoint};
use crate::service::ServiceDescriptor;

/// Progress of one endpoint's announce sequence.
#[derive(Debug, Clone)]
pub struct AnnouncementAttempt {
    pub endpoint: EngineEndpoint,
    pub retries_remaining: u32,
    /// Announce calls issued so far.
    pub attempts: u32,
    /// Delays slept between attempts.
    pub delays: u32,
    pub announced: bool,
    /// No further attempt will be made.
    pub terminal: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl AnnouncementAttempt {
    fn new(endpoint: EngineEndpoint, max_retries: u32) -> Self {
        Self {
            endpoint,
            retries_remaining: max_retries,
            attempts: 0,
            delays: 0,
            announced: false,
            terminal: max_retries == 0,
            last_attempt_at: None,
        }
    }

    fn record(&mut self, announced: bool) {
        self.attempts += 1;
        self.retries_remaining = self.retries_remaining.saturating_sub(1);
        self.announced = announced;
        self.terminal = announced || self.retries_remaining == 0;
        self.last_attempt_at = Some(Utc::now());
    }
}

/// Marks an endpoint as having an announce sequence in flight until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<EngineEndpoint>>,
    endpoint: EngineEndpoint,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a Mutex<HashSet<EngineEndpoint>>, endpoint: &EngineEndpoint) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !guard.insert(endpoint.clone()) {
            return None;
        }
        Some(Self {
            set,
            endpoint: endpoint.clone(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut guard = self
            .set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.remove(&self.endpoint);
    }
}

/// Announces a descriptor to a fixed set of engines and withdraws it again.
pub struct RegistrationManager {
    client: Arc<dyn EngineClient>,
    endpoints: Vec<EngineEndpoint>,
    max_retries: u32,
    retry_delay: Duration,
    in_flight: Mutex<HashSet<EngineEndpoint>>,
}

impl RegistrationManager {
    pub fn new(
        client: Arc<dyn EngineClient>,
        endpoints: Vec<EngineEndpoint>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        let mut unique: Vec<EngineEndpoint> = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            if !unique.contains(&endpoint) {
                unique.push(endpoint);
            }
        }

        Self {
            client,
            endpoints: unique,
            max_retries,
            retry_delay,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn endpoints(&self) -> &[EngineEndpoint] {
        &self.endpoints
    }

    /// One announce call. Returns whether the engine accepted it.
    pub async fn announce(&self, descriptor: &ServiceDescriptor, endpoint: &EngineEndpoint) -> bool {
        match self.client.announce(descriptor, endpoint).await {
            Ok(()) => {
                info!(endpoint = %endpoint, slug = %descriptor.slug, "Service announced");
                true
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Announcement rejected");
                false
            }
        }
    }

    /// Announce with at most `max_retries` attempts and a fixed `delay`
    /// between consecutive attempts.
    pub async fn announce_with_retry(
        &self,
        descriptor: &ServiceDescriptor,
        endpoint: &EngineEndpoint,
        max_retries: u32,
        delay: Duration,
    ) -> bool {
        self.run_announcement(descriptor, endpoint, max_retries, delay)
            .await
            .announced
    }

    pub(crate) async fn run_announcement(
        &self,
        descriptor: &ServiceDescriptor,
        endpoint: &EngineEndpoint,
        max_retries: u32,
        delay: Duration,
    ) -> AnnouncementAttempt {
        let mut attempt = AnnouncementAttempt::new(endpoint.clone(), max_retries);

        let Some(_in_flight) = InFlight::acquire(&self.in_flight, endpoint) else {
            warn!(endpoint = %endpoint, "Announcement already in progress, skipping");
            attempt.terminal = true;
            return attempt;
        };

        while !attempt.terminal {
            if attempt.attempts > 0 {
                debug!(
                    endpoint = %endpoint,
                    delay_ms = delay.as_millis() as u64,
                    "Waiting before next announcement attempt"
                );
                tokio::time::sleep(delay).await;
                attempt.delays += 1;
            }

            info!(
                endpoint = %endpoint,
                attempt = attempt.attempts + 1,
                max = max_retries,
                "Announcing service"
            );
            let announced = self.announce(descriptor, endpoint).await;
            attempt.record(announced);
        }

        if !attempt.announced {
            warn!(
                endpoint = %endpoint,
                attempts = attempt.attempts,
                "Aborting service announcement after {} retries",
                max_retries
            );
        }
        attempt
    }

    /// Announce to every endpoint concurrently using the configured retry
    /// policy. Outcomes come back in endpoint order.
    pub async fn announce_all(&self, descriptor: &ServiceDescriptor) -> Vec<(EngineEndpoint, bool)> {
        let sequences = self.endpoints.iter().map(|endpoint| async move {
            let announced = self
                .announce_with_retry(descriptor, endpoint, self.max_retries, self.retry_delay)
                .await;
            (endpoint.clone(), announced)
        });
        join_all(sequences).await
    }

    /// Best-effort shutdown notice. Errors are logged, never returned.
    pub async fn deregister(&self, descriptor: &ServiceDescriptor, endpoint: &EngineEndpoint) -> bool {
        match self.client.deregister(descriptor, endpoint).await {
            Ok(()) => {
                info!(endpoint = %endpoint, slug = %descriptor.slug, "Service deregistered");
                true
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Deregistration failed");
                false
            }
        }
    }

    /// Deregister from every endpoint concurrently; each one is attempted
    /// whatever happens to the others.
    pub async fn deregister_all(&self, descriptor: &ServiceDescriptor) -> Vec<(EngineEndpoint, bool)> {
        let notices = self.endpoints.iter().map(|endpoint| async move {
            (endpoint.clone(), self.deregister(descriptor, endpoint).await)
        });
        join_all(notices).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::testing::{MockEngine, test_descriptor};

    fn endpoint(name: &str) -> EngineEndpoint {
        EngineEndpoint::parse(&format!("http://{name}:8080")).unwrap()
    }

    fn manager(engine: &Arc<MockEngine>, endpoints: Vec<EngineEndpoint>) -> RegistrationManager {
        RegistrationManager::new(
            Arc::clone(engine) as Arc<dyn EngineClient>,
            endpoints,
            3,
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn succeeds_on_first_acceptance() {
        let engine = Arc::new(MockEngine::new());
        let a = endpoint("a");
        let registration = manager(&engine, vec![a.clone()]);
        let descriptor = test_descriptor();

        let attempt = registration
            .run_announcement(&descriptor, &a, 4, Duration::from_millis(1))
            .await;
        assert!(attempt.announced);
        assert_eq!(attempt.attempts, 1);
        assert_eq!(attempt.delays, 0);
        assert_eq!(engine.announce_calls(&a), 1);
    }

    #[tokio::test]
    async fn retries_until_accepted() {
        let engine = Arc::new(MockEngine::new());
        let a = endpoint("a");
        engine.fail_announces(&a, 2);
        let registration = manager(&engine, vec![a.clone()]);
        let descriptor = test_descriptor();

        let attempt = registration
            .run_announcement(&descriptor, &a, 5, Duration::from_millis(1))
            .await;
        assert!(attempt.announced);
        assert_eq!(attempt.attempts, 3);
        assert_eq!(attempt.delays, 2);
        assert_eq!(attempt.retries_remaining, 2);
    }

    #[tokio::test]
    async fn gives_up_after_n_attempts_with_n_minus_one_delays() {
        let engine = Arc::new(MockEngine::new());
        let a = endpoint("a");
        engine.fail_announces(&a, u32::MAX);
        let registration = manager(&engine, vec![a.clone()]);
        let descriptor = test_descriptor();

        let attempt = registration
            .run_announcement(&descriptor, &a, 4, Duration::from_millis(1))
            .await;
        assert!(!attempt.announced);
        assert!(attempt.terminal);
        assert_eq!(attempt.attempts, 4);
        assert_eq!(attempt.delays, 3);
        assert_eq!(engine.announce_calls(&a), 4);

        assert!(
            !registration
                .announce_with_retry(&descriptor, &a, 2, Duration::from_millis(1))
                .await
        );
        assert_eq!(engine.announce_calls(&a), 6);
    }

    #[tokio::test]
    async fn zero_retries_makes_no_attempt() {
        let engine = Arc::new(MockEngine::new());
        let a = endpoint("a");
        let registration = manager(&engine, vec![a.clone()]);

        let announced = registration
            .announce_with_retry(&test_descriptor(), &a, 0, Duration::from_millis(1))
            .await;
        assert!(!announced);
        assert_eq!(engine.announce_calls(&a), 0);
    }

    #[tokio::test]
    async fn failing_endpoint_does_not_block_others() {
        let engine = Arc::new(MockEngine::new());
        let (a, b) = (endpoint("a"), endpoint("b"));
        engine.fail_announces(&a, u32::MAX);
        let registration = RegistrationManager::new(
            Arc::clone(&engine) as Arc<dyn EngineClient>,
            vec![a.clone(), b.clone()],
            3,
            Duration::from_millis(200),
        );

        let started = Instant::now();
        let outcomes = registration.announce_all(&test_descriptor()).await;
        assert_eq!(outcomes, vec![(a.clone(), false), (b.clone(), true)]);
        assert_eq!(engine.announce_calls(&a), 3);
        assert_eq!(engine.announce_calls(&b), 1);

        // b answered right away even though a spent two delays retrying.
        let b_done = engine.first_announce_at(&b).unwrap();
        assert!(b_done.duration_since(started) < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn duplicate_endpoints_are_announced_once() {
        let engine = Arc::new(MockEngine::new());
        let a = endpoint("a");
        let registration = manager(&engine, vec![a.clone(), a.clone()]);
        assert_eq!(registration.endpoints().len(), 1);

        registration.announce_all(&test_descriptor()).await;
        assert_eq!(engine.announce_calls(&a), 1);
        assert_eq!(engine.max_concurrent_announces(&a), 1);
    }

    #[tokio::test]
    async fn concurrent_sequences_for_one_endpoint_are_refused() {
        let engine = Arc::new(MockEngine::new());
        let a = endpoint("a");
        engine.fail_announces(&a, 1);
        let registration = manager(&engine, vec![a.clone()]);
        let descriptor = test_descriptor();

        let (first, second) = tokio::join!(
            registration.run_announcement(&descriptor, &a, 3, Duration::from_millis(20)),
            registration.run_announcement(&descriptor, &a, 3, Duration::from_millis(20)),
        );
        assert!(first.announced ^ second.announced);
        assert_eq!(engine.max_concurrent_announces(&a), 1);
    }

    #[tokio::test]
    async fn deregister_attempts_every_endpoint() {
        let engine = Arc::new(MockEngine::new());
        let (a, b, c) = (endpoint("a"), endpoint("b"), endpoint("c"));
        engine.fail_deregisters(&a);
        let registration = manager(&engine, vec![a.clone(), b.clone(), c.clone()]);

        let outcomes = registration.deregister_all(&test_descriptor()).await;
        assert_eq!(outcomes, vec![(a.clone(), false), (b.clone(), true), (c.clone(), true)]);
        for e in [&a, &b, &c] {
            assert_eq!(engine.deregister_calls(e), 1);
        }
    }
}
