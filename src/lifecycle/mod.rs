//! Process lifecycle: wires the components together and owns start/stop.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::engine::EngineClient;
use crate::error::{LifecycleError, Result};
use crate::processing::ProcessingUnit;
use crate::registration::RegistrationManager;
use crate::routes::{self, AppState};
use crate::service::ServiceDescriptor;
use crate::storage::Storage;
use crate::tasks::{Task, TaskExecutor, TaskQueue, spawn_intake};

/// Phase of the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    Init,
    Starting,
    Serving,
    Stopping,
    Stopped,
}

impl LifecyclePhase {
    /// Only adjacent forward moves are legal.
    pub fn can_transition_to(&self, target: LifecyclePhase) -> bool {
        use LifecyclePhase::*;

        matches!(
            (self, target),
            (Init, Starting) | (Starting, Serving) | (Serving, Stopping) | (Stopping, Stopped)
        )
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Starting => "starting",
            Self::Serving => "serving",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

#[derive(Default)]
struct Background {
    intake_rx: Option<mpsc::Receiver<Task>>,
    intake: Option<JoinHandle<()>>,
    announce: Option<JoinHandle<()>>,
}

/// Owns every long-lived component of the worker.
pub struct LifecycleCoordinator {
    config: WorkerConfig,
    unit: Arc<dyn ProcessingUnit>,
    engine: Arc<dyn EngineClient>,
    descriptor: Arc<ServiceDescriptor>,
    executor: Arc<TaskExecutor>,
    queue: TaskQueue,
    registration: Arc<RegistrationManager>,
    shutdown_tx: watch::Sender<bool>,
    phase: RwLock<LifecyclePhase>,
    background: Mutex<Background>,
}

impl LifecycleCoordinator {
    pub fn new(
        config: WorkerConfig,
        unit: Arc<dyn ProcessingUnit>,
        storage: Arc<dyn Storage>,
        engine: Arc<dyn EngineClient>,
    ) -> Self {
        let descriptor = Arc::new(ServiceDescriptor::from_manifest(
            unit.manifest(),
            config.service_url.clone(),
        ));
        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&unit),
            storage,
            Arc::clone(&descriptor),
        ));
        let (queue, intake_rx) = TaskQueue::bounded(config.max_tasks);
        let registration = Arc::new(RegistrationManager::new(
            Arc::clone(&engine),
            config.engine_urls.clone(),
            config.announce_retries,
            config.announce_retry_delay,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            unit,
            engine,
            descriptor,
            executor,
            queue,
            registration,
            shutdown_tx,
            phase: RwLock::new(LifecyclePhase::Init),
            background: Mutex::new(Background {
                intake_rx: Some(intake_rx),
                ..Default::default()
            }),
        }
    }

    pub async fn phase(&self) -> LifecyclePhase {
        *self.phase.read().await
    }

    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    pub fn registration(&self) -> &Arc<RegistrationManager> {
        &self.registration
    }

    fn advance(
        phase: &mut LifecyclePhase,
        to: LifecyclePhase,
    ) -> std::result::Result<(), LifecycleError> {
        if !phase.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition {
                from: phase.to_string(),
                to: to.to_string(),
            });
        }
        info!(from = %phase, to = %to, "Lifecycle transition");
        *phase = to;
        Ok(())
    }

    /// Start the intake loop and announce to every engine in the background.
    /// Returns without waiting for any announcement.
    pub async fn start(&self) -> std::result::Result<(), LifecycleError> {
        let mut phase = self.phase.write().await;
        Self::advance(&mut phase, LifecyclePhase::Starting)?;

        let mut background = self.background.lock().await;
        if let Some(rx) = background.intake_rx.take() {
            background.intake = Some(spawn_intake(
                Arc::clone(&self.executor),
                Arc::clone(&self.engine),
                rx,
                self.shutdown_tx.subscribe(),
            ));
        }

        let registration = Arc::clone(&self.registration);
        let descriptor = Arc::clone(&self.descriptor);
        background.announce = Some(tokio::spawn(async move {
            let outcomes = registration.announce_all(&descriptor).await;
            let announced = outcomes.iter().filter(|(_, ok)| *ok).count();
            info!(announced, engines = outcomes.len(), "Announcement round finished");
        }));

        Self::advance(&mut phase, LifecyclePhase::Serving)?;
        info!(
            slug = %self.descriptor.slug,
            url = %self.descriptor.url,
            engines = self.registration.endpoints().len(),
            "Worker serving"
        );
        Ok(())
    }

    /// Stop accepting work, abandon pending announcements and deregister.
    ///
    /// Deregistration and the intake drain share one `shutdown_timeout`.
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) -> std::result::Result<(), LifecycleError> {
        {
            let mut phase = self.phase.write().await;
            match *phase {
                LifecyclePhase::Init => {
                    info!("Shutdown requested before start, nothing to undo");
                    return Ok(());
                }
                LifecyclePhase::Stopping | LifecyclePhase::Stopped => return Ok(()),
                _ => Self::advance(&mut phase, LifecyclePhase::Stopping)?,
            }
        }

        self.descriptor.status.mark_unavailable();
        let _ = self.shutdown_tx.send(true);

        let (intake, announce) = {
            let mut background = self.background.lock().await;
            (background.intake.take(), background.announce.take())
        };
        if let Some(announce) = announce {
            if !announce.is_finished() {
                info!("Abandoning in-flight announcements");
            }
            announce.abort();
        }

        let limit = self.config.shutdown_timeout;
        let registration = Arc::clone(&self.registration);
        let descriptor = Arc::clone(&self.descriptor);
        let drain = async move {
            let outcomes = registration.deregister_all(&descriptor).await;
            let failed = outcomes.iter().filter(|(_, ok)| !*ok).count();
            if failed > 0 {
                warn!(failed, "Some engines could not be told we are leaving");
            }
            if let Some(intake) = intake {
                if let Err(e) = intake.await {
                    warn!(error = %e, "Intake loop ended abnormally");
                }
            }
        };

        let outcome = tokio::time::timeout(limit, drain).await;

        *self.phase.write().await = LifecyclePhase::Stopped;
        info!("Worker stopped");

        outcome.map_err(|_| {
            warn!(timeout = ?limit, "Shutdown exceeded its time budget");
            LifecycleError::ShutdownTimedOut(limit)
        })
    }

    /// HTTP surface bound to this coordinator's components.
    pub fn router(&self) -> axum::Router {
        routes::router(AppState {
            executor: Arc::clone(&self.executor),
            queue: self.queue.clone(),
            unit: Arc::clone(&self.unit),
            test_data_dir: Arc::new(self.config.test_data_dir.clone()),
        })
    }

    /// Start, serve until `signal` resolves, then shut down.
    pub async fn run<F>(&self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.start().await?;

        let addr = listener.local_addr()?;
        info!(addr = %addr, "HTTP server listening");
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await;

        // Deregister even if the server failed.
        let stopped = self.shutdown().await;
        served?;
        stopped?;
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
