//! HTTP surface: task intake, status and self-test.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::{SelfTestError, TaskError};
use crate::processing::ProcessingUnit;
use crate::selftest::{self, SelfTestRunner};
use crate::service::ServiceStatus;
use crate::tasks::{Task, TaskExecutor, TaskQueue};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<TaskExecutor>,
    pub queue: TaskQueue,
    pub unit: Arc<dyn ProcessingUnit>,
    /// Where `/test` looks for fixtures.
    pub test_data_dir: Arc<PathBuf>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/compute", post(compute))
        .route("/process", post(process))
        .route("/status", get(status))
        .route("/service", get(service))
        .route("/test", get(self_test))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn error_response(err: TaskError) -> Response {
    let status = match &err {
        TaskError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        TaskError::MissingInput { .. } => StatusCode::BAD_REQUEST,
        TaskError::QueueFull { .. } | TaskError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
        TaskError::Processing { .. } | TaskError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn accepting(state: &AppState) -> Result<(), TaskError> {
    if state.executor.descriptor().status() == ServiceStatus::Unavailable {
        return Err(TaskError::Stopped);
    }
    Ok(())
}

// ── Intake ──────────────────────────────────────────────────────────────

/// Queue a task dispatched by an engine. The result goes to its callback.
async fn compute(State(state): State<AppState>, Json(task): Json<Task>) -> Response {
    let queued = accepting(&state)
        .and_then(|()| state.executor.validate(&task))
        .and_then(|()| state.queue.dispatch(task));

    match queued {
        Ok(task_id) => {
            info!(task_id = %task_id, "Task accepted");
            Json(serde_json::json!({ "task_id": task_id, "status": "queued" })).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Task rejected");
            error_response(e)
        }
    }
}

/// Run a task inline and answer with its result.
async fn process(State(state): State<AppState>, Json(task): Json<Task>) -> Response {
    if let Err(e) = accepting(&state) {
        return error_response(e);
    }
    match state.executor.submit(task).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

// ── Introspection ───────────────────────────────────────────────────────

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "status": state.executor.descriptor().status() }))
}

async fn service(State(state): State<AppState>) -> Response {
    Json(state.executor.descriptor().as_ref()).into_response()
}

// ── Self-test ───────────────────────────────────────────────────────────

async fn self_test(State(state): State<AppState>) -> Response {
    let manifest = state.unit.manifest();
    let (Some(input), Some(output)) = (
        manifest.data_in_fields.first(),
        manifest.data_out_fields.first(),
    ) else {
        warn!("Processing unit declares no fields to self-test");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "unit declares no input or output field" })),
        )
            .into_response();
    };
    let (input, output) = (input.name.clone(), output.name.clone());

    let unit = Arc::clone(&state.unit);
    let dir = Arc::clone(&state.test_data_dir);
    let outcome = tokio::task::spawn_blocking(move || {
        let cases = selftest::discover(&dir, &input, &output)?;
        Ok::<_, SelfTestError>(SelfTestRunner::new(unit, cases).run())
    })
    .await;

    match outcome {
        Ok(Ok(report)) if report.all_passed => StatusCode::NO_CONTENT.into_response(),
        Ok(Ok(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(Err(e)) => {
            warn!(error = %e, "Could not load self-test fixtures");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "Self-test task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
