//! Local HTTP surface for the bridge.
//!
//! - POST /v1/allergens
//! - GET /health
//! - GET /metrics
//!
//! The engine is not reentrant, so inference calls are serialized behind a
//! gate and run on the blocking pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::bridge::{BridgeResponse, ERROR_TAG};
use crate::config::Config;
use crate::inference::llama_ffi::InferenceBackend;
use crate::inference::runner::{
    InferenceError, InferenceRequest, InferenceRunner, StopReason,
};
use crate::inference::telemetry::Timings;
use crate::prompt::build_prompt;
use crate::server::metrics::BridgeMetrics;

/// Application state shared across handlers.
pub struct AppState<B> {
    pub runner: Arc<InferenceRunner<B>>,
    pub config: Arc<Config>,
    /// Held by the blocking task for the whole inference.
    pub gate: Arc<Mutex<()>>,
    pub metrics: BridgeMetrics,
    pub start_time: Instant,
}

impl<B: InferenceBackend> AppState<B> {
    pub fn new(runner: InferenceRunner<B>, metrics: BridgeMetrics) -> Self {
        let config = Arc::new(runner.config().clone());
        Self {
            runner: Arc::new(runner),
            config,
            gate: Arc::new(Mutex::new(())),
            metrics,
            start_time: Instant::now(),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router<B: InferenceBackend + 'static>(state: Arc<AppState<B>>) -> Router {
    Router::new()
        .route("/v1/allergens", post(allergens::<B>))
        .route("/health", get(health::<B>))
        .route("/metrics", get(metrics::<B>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Either a finished prompt or an ingredient list to wrap in the standard one.
#[derive(Debug, Deserialize)]
pub struct AllergenRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub ingredients: Option<String>,
    /// Overrides `server.model_path`.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct AllergenResponse {
    pub id: String,
    pub labels: Vec<String>,
    pub label_field: String,
    /// Same result in the `labels|metrics` boundary encoding.
    pub wire: String,
    pub raw_output: String,
    pub timings: Timings,
    pub stop_reason: StopReason,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub id: String,
    pub error: String,
    pub detail: String,
    pub wire: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub engine: String,
    pub default_model: Option<PathBuf>,
    pub n_ctx: u32,
    pub max_tokens: u32,
    pub labels: Vec<String>,
}

/// Handler failure rendered as JSON with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn bad_request(id: &str, detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse {
                id: id.to_string(),
                error: "Invalid Argument".to_string(),
                detail: detail.into(),
                wire: format!("{ERROR_TAG}|Invalid Argument"),
            },
        }
    }

    fn internal(id: &str, detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorResponse {
                id: id.to_string(),
                error: "Internal Panic".to_string(),
                detail: detail.into(),
                wire: format!("{ERROR_TAG}|Internal Panic"),
            },
        }
    }

    fn inference(id: &str, e: &InferenceError) -> Self {
        let status = match e {
            InferenceError::Tokenize(_) => StatusCode::UNPROCESSABLE_ENTITY,
            InferenceError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: ErrorResponse {
                id: id.to_string(),
                error: e.reason().to_string(),
                detail: e.to_string(),
                wire: format!("{ERROR_TAG}|{}", e.reason()),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn allergens<B: InferenceBackend + 'static>(
    State(state): State<Arc<AppState<B>>>,
    Json(req): Json<AllergenRequest>,
) -> Result<Json<AllergenResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();

    let prompt = match (req.prompt, req.ingredients) {
        (Some(prompt), None) => prompt,
        (None, Some(ingredients)) => build_prompt(&ingredients, state.runner.filter()),
        _ => {
            return Err(ApiError::bad_request(
                &request_id,
                "exactly one of `prompt` or `ingredients` is required",
            ))
        }
    };
    let model_path = req
        .model_path
        .or_else(|| state.config.server.model_path.clone())
        .ok_or_else(|| ApiError::bad_request(&request_id, "no model path given or configured"))?;

    info!(
        request_id = %request_id,
        model = %model_path.display(),
        prompt_bytes = prompt.len(),
        "Allergen request"
    );

    let request = InferenceRequest::new(prompt, model_path);
    let runner = state.runner.clone();
    let guard = state.gate.clone().lock_owned().await;
    let result = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        runner.run(&request)
    })
    .await;
    let result = match result {
        Ok(r) => r,
        Err(e) => {
            error!(request_id = %request_id, "Inference task failed: {e}");
            return Err(ApiError::internal(&request_id, e.to_string()));
        }
    };
    state.metrics.observe(&result);

    match result {
        Ok(r) => {
            let wire = BridgeResponse::Success {
                labels: r.label_field.clone(),
                timings: r.timings,
            }
            .to_string();
            Ok(Json(AllergenResponse {
                id: request_id,
                labels: r.labels,
                label_field: r.label_field,
                wire,
                raw_output: r.raw_output,
                timings: r.timings,
                stop_reason: r.stop_reason,
                prompt_tokens: r.prompt_tokens,
                generated_tokens: r.generated_tokens,
            }))
        }
        Err(e) => Err(ApiError::inference(&request_id, &e)),
    }
}

async fn health<B: InferenceBackend + 'static>(
    State(state): State<Arc<AppState<B>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        engine: state.runner.backend().name().to_string(),
        default_model: state.config.server.model_path.clone(),
        n_ctx: state.config.inference.n_ctx,
        max_tokens: state.config.inference.max_tokens,
        labels: state.runner.filter().labels().iter().map(str::to_string).collect(),
    })
}

async fn metrics<B: InferenceBackend + 'static>(
    State(state): State<Arc<AppState<B>>>,
) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Metrics encoding failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
