use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::metrics;
use crate::models::{InferenceRequest, JobData};
use crate::queue::JobQueue;

// --- SHARED STATE ---
pub struct AppState {
    pub db: DbPool,
    pub queue: Arc<dyn JobQueue>,
}

// --- HANDLERS ---

async fn health_check() -> &'static str {
    "Ocelot v0.1.0 is running (SQLite + Redis)."
}

async fn handle_healthz(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let db_status = sqlx::query("SELECT 1").execute(&state.db).await;
    let redis_status = state.queue.ping().await;

    if db_status.is_ok() && redis_status.is_ok() {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "db": "connected",
                "redis": "connected"
            })),
        )
    } else {
        error!(
            "Health check failed: DB={:?}, Redis={:?}",
            db_status.as_ref().err(),
            redis_status.as_ref().err()
        );
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "status": "error",
                "db": if db_status.is_ok() { "connected" } else { "disconnected" },
                "redis": if redis_status.is_ok() { "connected" } else { "disconnected" }
            })),
        )
    }
}

async fn handle_metrics() -> String {
    metrics::get_metrics()
}

async fn handle_submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<InferenceRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    if let Err(e) = payload.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        );
    }

    let data = JobData {
        user_email: payload.user_email,
        call_cost: payload.call_cost,
        result_request_id: Uuid::new_v4().to_string(),
        model: payload.model,
        dataset: payload.dataset,
        images: payload.images,
        results: Vec::new(),
    };

    match state.queue.enqueue("inference", data).await {
        Ok(job) => {
            info!("Job {} enqueued successfully", job.id);
            metrics::inc_queued();
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "status": "queued",
                    "job_id": job.id,
                    "message": "Job added to processing queue"
                })),
            )
        }
        Err(e) => {
            error!("Queue error on submit: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Queue unavailable" })),
            )
        }
    }
}

async fn handle_get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.queue.get_job(&job_id).await {
        Ok(record) => (
            StatusCode::OK,
            Json(serde_json::to_value(&record).unwrap_or_default()),
        ),
        Err(e) if e.is_not_found() => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Job not found" })),
        ),
        Err(e) => {
            error!("Queue error get_job: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Queue error" })),
            )
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/healthz", get(handle_healthz))
        .route("/metrics", get(handle_metrics))
        .route("/jobs", post(handle_submit))
        .route("/jobs/:id", get(handle_get_job))
        .with_state(state)
}
