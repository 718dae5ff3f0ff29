//! REST API module
//!
//! TigerStyle: Thin handlers over the registry, errors mapped in one place.

pub mod registry;

use crate::models::{ErrorResponse, HealthResponse};
use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use courier_registry::RegistryError;
use std::fmt::Write as _;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the API router with all routes
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .nest("/registry", registry::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// Prometheus text exposition of the registry counters
async fn metrics(State(state): State<AppState>) -> Response {
    let stats = state.registry().stats();
    let counters: [(&str, &str, u64); 9] = [
        ("registrations", "Instance registration calls", stats.registrations),
        ("assignments_cached", "Assignments served from an existing binding", stats.assignments_cached),
        ("assignments_bound", "New bindings created", stats.assignments_bound),
        ("assignment_failures", "Assignments that found no live instance", stats.assignment_failures),
        ("dead_candidates", "Selection draws that hit a dead instance", stats.dead_candidates),
        ("evictions", "Instances removed from the pool", stats.evictions),
        ("users_released", "Bindings deleted by eviction", stats.users_released),
        ("store_errors_absorbed", "Store failures tolerated during assignment", stats.store_errors_absorbed),
        ("expirations_handled", "Heartbeat expirations processed", stats.expirations_handled),
    ];

    let mut text = String::new();
    for (name, help, value) in counters {
        let _ = write!(
            text,
            "# HELP courier_{name}_total {help}\n\
             # TYPE courier_{name}_total counter\n\
             courier_{name}_total {value}\n\n"
        );
    }
    let _ = write!(
        text,
        "# HELP courier_server_uptime_seconds Server uptime in seconds\n\
         # TYPE courier_server_uptime_seconds gauge\n\
         courier_server_uptime_seconds {}\n",
        state.uptime_seconds()
    );

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        text,
    )
        .into_response()
}

/// API error type that converts to HTTP responses
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse::bad_request(message),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorResponse::internal(message),
        }
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: ErrorResponse::new("store_unavailable", message),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.body.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        if err.is_invalid_input() {
            return ApiError::bad_request(err.to_string());
        }
        match err {
            RegistryError::NoInstanceAvailable {
                ref user_id,
                candidates_checked,
                reason,
            } => {
                let details = serde_json::json!({
                    "user_id": user_id,
                    "candidates_checked": candidates_checked,
                    "reason": reason,
                });
                ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: ErrorResponse::new("no_instance_available", err.to_string())
                        .with_details(details),
                }
            }
            RegistryError::Store(e) => {
                tracing::warn!(error = %e, "Store failure surfaced to caller");
                ApiError::store_unavailable(e.to_string())
            }
            other => ApiError::internal(other.to_string()),
        }
    }
}
