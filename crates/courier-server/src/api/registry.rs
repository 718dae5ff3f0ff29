//! Registry API endpoints
//!
//! TigerStyle: Identifiers validated at the boundary, before the registry sees them.

use crate::api::ApiError;
use crate::models::{AssignmentResponse, InstanceListResponse, InstanceSummary, RegisterQuery};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use courier_registry::{EvictionReport, InstanceAddress, InstanceId, ReconcileReport, UserId};
use tracing::instrument;

/// Create registry routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/service/:instance_id",
            post(register_instance).delete(evict_instance),
        )
        .route("/services", get(list_instances))
        .route("/user/:user_id", get(get_assignment))
        .route("/reconcile", post(reconcile))
}

/// Register an instance and its address
///
/// POST /registry/service/{instance_id}?address=
#[instrument(skip(state, query), fields(instance_id = %instance_id), level = "info")]
async fn register_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Query(query): Query<RegisterQuery>,
) -> Result<StatusCode, ApiError> {
    let instance_id = InstanceId::new(instance_id)?;
    let address = query
        .address
        .ok_or_else(|| ApiError::bad_request("missing query parameter: address"))?;
    let address = InstanceAddress::new(address)?;

    state
        .registry()
        .register_instance(&instance_id, &address)
        .await?;
    Ok(StatusCode::OK)
}

/// Resolve a user's sticky instance
///
/// GET /registry/user/{user_id}
#[instrument(skip(state), fields(user_id = %user_id), level = "info")]
async fn get_assignment(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<AssignmentResponse>, ApiError> {
    let user_id = UserId::new(user_id)?;
    let assignment = state.registry().get_assignment(&user_id).await?;
    Ok(Json(assignment.into()))
}

/// Remove an instance from the pool and release its users
///
/// DELETE /registry/service/{instance_id}
#[instrument(skip(state), fields(instance_id = %instance_id), level = "info")]
async fn evict_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<EvictionReport>, ApiError> {
    let instance_id = InstanceId::new(instance_id)?;
    let report = state.registry().evict_instance(&instance_id).await?;
    Ok(Json(report))
}

/// GET /registry/services
#[instrument(skip(state), level = "debug")]
async fn list_instances(
    State(state): State<AppState>,
) -> Result<Json<InstanceListResponse>, ApiError> {
    let instances = state
        .registry()
        .list_instances()
        .await?
        .into_iter()
        .map(InstanceSummary::from)
        .collect();
    Ok(Json(InstanceListResponse::new(instances)))
}

/// POST /registry/reconcile
#[instrument(skip(state), level = "info")]
async fn reconcile(State(state): State<AppState>) -> Result<Json<ReconcileReport>, ApiError> {
    let report = state.registry().reconcile().await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use crate::api;
    use crate::models::{AssignmentResponse, ErrorResponse, InstanceListResponse};
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use courier_core::{CourierConfig, IoContext};
    use courier_registry::{HeartbeatReporter, InstanceId, InstanceRegistry, KeySchema};
    use courier_store::{MemoryStore, StateStore};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        store: Arc<MemoryStore>,
        io: IoContext,
    }

    impl TestApp {
        fn new() -> Self {
            let io = IoContext::production();
            let store = Arc::new(MemoryStore::with_io(io.clone()));
            let registry = Arc::new(InstanceRegistry::from_config(
                store.clone(),
                &CourierConfig::default(),
                io.clone(),
            ));
            Self {
                app: api::router(AppState::new(registry)),
                store,
                io,
            }
        }

        async fn send(&self, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
            let response = self
                .app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, body.to_vec())
        }

        async fn beat(&self, instance: &str) {
            let reporter = HeartbeatReporter::new(
                self.store.clone(),
                KeySchema::default(),
                InstanceId::new(instance).unwrap(),
                CourierConfig::default().heartbeat,
                self.io.clone(),
            );
            reporter.report_once().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_register_returns_empty_ok() {
        let app = TestApp::new();

        let (status, body) = app
            .send("POST", "/registry/service/svc-1?address=ws://10.0.0.1:8085/ws")
            .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert!(app
            .store
            .set_contains("available_services", "svc-1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_register_without_address() {
        let app = TestApp::new();

        let (status, body) = app.send("POST", "/registry/service/svc-1").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.code, "bad_request");
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_id() {
        let app = TestApp::new();

        let (status, _) = app
            .send("POST", "/registry/service/bad%3Aid?address=ws://h/ws")
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_assignment_round_trip() {
        let app = TestApp::new();
        app.send("POST", "/registry/service/svc-1?address=ws://10.0.0.1:8085/ws")
            .await;
        app.beat("svc-1").await;

        let (status, body) = app.send("GET", "/registry/user/alice").await;
        assert_eq!(status, StatusCode::OK);
        let assignment: AssignmentResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(assignment.service_id, "svc-1");
        assert_eq!(assignment.address, "ws://10.0.0.1:8085/ws");

        // Second call hits the same binding
        let (_, body) = app.send("GET", "/registry/user/alice").await;
        let again: AssignmentResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(again, assignment);
    }

    #[tokio::test]
    async fn test_assignment_with_empty_pool() {
        let app = TestApp::new();

        let (status, body) = app.send("GET", "/registry/user/alice").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.code, "no_instance_available");
        let details = error.details.unwrap();
        assert_eq!(details["reason"], "empty_pool");
    }

    #[tokio::test]
    async fn test_assignment_skips_silent_instance() {
        let app = TestApp::new();
        // Registered but never heartbeating
        app.send("POST", "/registry/service/silent?address=ws://10.0.0.9:8085/ws")
            .await;

        let (status, _) = app.send("GET", "/registry/user/alice").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!app
            .store
            .set_contains("available_services", "silent")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_evict_releases_users() {
        let app = TestApp::new();
        app.send("POST", "/registry/service/svc-1?address=ws://10.0.0.1:8085/ws")
            .await;
        app.beat("svc-1").await;
        app.send("GET", "/registry/user/alice").await;
        app.send("GET", "/registry/user/bob").await;

        let (status, body) = app.send("DELETE", "/registry/service/svc-1").await;
        assert_eq!(status, StatusCode::OK);
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["was_available"], true);
        assert_eq!(report["users_released"], 2);

        assert!(app.store.get("user_service:alice").await.unwrap().is_none());

        // Repeat is a no-op
        let (status, body) = app.send("DELETE", "/registry/service/svc-1").await;
        assert_eq!(status, StatusCode::OK);
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["was_available"], false);
        assert_eq!(report["users_indexed"], 0);
    }

    #[tokio::test]
    async fn test_list_instances() {
        let app = TestApp::new();
        app.send("POST", "/registry/service/svc-a?address=ws://a/ws")
            .await;
        app.send("POST", "/registry/service/svc-b?address=ws://b/ws")
            .await;
        app.beat("svc-a").await;

        let (status, body) = app.send("GET", "/registry/services").await;
        assert_eq!(status, StatusCode::OK);
        let list: InstanceListResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(list.count, 2);
        assert_eq!(list.instances[0].instance_id, "svc-a");
        assert_eq!(list.instances[0].state, "alive");
        assert_eq!(list.instances[0].address.as_deref(), Some("ws://a/ws"));
        assert_eq!(list.instances[1].state, "dead");
    }

    #[tokio::test]
    async fn test_reconcile_repairs_missing_index() {
        let app = TestApp::new();
        app.send("POST", "/registry/service/svc-1?address=ws://h/ws")
            .await;
        app.store.set("user_service:carol", "svc-1").await.unwrap();

        let (status, body) = app.send("POST", "/registry/reconcile").await;
        assert_eq!(status, StatusCode::OK);
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["assignments_reindexed"], 1);
        assert!(app
            .store
            .set_contains("service_users:svc-1", "carol")
            .await
            .unwrap());
    }
}
