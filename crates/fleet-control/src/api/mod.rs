//! Internal HTTP API.
//!
//! # Routes
//!
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check
//! - `POST /internal/jobs/:job_id/callback` - Report a job outcome
//! - `GET /internal/servers/:server_id/jobs/next` - Poll for the next job (204 when idle)
//! - `POST /internal/servers/:server_id/stats` - Report a resource sample
//! - `GET /v1/servers/:server_id/ports` - Port usage

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::service::FleetControl;

pub use error::ApiError;

/// Shared application state for the API.
pub struct ApiState<C: FleetControl> {
    /// The control plane.
    pub control: Arc<C>,
}

impl<C: FleetControl> ApiState<C> {
    /// Create a new API state.
    #[must_use]
    pub const fn new(control: Arc<C>) -> Self {
        Self { control }
    }
}

impl<C: FleetControl> Clone for ApiState<C> {
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
        }
    }
}

/// Create the API router with all routes and middleware.
pub fn create_router<C: FleetControl + 'static>(state: ApiState<C>) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route(
            "/internal/jobs/:job_id/callback",
            post(handlers::job_callback::<C>),
        )
        .route(
            "/internal/servers/:server_id/jobs/next",
            get(handlers::next_job::<C>),
        )
        .route(
            "/internal/servers/:server_id/stats",
            post(handlers::record_stats::<C>),
        )
        .route(
            "/v1/servers/:server_id/ports",
            get(handlers::port_usage::<C>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use crate::service::FleetControlService;
    use crate::types::CreateWebAppRequest;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use fleet_core::{JobId, ServerId};
    use fleet_store::{AppType, RocksStore};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    type TestControl = FleetControlService<RocksStore, MemoryNotifier>;

    fn create_test_server() -> (TestServer, Arc<TestControl>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let control = Arc::new(FleetControlService::with_defaults(
            store,
            Arc::new(MemoryNotifier::new()),
        ));
        let app = create_router(ApiState::new(Arc::clone(&control)));
        (TestServer::new(app).unwrap(), control, dir)
    }

    #[tokio::test]
    async fn health_and_ready() {
        let (server, _, _dir) = create_test_server();

        let response = server.get("/health").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "healthy");

        server.get("/ready").await.assert_status_ok();
    }

    #[tokio::test]
    async fn poll_then_callback() {
        let (server, control, _dir) = create_test_server();
        let server_id = control
            .register_server("web-1", "203.0.113.10")
            .await
            .unwrap()
            .server_id;
        let created = control
            .create_webapp(&server_id, CreateWebAppRequest::new("a.test", AppType::Php))
            .await
            .unwrap();

        let next_path = format!("/internal/servers/{server_id}/jobs/next");
        let response = server.get(&next_path).await;
        response.assert_status_ok();
        let job = response.json::<Value>();
        assert_eq!(job["job_id"], created.job.job_id.to_string());
        assert_eq!(job["job_type"], "create_webapp");
        assert_eq!(job["status"], "running");

        server
            .get(&next_path)
            .await
            .assert_status(StatusCode::NO_CONTENT);

        let callback_path = format!("/internal/jobs/{}/callback", created.job.job_id);
        let response = server
            .post(&callback_path)
            .json(&json!({"success": true, "output": "vhost written"}))
            .await;
        response.assert_status_ok();
        let report = response.json::<Value>();
        assert_eq!(report["duplicate"], false);
        assert_eq!(report["job"]["status"], "completed");

        let again = server
            .post(&callback_path)
            .json(&json!({"success": false, "error": "late"}))
            .await;
        again.assert_status_ok();
        assert_eq!(again.json::<Value>()["duplicate"], true);
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids() {
        let (server, _, _dir) = create_test_server();

        let response = server
            .post(&format!("/internal/jobs/{}/callback", JobId::generate()))
            .json(&json!({"success": true}))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["error"]["code"], "not_found");

        let response = server.get("/v1/servers/not-a-uuid/ports").await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"]["code"], "bad_request");

        server
            .get(&format!("/internal/servers/{}/jobs/next", ServerId::generate()))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_and_ports() {
        let (server, control, _dir) = create_test_server();
        let server_id = control
            .register_server("web-1", "203.0.113.10")
            .await
            .unwrap()
            .server_id;
        control
            .create_webapp(&server_id, CreateWebAppRequest::new("a.test", AppType::Nodejs))
            .await
            .unwrap();

        let response = server
            .post(&format!("/internal/servers/{server_id}/stats"))
            .json(&json!({"load_1m": 0.4, "memory_percent": 31.0, "disk_percent": 48.5}))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["is_load_alert_active"], false);

        let response = server.get(&format!("/v1/servers/{server_id}/ports")).await;
        response.assert_status_ok();
        let usage = response.json::<Value>();
        assert_eq!(usage["total"], 1000);
        assert_eq!(usage["used"], 1);
        assert_eq!(usage["port_range"], "3000-3999");
    }
}
