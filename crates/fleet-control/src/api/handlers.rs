//! Request handlers.
//!
//! The `/internal` endpoints are called by server agents over the private
//! network and carry no authentication.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fleet_core::{JobId, ServerId};
use fleet_store::Server;
use serde::Serialize;

use super::error::ApiError;
use super::ApiState;
use crate::alerts::ServerStats;
use crate::callback::{CallbackOutcome, CallbackReport};
use crate::ports::PortUsage;
use crate::service::FleetControl;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
}

/// Health check handler.
pub async fn health() -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    };

    (StatusCode::OK, Json(response))
}

/// Readiness check handler.
pub async fn ready() -> impl IntoResponse {
    (StatusCode::OK, "ready")
}

/// Apply a job outcome reported by an agent.
///
/// Redelivering an outcome is answered with the stored job and
/// `"duplicate": true`.
///
/// # Errors
///
/// Returns 400 for a malformed job ID and 404 for an unknown job.
pub async fn job_callback<C: FleetControl + 'static>(
    State(state): State<Arc<ApiState<C>>>,
    Path(job_id): Path<String>,
    Json(outcome): Json<CallbackOutcome>,
) -> Result<Json<CallbackReport>, ApiError> {
    let job_id: JobId = parse_id(&job_id, "job")?;

    tracing::debug!(job_id = %job_id, success = outcome.success, "Received job callback");

    let report = state.control.handle_callback(&job_id, outcome).await?;
    Ok(Json(report))
}

/// Hand the next pending job to a server's agent; 204 when there is none.
///
/// # Errors
///
/// Returns 400 for a malformed server ID and 404 for an unknown server.
pub async fn next_job<C: FleetControl + 'static>(
    State(state): State<Arc<ApiState<C>>>,
    Path(server_id): Path<String>,
) -> Result<Response, ApiError> {
    let server_id: ServerId = parse_id(&server_id, "server")?;

    match state.control.next_job(&server_id).await? {
        Some(job) => Ok(Json(job).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Record a resource sample from a server's agent.
///
/// # Errors
///
/// Returns 400 for a malformed server ID and 404 for an unknown server.
pub async fn record_stats<C: FleetControl + 'static>(
    State(state): State<Arc<ApiState<C>>>,
    Path(server_id): Path<String>,
    Json(stats): Json<ServerStats>,
) -> Result<Json<Server>, ApiError> {
    let server_id: ServerId = parse_id(&server_id, "server")?;
    let server = state.control.record_server_stats(&server_id, stats).await?;
    Ok(Json(server))
}

/// Port usage of a server.
///
/// # Errors
///
/// Returns 400 for a malformed server ID and 404 for an unknown server.
pub async fn port_usage<C: FleetControl + 'static>(
    State(state): State<Arc<ApiState<C>>>,
    Path(server_id): Path<String>,
) -> Result<Json<PortUsage>, ApiError> {
    let server_id: ServerId = parse_id(&server_id, "server")?;
    let usage = state.control.port_usage(&server_id).await?;
    Ok(Json(usage))
}

fn parse_id<T>(raw: &str, kind: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid {kind} ID {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_returns_ok() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        let err = parse_id::<JobId>("not-a-uuid", "job").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(parse_id::<JobId>(&JobId::generate().to_string(), "job").is_ok());
    }
}
