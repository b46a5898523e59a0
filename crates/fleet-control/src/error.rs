//! Error types for the control plane.
//!
//! This module defines all errors that can occur while dispatching jobs,
//! processing callbacks and managing server resources.

use fleet_core::{
    CertificateId, DatabaseId, FirewallRuleId, JobId, MonitorId, ServerId, ServiceId,
    SupervisorProgramId, WebAppId,
};
use fleet_store::{JobType, ResourceRef, StoreError};
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The requested server was not found.
    #[error("server not found: {0}")]
    ServerNotFound(ServerId),

    /// The requested job was not found.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// The requested web app was not found.
    #[error("web app not found: {0}")]
    WebAppNotFound(WebAppId),

    /// The requested supervisor program was not found.
    #[error("supervisor program not found: {0}")]
    ProgramNotFound(SupervisorProgramId),

    /// The requested service was not found.
    #[error("service not found: {0}")]
    ServiceNotFound(ServiceId),

    /// The requested certificate was not found.
    #[error("certificate not found: {0}")]
    CertificateNotFound(CertificateId),

    /// The requested database was not found.
    #[error("database not found: {0}")]
    DatabaseNotFound(DatabaseId),

    /// The requested firewall rule was not found.
    #[error("firewall rule not found: {0}")]
    FirewallRuleNotFound(FirewallRuleId),

    /// The requested health monitor was not found.
    #[error("health monitor not found: {0}")]
    MonitorNotFound(MonitorId),

    /// A job payload is missing a key its type requires.
    #[error("invalid payload for {job_type} job: missing required key `{key}`")]
    InvalidPayload {
        /// The job type being dispatched.
        job_type: JobType,
        /// The missing key.
        key: &'static str,
    },

    /// An argument is outside its allowed range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No free port (or contiguous block) is left on the server.
    #[error("no {requested} free port(s) left on server {server_id}")]
    PortsExhausted {
        /// The server whose range is exhausted.
        server_id: ServerId,
        /// How many ports were requested.
        requested: usize,
    },

    /// The requested state transition is not valid.
    #[error("invalid state transition for {resource:?}: cannot transition from {from} to {to}")]
    InvalidState {
        /// The resource being transitioned.
        resource: ResourceRef,
        /// The current state.
        from: String,
        /// The requested target state.
        to: String,
    },

    /// The request failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::ServerNotFound(_)
            | Self::JobNotFound(_)
            | Self::WebAppNotFound(_)
            | Self::ProgramNotFound(_)
            | Self::ServiceNotFound(_)
            | Self::CertificateNotFound(_)
            | Self::DatabaseNotFound(_)
            | Self::FirewallRuleNotFound(_)
            | Self::MonitorNotFound(_)
            | Self::Store(StoreError::NotFound) => 404,
            Self::InvalidPayload { .. } | Self::InvalidArgument(_) | Self::InvalidRequest(_) => 400,
            Self::PortsExhausted { .. }
            | Self::InvalidState { .. }
            | Self::Store(StoreError::Conflict(_)) => 409,
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Database(_)) | Self::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        let server_id = ServerId::from_bytes([1u8; 16]);

        assert_eq!(
            ControlError::ServerNotFound(server_id).http_status_code(),
            404
        );
        assert_eq!(
            ControlError::JobNotFound(JobId::generate()).http_status_code(),
            404
        );
        assert_eq!(
            ControlError::InvalidPayload {
                job_type: JobType::Deploy,
                key: "webapp_id"
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            ControlError::PortsExhausted {
                server_id,
                requested: 3
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            ControlError::Store(StoreError::Conflict("name".into())).http_status_code(),
            409
        );
        assert_eq!(
            ControlError::Store(StoreError::Database("io".into())).http_status_code(),
            500
        );
    }

    #[test]
    fn retriable_errors() {
        assert!(ControlError::Internal("boom".into()).is_retriable());
        assert!(ControlError::Store(StoreError::Database("io".into())).is_retriable());
        assert!(!ControlError::InvalidArgument("n".into()).is_retriable());
        assert!(!ControlError::Store(StoreError::Conflict("name".into())).is_retriable());
    }

    #[test]
    fn invalid_payload_message_names_key() {
        let err = ControlError::InvalidPayload {
            job_type: JobType::GitDeploy,
            key: "branch",
        };
        assert_eq!(
            err.to_string(),
            "invalid payload for git_deploy job: missing required key `branch`"
        );
    }
}
