//! Resource lifecycle state machines.
//!
//! This module defines the valid state transitions for every resource kind a
//! job outcome can drive, and validation helpers returning
//! `ControlError::InvalidState` for anything else. Re-applying the current
//! state is always allowed so a redelivered outcome is a no-op.
//!
//! # Resource states (web apps, services, certificates, databases, ...)
//!
//! ```text
//!   Pending ──success──▶ Active ──resync──▶ Pending
//!      │                   │
//!   failure             failure
//!      ▼                   ▼
//!   Failed ◀───────────────┘
//!      │
//!      └──retry──▶ Pending
//! ```
//!
//! # Supervisor programs
//!
//! ```text
//!   Pending ──▶ Active ◀──▶ Stopped
//!      │          │            │
//!      └──────────┴──▶ Failed ◀┘
//! ```

use fleet_store::{JobStatus, ProgramStatus, ResourceRef, ResourceStatus, ServerStatus};

use crate::error::{ControlError, Result};

/// Check if a resource status transition is valid.
#[must_use]
pub const fn is_valid_resource_transition(from: ResourceStatus, to: ResourceStatus) -> bool {
    use ResourceStatus::{Active, Failed, Pending};

    matches!(
        (from, to),
        (Pending, Pending) | (Active, Active) | (Failed, Failed)
            // A job outcome settles a pending resource
            | (Pending, Active | Failed)
            // Follow-up work (resync, reissue) puts an active resource back in flight
            | (Active, Pending | Failed)
            // Retry
            | (Failed, Pending)
    )
}

/// Check if a supervisor program transition is valid.
#[must_use]
pub const fn is_valid_program_transition(from: ProgramStatus, to: ProgramStatus) -> bool {
    use ProgramStatus::{Active, Failed, Pending, Stopped};

    matches!(
        (from, to),
        (Pending, Pending) | (Active, Active) | (Stopped, Stopped) | (Failed, Failed)
            | (Pending, Active | Failed)
            | (Active, Stopped | Failed)
            | (Stopped, Active | Failed)
            | (Failed, Active | Stopped | Pending)
    )
}

/// Check if a server provisioning transition is valid.
#[must_use]
pub const fn is_valid_server_transition(from: ServerStatus, to: ServerStatus) -> bool {
    use ServerStatus::{Active, Failed, Pending, Provisioning};

    matches!(
        (from, to),
        (Pending, Pending) | (Provisioning, Provisioning) | (Active, Active) | (Failed, Failed)
            | (Pending | Active | Failed, Provisioning)
            | (Provisioning, Active | Failed)
    )
}

/// Check if a job status transition is valid.
#[must_use]
pub const fn is_valid_job_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::{Completed, Failed, Pending, Running};

    matches!(
        (from, to),
        (Pending, Running | Completed | Failed) | (Running, Completed | Failed)
    )
}

/// Validates a resource status transition and returns the target if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn validate_resource_transition(
    resource: ResourceRef,
    from: ResourceStatus,
    to: ResourceStatus,
) -> Result<ResourceStatus> {
    if is_valid_resource_transition(from, to) {
        Ok(to)
    } else {
        Err(invalid(resource, from, to))
    }
}

/// Validates a supervisor program transition and returns the target if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn validate_program_transition(
    resource: ResourceRef,
    from: ProgramStatus,
    to: ProgramStatus,
) -> Result<ProgramStatus> {
    if is_valid_program_transition(from, to) {
        Ok(to)
    } else {
        Err(invalid(resource, from, to))
    }
}

/// Validates a server provisioning transition and returns the target if valid.
///
/// # Errors
///
/// Returns `ControlError::InvalidState` if the transition is not allowed.
pub fn validate_server_transition(
    resource: ResourceRef,
    from: ServerStatus,
    to: ServerStatus,
) -> Result<ServerStatus> {
    if is_valid_server_transition(from, to) {
        Ok(to)
    } else {
        Err(invalid(resource, from, to))
    }
}

fn invalid(
    resource: ResourceRef,
    from: impl std::fmt::Debug,
    to: impl std::fmt::Debug,
) -> ControlError {
    ControlError::InvalidState {
        resource,
        from: format!("{from:?}"),
        to: format!("{to:?}"),
    }
}
