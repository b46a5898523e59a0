//! Core types and utilities for the fleet control plane.
//!
//! This crate provides the foundational types shared by every other crate:
//!
//! - **Identifiers**: Strongly-typed UUID IDs for servers, jobs and every
//!   resource kind the control plane manages
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use fleet_core::{JobId, ServerId};
//!
//! let server_id = ServerId::generate();
//! let job_id: JobId = "6f1f1c2e-4d55-4a7b-9d8c-0b7c9c8e2a11".parse().unwrap();
//!
//! assert_ne!(server_id.to_string(), job_id.to_string());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;

pub use error::{CoreError, Result};
pub use ids::{
    CertificateId, CronJobId, DatabaseId, FirewallRuleId, IdError, JobId, MonitorId, ServerId,
    ServiceId, SupervisorProgramId, WebAppId,
};
