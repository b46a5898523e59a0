//! Control plane for a fleet of managed web servers.
//!
//! The control plane never touches a server directly. Every privileged
//! operation becomes a [`Job`] persisted for the server's agent; the agent
//! reports the outcome back, and that outcome drives the state of the
//! resource the job was for.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Internal HTTP API (agents, operators)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    FleetControlService                       │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌──────────┐  │
//! │  │ Dispatcher │ │  Callback  │ │   Ports    │ │  Alerts  │  │
//! │  │  + Sweeper │ │ Processor  │ │ Allocator  │ │ + Health │  │
//! │  └────────────┘ └────────────┘ └────────────┘ └──────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │  Store   │   │ Notifier │   │  Prober  │
//!        │ (RocksDB)│   │          │   │HTTP / TCP│
//!        └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleet_control::{
//!     CallbackOutcome, CreateWebAppRequest, FleetControl, FleetControlService, LogNotifier,
//! };
//! use fleet_store::{AppType, RocksStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/fleet")?);
//! let control = FleetControlService::with_defaults(store, Arc::new(LogNotifier));
//!
//! let server = control.register_server("web-1", "203.0.113.10").await?;
//! let created = control
//!     .create_webapp(&server.server_id, CreateWebAppRequest::new("api.example.com", AppType::Nodejs))
//!     .await?;
//!
//! // Later, the agent reports back
//! control
//!     .handle_callback(&created.job.job_id, CallbackOutcome::success(None))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # State Machines
//!
//! - resources: `Pending` → `Active` or `Failed`; `Active` → `Pending`
//!   (operator action) or `Failed`; `Failed` → `Pending` (retry)
//! - supervisor programs additionally have `Stopped`
//! - servers: anything but `Provisioning` → `Provisioning` → `Active` or `Failed`
//! - jobs: `Pending` → `Running` → `Completed` or `Failed`
//!
//! See the [`lifecycle`] module for transition validation helpers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alerts;
pub mod api;
pub mod callback;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod locks;
pub mod notify;
pub mod ports;
pub mod service;
pub mod supervisor;
pub mod sweeper;
pub mod types;

pub use alerts::{AlertEngine, ServerStats};
pub use api::{create_router, ApiError, ApiState};
pub use callback::{CallbackOutcome, CallbackProcessor, CallbackReport};
pub use config::ServiceConfig;
pub use dispatcher::JobDispatcher;
pub use error::{ControlError, Result};
pub use health::{HealthChecker, HttpProber, NetworkProber, Prober, TcpProber};
pub use notify::{LogNotifier, NotificationKind, NotificationRequest, Notifier};
pub use ports::{PortAllocator, PortUsage};
pub use service::{FleetControl, FleetControlService};
pub use supervisor::SupervisorConfigBuilder;
pub use sweeper::JobSweeper;
pub use types::{
    AlertSettings, ControlConfig, CreateDatabaseRequest, CreateProgramRequest,
    CreateWebAppRequest, CronJobRequest, DeployRequest, Dispatched, FirewallRuleRequest,
    IssueCertificateRequest, JobTimeouts, ProcessSpec, ProgramAction, SupervisorSettings,
};

#[cfg(any(test, feature = "test-utils"))]
pub use notify::MemoryNotifier;

// Re-export commonly used types from dependencies for convenience
pub use fleet_core::{JobId, ServerId, SupervisorProgramId, WebAppId};
pub use fleet_store::{Job, JobStatus, JobType, ResourceRef, Server, WebApp};
