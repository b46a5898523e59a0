//! `RocksDB` storage layer for the fleet control plane.
//!
//! This crate provides persistent storage for servers, jobs and the resources
//! jobs act on, using `RocksDB` column families for indexing and CBOR for
//! values.
//!
//! # Architecture
//!
//! - one primary column family per record kind, keyed by the record ID
//! - `*_by_server` indexes for every record that belongs to a server
//! - `jobs_by_status` for sweeping and polling jobs by state
//! - `supervisor_by_name` enforcing unique program names per server
//!
//! # Example
//!
//! ```no_run
//! use fleet_store::{RocksStore, Server, Store};
//!
//! let store = RocksStore::open("/tmp/fleet-db").unwrap();
//!
//! let server = Server::new("web-1", "203.0.113.10");
//! store.put_server(&server).unwrap();
//!
//! let apps = store.list_web_apps_by_server(&server.server_id).unwrap();
//! assert!(apps.is_empty());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    AppType, CronJob, Database, DatabaseEngine, DeployStatus, FirewallAction, FirewallRule,
    HealthMonitor, Job, JobPayload, JobStatus, JobType, MonitorStatus, MonitorType, NodeProcess,
    PackageManager, ProgramStatus, Protocol, ResourceRef, ResourceStatus, Server, ServerStatus,
    Service, SslCertificate, SupervisorProgram, WebApp,
};

use fleet_core::{
    CertificateId, CronJobId, DatabaseId, FirewallRuleId, JobId, MonitorId, ServerId, ServiceId,
    SupervisorProgramId, WebAppId,
};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer so the control plane can be generic
/// over it. All `put_*` operations are upserts that keep their indexes in sync
/// atomically.
pub trait Store: Send + Sync {
    // =========================================================================
    // Server Operations
    // =========================================================================

    /// Insert or update a server record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_server(&self, server: &Server) -> Result<()>;

    /// Get a server by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_server(&self, server_id: &ServerId) -> Result<Option<Server>>;

    /// List all servers.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_servers(&self) -> Result<Vec<Server>>;

    // =========================================================================
    // Job Operations
    // =========================================================================

    /// Insert or update a job record.
    ///
    /// This also maintains the server, status, server-status and parent
    /// indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_job(&self, job: &Job) -> Result<()>;

    /// Get a job by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_job(&self, job_id: &JobId) -> Result<Option<Job>>;

    /// List all jobs addressed to a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_jobs_by_server(&self, server_id: &ServerId) -> Result<Vec<Job>>;

    /// List all jobs with a given status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;

    /// List a server's jobs with a given status, without touching its other
    /// jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_jobs_by_server_and_status(
        &self,
        server_id: &ServerId,
        status: JobStatus,
    ) -> Result<Vec<Job>>;

    /// List the follow-up jobs dispatched by a job's outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_jobs_by_parent(&self, parent_job_id: &JobId) -> Result<Vec<Job>>;

    // =========================================================================
    // Web App Operations
    // =========================================================================

    /// Insert or update a web app record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_web_app(&self, app: &WebApp) -> Result<()>;

    /// Get a web app by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_web_app(&self, webapp_id: &WebAppId) -> Result<Option<WebApp>>;

    /// Delete a web app by ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the app doesn't exist.
    fn delete_web_app(&self, webapp_id: &WebAppId) -> Result<()>;

    /// List all web apps on a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_web_apps_by_server(&self, server_id: &ServerId) -> Result<Vec<WebApp>>;

    // =========================================================================
    // Supervisor Program Operations
    // =========================================================================

    /// Insert or update a supervisor program.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if another program on the same server
    /// already uses the name.
    fn put_supervisor_program(&self, program: &SupervisorProgram) -> Result<()>;

    /// Get a supervisor program by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_supervisor_program(
        &self,
        program_id: &SupervisorProgramId,
    ) -> Result<Option<SupervisorProgram>>;

    /// Get a supervisor program by its per-server unique name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_supervisor_program_by_name(
        &self,
        server_id: &ServerId,
        name: &str,
    ) -> Result<Option<SupervisorProgram>>;

    /// Delete a supervisor program by ID, releasing its name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the program doesn't exist.
    fn delete_supervisor_program(&self, program_id: &SupervisorProgramId) -> Result<()>;

    /// List all supervisor programs on a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_supervisor_programs_by_server(
        &self,
        server_id: &ServerId,
    ) -> Result<Vec<SupervisorProgram>>;

    // =========================================================================
    // Satellite Resource Operations
    // =========================================================================

    /// Insert or update a service.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_service(&self, service: &Service) -> Result<()>;

    /// Get a service by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_service(&self, service_id: &ServiceId) -> Result<Option<Service>>;

    /// Insert or update an SSL certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_certificate(&self, certificate: &SslCertificate) -> Result<()>;

    /// Get an SSL certificate by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_certificate(&self, certificate_id: &CertificateId) -> Result<Option<SslCertificate>>;

    /// Insert or update a database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_database(&self, database: &Database) -> Result<()>;

    /// Get a database by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_database(&self, database_id: &DatabaseId) -> Result<Option<Database>>;

    /// Delete a database by ID.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the database doesn't exist.
    fn delete_database(&self, database_id: &DatabaseId) -> Result<()>;

    /// Insert or update a firewall rule.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_firewall_rule(&self, rule: &FirewallRule) -> Result<()>;

    /// Get a firewall rule by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_firewall_rule(&self, rule_id: &FirewallRuleId) -> Result<Option<FirewallRule>>;

    /// Insert or update a cron job.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_cron_job(&self, cron_job: &CronJob) -> Result<()>;

    /// Get a cron job by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_cron_job(&self, cron_id: &CronJobId) -> Result<Option<CronJob>>;

    /// List all cron jobs on a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_cron_jobs_by_server(&self, server_id: &ServerId) -> Result<Vec<CronJob>>;

    // =========================================================================
    // Health Monitor Operations
    // =========================================================================

    /// Insert or update a health monitor.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_health_monitor(&self, monitor: &HealthMonitor) -> Result<()>;

    /// Get a health monitor by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_health_monitor(&self, monitor_id: &MonitorId) -> Result<Option<HealthMonitor>>;

    /// List all health monitors.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_health_monitors(&self) -> Result<Vec<HealthMonitor>>;
}
