//! Request types and configuration for control plane operations.
//!
//! Requests are validated here, at the boundary, before anything is allocated
//! or persisted.

use std::collections::{BTreeMap, HashSet};

use fleet_core::WebAppId;
use fleet_store::{
    AppType, DatabaseEngine, FirewallAction, Job, JobType, PackageManager, Protocol,
};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};
use crate::supervisor::NODE_PROGRAM_PREFIX;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the control plane service.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Per-type job deadlines.
    pub job_timeouts: JobTimeouts,
    /// Minimum time between two "high" resource notifications for a server (seconds).
    pub alert_cooldown_seconds: u64,
    /// Maximum number of health probes in flight at once.
    pub health_check_concurrency: usize,
    /// Defaults for generated supervisor programs.
    pub supervisor: SupervisorSettings,
    /// Number of entries in each striped lock table.
    pub lock_stripes: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            job_timeouts: JobTimeouts::default(),
            alert_cooldown_seconds: 300, // 5 minutes
            health_check_concurrency: 16,
            supervisor: SupervisorSettings::default(),
            lock_stripes: 64,
        }
    }
}

/// How long a job may stay pending or running before the sweeper fails it.
#[derive(Debug, Clone)]
pub struct JobTimeouts {
    /// Timeout for ordinary jobs (seconds).
    pub default_seconds: u64,
    /// Timeout for `deploy` and `git_deploy` (seconds).
    pub deploy_seconds: u64,
    /// Timeout for the `provision_*` family (seconds).
    pub provisioning_seconds: u64,
}

impl JobTimeouts {
    /// The timeout applying to a job type, in seconds.
    #[must_use]
    pub const fn for_type(&self, job_type: JobType) -> u64 {
        match job_type {
            JobType::Deploy | JobType::GitDeploy => self.deploy_seconds,
            t if t.is_provisioning() => self.provisioning_seconds,
            _ => self.default_seconds,
        }
    }
}

impl Default for JobTimeouts {
    fn default() -> Self {
        Self {
            default_seconds: 600,       // 10 minutes
            deploy_seconds: 1800,       // 30 minutes
            provisioning_seconds: 3600, // 1 hour
        }
    }
}

/// Defaults applied to generated supervisor programs.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Directory holding one `<program>.log` per program.
    pub log_dir: String,
    /// Seconds a process must stay up to count as started.
    pub startsecs: u32,
    /// Seconds to wait for a graceful stop.
    pub stopwaitsecs: u32,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            log_dir: "/var/log/supervisor".to_string(),
            startsecs: 1,
            stopwaitsecs: 10,
        }
    }
}

// =============================================================================
// Web apps
// =============================================================================

/// Request to create a web app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWebAppRequest {
    /// Primary domain.
    pub domain: String,
    /// Runtime flavour.
    pub app_type: AppType,
    /// System user the app runs as.
    #[serde(default = "CreateWebAppRequest::default_system_user")]
    pub system_user: String,
    /// Application root; `/home/<user>/<domain>` when absent.
    #[serde(default)]
    pub directory: Option<String>,
    /// Package manager for Node.js apps.
    #[serde(default)]
    pub package_manager: PackageManager,
    /// Start command or script name for single-process Node.js apps.
    #[serde(default)]
    pub start_command: Option<String>,
    /// Processes of a monorepo Node.js app, each receiving its own port.
    #[serde(default)]
    pub processes: Vec<ProcessSpec>,
}

/// One process of a monorepo Node.js app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Process name, unique within the app.
    pub name: String,
    /// Command run verbatim by the supervisor.
    pub command: String,
}

impl CreateWebAppRequest {
    fn default_system_user() -> String {
        "deploy".to_string()
    }

    /// Create a request with default user and directory.
    #[must_use]
    pub fn new(domain: impl Into<String>, app_type: AppType) -> Self {
        Self {
            domain: domain.into(),
            app_type,
            system_user: Self::default_system_user(),
            directory: None,
            package_manager: PackageManager::default(),
            start_command: None,
            processes: Vec::new(),
        }
    }

    /// Set the package manager.
    #[must_use]
    pub const fn with_package_manager(mut self, package_manager: PackageManager) -> Self {
        self.package_manager = package_manager;
        self
    }

    /// Set the start command.
    #[must_use]
    pub fn with_start_command(mut self, command: impl Into<String>) -> Self {
        self.start_command = Some(command.into());
        self
    }

    /// Add a monorepo process.
    #[must_use]
    pub fn with_process(mut self, name: impl Into<String>, command: impl Into<String>) -> Self {
        self.processes.push(ProcessSpec {
            name: name.into(),
            command: command.into(),
        });
        self
    }

    /// Number of ports the app needs.
    #[must_use]
    pub fn port_count(&self) -> usize {
        match self.app_type {
            AppType::Nodejs => self.processes.len().max(1),
            AppType::Php | AppType::Static => 0,
        }
    }

    /// The application root on the server.
    #[must_use]
    pub fn resolved_directory(&self) -> String {
        self.directory
            .clone()
            .unwrap_or_else(|| format!("/home/{}/{}", self.system_user, self.domain.trim()))
    }

    /// Validate the request.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRequest` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if !is_domain(self.domain.trim()) {
            return Err(invalid(format!("invalid domain: {:?}", self.domain)));
        }
        if !is_identifier(&self.system_user) {
            return Err(invalid(format!(
                "invalid system user: {:?}",
                self.system_user
            )));
        }
        if let Some(directory) = &self.directory {
            check_directory(directory)?;
        }
        if let Some(command) = &self.start_command {
            if !is_single_line(command) {
                return Err(invalid(
                    "start command must be a single line without control characters".to_string(),
                ));
            }
        }

        if self.app_type != AppType::Nodejs {
            if self.start_command.is_some() || !self.processes.is_empty() {
                return Err(invalid(
                    "start commands and processes only apply to nodejs apps".to_string(),
                ));
            }
            return Ok(());
        }

        if self.processes.is_empty() {
            return Ok(());
        }
        if self.start_command.is_some() {
            return Err(invalid(
                "monorepo apps take a command per process, not a start command".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for process in &self.processes {
            if !is_identifier(&process.name) {
                return Err(invalid(format!("invalid process name: {:?}", process.name)));
            }
            if !seen.insert(process.name.as_str()) {
                return Err(invalid(format!("duplicate process name: {}", process.name)));
            }
            if process.command.trim().is_empty() {
                return Err(invalid(format!(
                    "process {} has an empty command",
                    process.name
                )));
            }
            if !is_single_line(&process.command) {
                return Err(invalid(format!(
                    "process {} command must be a single line",
                    process.name
                )));
            }
        }
        Ok(())
    }
}

/// Request to deploy a web app.
///
/// A repository turns the deploy into a `git_deploy`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Git repository to pull from.
    #[serde(default)]
    pub repository: Option<String>,
    /// Branch to check out; `main` when absent.
    #[serde(default)]
    pub branch: Option<String>,
}

// =============================================================================
// Supervisor programs
// =============================================================================

/// Request to create an ad-hoc supervisor program (e.g. a queue worker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProgramRequest {
    /// Program name, unique per server.
    pub name: String,
    /// Command line.
    pub command: String,
    /// Working directory.
    pub directory: String,
    /// User the program runs as.
    pub user: String,
    /// Number of process instances.
    #[serde(default = "CreateProgramRequest::default_numprocs")]
    pub numprocs: u32,
    /// Start with the supervisor daemon.
    #[serde(default = "CreateProgramRequest::default_true")]
    pub autostart: bool,
    /// Restart on exit.
    #[serde(default = "CreateProgramRequest::default_true")]
    pub autorestart: bool,
    /// Environment variables.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl CreateProgramRequest {
    const fn default_numprocs() -> u32 {
        1
    }

    const fn default_true() -> bool {
        true
    }

    /// Create a request with a single auto-restarting process.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        directory: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            directory: directory.into(),
            user: user.into(),
            numprocs: 1,
            autostart: true,
            autorestart: true,
            environment: BTreeMap::new(),
        }
    }

    /// Validate the request.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRequest` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return Err(invalid(format!("invalid program name: {:?}", self.name)));
        }
        // Reserved for programs created with Node.js web apps.
        if self.name.starts_with(NODE_PROGRAM_PREFIX) {
            return Err(invalid(format!(
                "program names starting with {NODE_PROGRAM_PREFIX:?} are reserved: {:?}",
                self.name
            )));
        }
        if self.command.trim().is_empty() || !is_single_line(&self.command) {
            return Err(invalid(
                "command must be a single non-empty line".to_string(),
            ));
        }
        check_directory(&self.directory)?;
        if !is_identifier(&self.user) {
            return Err(invalid(format!("invalid user: {:?}", self.user)));
        }
        if !(1..=100).contains(&self.numprocs) {
            return Err(invalid(format!(
                "numprocs must be between 1 and 100, got {}",
                self.numprocs
            )));
        }
        if let Some(key) = self.environment.keys().find(|k| !is_env_key(k)) {
            return Err(invalid(format!("invalid environment variable name: {key:?}")));
        }
        if let Some((key, _)) = self.environment.iter().find(|(_, v)| !is_single_line(v)) {
            return Err(invalid(format!(
                "environment variable {key} must be a single line"
            )));
        }
        Ok(())
    }
}

/// An operator action on an existing supervisor program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum ProgramAction {
    Start,
    Stop,
    Restart,
    Update,
    Delete,
}

impl ProgramAction {
    /// The job type carrying out this action.
    #[must_use]
    pub const fn job_type(self) -> JobType {
        match self {
            Self::Start => JobType::SupervisorStart,
            Self::Stop => JobType::SupervisorStop,
            Self::Restart => JobType::SupervisorRestart,
            Self::Update => JobType::SupervisorUpdate,
            Self::Delete => JobType::SupervisorDelete,
        }
    }
}

// =============================================================================
// Satellite resources
// =============================================================================

/// Request to add a firewall rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRuleRequest {
    /// Destination port.
    pub port: u16,
    /// Transport protocol.
    #[serde(default = "FirewallRuleRequest::default_protocol")]
    pub protocol: Protocol,
    /// Allow or deny.
    #[serde(default = "FirewallRuleRequest::default_action")]
    pub action: FirewallAction,
    /// Source address or CIDR.
    #[serde(default)]
    pub source: Option<String>,
}

impl FirewallRuleRequest {
    const fn default_protocol() -> Protocol {
        Protocol::Tcp
    }

    const fn default_action() -> FirewallAction {
        FirewallAction::Allow
    }

    /// Allow TCP traffic to `port` from anywhere.
    #[must_use]
    pub const fn allow_tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
            action: FirewallAction::Allow,
            source: None,
        }
    }
}

/// Request to add a crontab entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobRequest {
    /// Five-field schedule expression.
    pub expression: String,
    /// Command to run.
    pub command: String,
    /// User whose crontab holds the entry.
    #[serde(default = "CronJobRequest::default_user")]
    pub user: String,
}

impl CronJobRequest {
    fn default_user() -> String {
        "root".to_string()
    }

    /// Validate the request.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRequest` if the expression does not have
    /// five fields or the command is empty.
    pub fn validate(&self) -> Result<()> {
        if !is_single_line(&self.expression) || self.expression.split_whitespace().count() != 5 {
            return Err(invalid(format!(
                "cron expression must have five fields: {:?}",
                self.expression
            )));
        }
        if self.command.trim().is_empty() || !is_single_line(&self.command) {
            return Err(invalid("cron command must be a single non-empty line".to_string()));
        }
        if !is_identifier(&self.user) {
            return Err(invalid(format!("invalid user: {:?}", self.user)));
        }
        Ok(())
    }
}

/// Request to issue a certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueCertificateRequest {
    /// Domains the certificate covers.
    pub domains: Vec<String>,
    /// Web app the certificate is installed for.
    #[serde(default)]
    pub webapp_id: Option<WebAppId>,
}

impl IssueCertificateRequest {
    /// Validate the request.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRequest` if no domain is given or one is
    /// malformed.
    pub fn validate(&self) -> Result<()> {
        if self.domains.is_empty() {
            return Err(invalid("at least one domain is required".to_string()));
        }
        if let Some(domain) = self.domains.iter().find(|d| !is_domain(d)) {
            return Err(invalid(format!("invalid domain: {domain:?}")));
        }
        Ok(())
    }
}

/// Request to create a database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDatabaseRequest {
    /// Database name.
    pub name: String,
    /// Engine hosting it.
    pub engine: DatabaseEngine,
}

impl CreateDatabaseRequest {
    /// Validate the request.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRequest` if the name is not a plain
    /// identifier.
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return Err(invalid(format!("invalid database name: {:?}", self.name)));
        }
        Ok(())
    }
}

/// A record created or changed by an operator action, with the job carrying
/// it out.
#[derive(Debug, Clone, Serialize)]
pub struct Dispatched<T> {
    /// The record as persisted.
    pub record: T,
    /// The job dispatched for it.
    pub job: Job,
}

// =============================================================================
// Alerting
// =============================================================================

/// Resource alert settings for a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertSettings {
    /// Whether alerts may trigger.
    pub enabled: bool,
    /// Load average threshold.
    #[serde(default)]
    pub load_threshold: Option<f64>,
    /// Memory usage percentage threshold.
    #[serde(default)]
    pub memory_threshold: Option<f64>,
    /// Disk usage percentage threshold.
    #[serde(default)]
    pub disk_threshold: Option<f64>,
}

// =============================================================================
// Helpers
// =============================================================================

fn invalid(message: String) -> ControlError {
    ControlError::InvalidRequest(message)
}

fn is_domain(s: &str) -> bool {
    !s.is_empty()
        && !s.contains(char::is_whitespace)
        && !s.contains(char::is_control)
        && !s.contains('/')
}

/// True if `s` fits on one line of a generated config file.
fn is_single_line(s: &str) -> bool {
    !s.contains(char::is_control)
}

fn check_directory(directory: &str) -> Result<()> {
    if !directory.starts_with('/') || !is_single_line(directory) {
        return Err(invalid(format!(
            "directory must be an absolute single-line path: {directory:?}"
        )));
    }
    Ok(())
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn is_env_key(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
