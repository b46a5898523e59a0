//! Domain types stored in the database.
//!
//! These types represent the persisted state of servers, jobs and every
//! resource kind the control plane drives through job callbacks.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use fleet_core::{
    CertificateId, CronJobId, DatabaseId, FirewallRuleId, JobId, MonitorId, ServerId, ServiceId,
    SupervisorProgramId, WebAppId,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// Servers
// =============================================================================

/// A managed server and its resource-alert state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    /// Unique identifier for the server.
    pub server_id: ServerId,
    /// Human-readable name.
    pub name: String,
    /// Public address of the server.
    pub ip_address: String,
    /// Provisioning state.
    pub status: ServerStatus,
    /// Reason for the last failed provisioning job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Whether resource alerts may be triggered for this server.
    pub resource_alerts_enabled: bool,
    /// 1-minute load average above which a load alert triggers.
    #[serde(default)]
    pub alert_load_threshold: Option<f64>,
    /// Memory usage percentage above which a memory alert triggers.
    #[serde(default)]
    pub alert_memory_threshold: Option<f64>,
    /// Disk usage percentage above which a disk alert triggers.
    #[serde(default)]
    pub alert_disk_threshold: Option<f64>,
    /// Whether a load alert is currently active.
    pub is_load_alert_active: bool,
    /// Whether a memory alert is currently active.
    pub is_memory_alert_active: bool,
    /// Whether a disk alert is currently active.
    pub is_disk_alert_active: bool,
    /// When the last resource alert notification was emitted.
    pub last_resource_alert_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Server {
    /// Create a new pending server with alerting disabled.
    #[must_use]
    pub fn new(name: impl Into<String>, ip_address: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            server_id: ServerId::generate(),
            name: name.into(),
            ip_address: ip_address.into(),
            status: ServerStatus::Pending,
            error_message: None,
            resource_alerts_enabled: false,
            alert_load_threshold: None,
            alert_memory_threshold: None,
            alert_disk_threshold: None,
            is_load_alert_active: false,
            is_memory_alert_active: false,
            is_disk_alert_active: false,
            last_resource_alert_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if any resource alert flag is set.
    #[must_use]
    pub const fn has_active_alert(&self) -> bool {
        self.is_load_alert_active || self.is_memory_alert_active || self.is_disk_alert_active
    }
}

/// Provisioning state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// Registered, not yet provisioned.
    Pending,
    /// Provisioning job in flight.
    Provisioning,
    /// Provisioned and reachable.
    Active,
    /// Provisioning failed.
    Failed,
}

// =============================================================================
// Jobs
// =============================================================================

/// Type-specific job parameters, as a JSON object.
pub type JobPayload = serde_json::Map<String, serde_json::Value>;

/// A job record: one privileged operation addressed to a server agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for the job.
    pub job_id: JobId,
    /// Server whose agent executes the job.
    pub server_id: ServerId,
    /// The operation to perform.
    pub job_type: JobType,
    /// Type-specific parameters.
    pub payload: JobPayload,
    /// Higher values are delivered first.
    pub priority: i32,
    /// Current job state.
    pub status: JobStatus,
    /// The resource whose state this job's outcome drives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
    /// The job whose outcome dispatched this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<JobId>,
    /// Error reported by the agent (or the sweeper) on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Output reported by the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Point after which a non-terminal job is considered lost.
    #[serde(default)]
    pub deadline_at: Option<DateTime<Utc>>,
    /// When the transport acknowledged delivery.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal outcome was recorded.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Returns true once the job has a terminal outcome.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Look up a string payload value.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Lifecycle states for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum JobStatus {
    /// Persisted, waiting for delivery.
    Pending = 1,
    /// Delivered to the agent.
    Running = 2,
    /// The agent reported success.
    Completed = 3,
    /// The agent reported failure, or the job timed out.
    Failed = 4,
}

impl JobStatus {
    /// Convert the status to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `JobStatus`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Pending),
            2 => Some(Self::Running),
            3 => Some(Self::Completed),
            4 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The closed set of operations an agent can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum JobType {
    CreateWebapp,
    DeleteWebapp,
    Deploy,
    GitDeploy,
    SslIssue,
    ServiceRestart,
    ServiceReload,
    SupervisorCreate,
    SupervisorStart,
    SupervisorStop,
    SupervisorRestart,
    SupervisorUpdate,
    SupervisorDelete,
    SyncCrontab,
    ApplyFirewallRule,
    CreateDatabase,
    DeleteDatabase,
    DatabaseBackup,
    ListDirectory,
    SshKeyAdd,
    CheckServices,
    TestDatabaseConnection,
    ProvisionServer,
    ProvisionPhp,
    ProvisionNodejs,
    ProvisionDatabase,
}

impl JobType {
    /// Every job type, in declaration order.
    pub const ALL: [Self; 26] = [
        Self::CreateWebapp,
        Self::DeleteWebapp,
        Self::Deploy,
        Self::GitDeploy,
        Self::SslIssue,
        Self::ServiceRestart,
        Self::ServiceReload,
        Self::SupervisorCreate,
        Self::SupervisorStart,
        Self::SupervisorStop,
        Self::SupervisorRestart,
        Self::SupervisorUpdate,
        Self::SupervisorDelete,
        Self::SyncCrontab,
        Self::ApplyFirewallRule,
        Self::CreateDatabase,
        Self::DeleteDatabase,
        Self::DatabaseBackup,
        Self::ListDirectory,
        Self::SshKeyAdd,
        Self::CheckServices,
        Self::TestDatabaseConnection,
        Self::ProvisionServer,
        Self::ProvisionPhp,
        Self::ProvisionNodejs,
        Self::ProvisionDatabase,
    ];

    /// The wire name of the job type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateWebapp => "create_webapp",
            Self::DeleteWebapp => "delete_webapp",
            Self::Deploy => "deploy",
            Self::GitDeploy => "git_deploy",
            Self::SslIssue => "ssl_issue",
            Self::ServiceRestart => "service_restart",
            Self::ServiceReload => "service_reload",
            Self::SupervisorCreate => "supervisor_create",
            Self::SupervisorStart => "supervisor_start",
            Self::SupervisorStop => "supervisor_stop",
            Self::SupervisorRestart => "supervisor_restart",
            Self::SupervisorUpdate => "supervisor_update",
            Self::SupervisorDelete => "supervisor_delete",
            Self::SyncCrontab => "sync_crontab",
            Self::ApplyFirewallRule => "apply_firewall_rule",
            Self::CreateDatabase => "create_database",
            Self::DeleteDatabase => "delete_database",
            Self::DatabaseBackup => "database_backup",
            Self::ListDirectory => "list_directory",
            Self::SshKeyAdd => "ssh_key_add",
            Self::CheckServices => "check_services",
            Self::TestDatabaseConnection => "test_database_connection",
            Self::ProvisionServer => "provision_server",
            Self::ProvisionPhp => "provision_php",
            Self::ProvisionNodejs => "provision_nodejs",
            Self::ProvisionDatabase => "provision_database",
        }
    }

    /// Returns true for the `provision_*` family.
    #[must_use]
    pub const fn is_provisioning(self) -> bool {
        matches!(
            self,
            Self::ProvisionServer
                | Self::ProvisionPhp
                | Self::ProvisionNodejs
                | Self::ProvisionDatabase
        )
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown job type: {s}"))
    }
}

/// Tagged reference from a job to the resource its outcome drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum ResourceRef {
    Server(ServerId),
    WebApp(WebAppId),
    Service(ServiceId),
    SupervisorProgram(SupervisorProgramId),
    SslCertificate(CertificateId),
    Database(DatabaseId),
    FirewallRule(FirewallRuleId),
    CronJob(CronJobId),
}

// =============================================================================
// Web applications
// =============================================================================

/// A site or application hosted on a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebApp {
    /// Unique identifier for the app.
    pub webapp_id: WebAppId,
    /// Server the app lives on.
    pub server_id: ServerId,
    /// Primary domain.
    pub domain: String,
    /// Runtime flavour.
    pub app_type: AppType,
    /// Provisioning state.
    pub status: ResourceStatus,
    /// Reason for the last failed job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Application root on the server.
    pub directory: String,
    /// System user the app runs as.
    pub system_user: String,
    /// Port of a single-process Node.js app.
    #[serde(default)]
    pub node_port: Option<u16>,
    /// Processes of a monorepo Node.js app.
    #[serde(default)]
    pub node_processes: Vec<NodeProcess>,
    /// Package manager used to start a Node.js app.
    #[serde(default)]
    pub package_manager: PackageManager,
    /// Start command or script name of a Node.js app.
    #[serde(default)]
    pub start_command: Option<String>,
    /// Supervisor program running the app (the first one for monorepos).
    #[serde(default)]
    pub supervisor_program_id: Option<SupervisorProgramId>,
    /// Outcome of the latest deployment.
    #[serde(default)]
    pub deploy_status: DeployStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl WebApp {
    /// Returns true for Node.js apps.
    #[must_use]
    pub fn is_nodejs(&self) -> bool {
        self.app_type == AppType::Nodejs
    }

    /// Returns true for Node.js apps that declare multiple processes.
    #[must_use]
    pub fn is_monorepo(&self) -> bool {
        self.is_nodejs() && !self.node_processes.is_empty()
    }

    /// Every port this app holds on its server.
    pub fn held_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.node_port
            .into_iter()
            .chain(self.node_processes.iter().map(|p| p.port))
    }
}

/// Runtime flavour of a web app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppType {
    /// PHP served through PHP-FPM.
    Php,
    /// Node.js processes behind a reverse proxy.
    Nodejs,
    /// Static files.
    Static,
}

/// One process of a monorepo Node.js deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProcess {
    /// Process name, unique within the app.
    pub name: String,
    /// Command run verbatim by the supervisor.
    pub command: String,
    /// Port the process listens on.
    pub port: u16,
}

/// Node.js package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PackageManager {
    /// npm.
    #[default]
    Npm,
    /// Yarn.
    Yarn,
    /// pnpm.
    Pnpm,
}

impl PackageManager {
    /// The executable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Yarn => "yarn",
            Self::Pnpm => "pnpm",
        }
    }
}

/// Provisioning state shared by the simpler resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Job dispatched, no outcome yet.
    Pending,
    /// Last job succeeded.
    Active,
    /// Last job failed; `error_message` holds the reason.
    Failed,
}

/// Outcome of the latest deployment of a web app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    /// No deployment has been requested yet.
    #[default]
    #[serde(rename = "none")]
    NeverDeployed,
    /// Deploy job in flight.
    Deploying,
    /// Last deploy succeeded.
    Deployed,
    /// Last deploy failed.
    Failed,
}

// =============================================================================
// Supervisor programs
// =============================================================================

/// A supervised long-running process definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorProgram {
    /// Unique identifier for the program.
    pub program_id: SupervisorProgramId,
    /// Server the program runs on.
    pub server_id: ServerId,
    /// Web app this program serves, if any.
    #[serde(default)]
    pub webapp_id: Option<WebAppId>,
    /// Program name, unique per server.
    pub name: String,
    /// Command line.
    pub command: String,
    /// Working directory.
    pub directory: String,
    /// User the program runs as.
    pub user: String,
    /// Number of process instances.
    pub numprocs: u32,
    /// Start with the supervisor daemon.
    pub autostart: bool,
    /// Restart on exit.
    pub autorestart: bool,
    /// Seconds a process must stay up to count as started.
    pub startsecs: u32,
    /// Seconds to wait for a graceful stop.
    pub stopwaitsecs: u32,
    /// Environment variables.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Current state.
    pub status: ProgramStatus,
    /// Reason for the last failed job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// State of a supervisor program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramStatus {
    /// Created, not yet confirmed by the agent.
    Pending,
    /// Running under the supervisor.
    Active,
    /// Stopped on request.
    Stopped,
    /// Last job failed.
    Failed,
}

// =============================================================================
// Satellite resources
// =============================================================================

/// A system service managed on a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Unique identifier for the service.
    pub service_id: ServiceId,
    /// Server the service runs on.
    pub server_id: ServerId,
    /// Unit name, e.g. `nginx`.
    pub name: String,
    /// Current state.
    pub status: ResourceStatus,
    /// Reason for the last failed job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// An SSL certificate issued on a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SslCertificate {
    /// Unique identifier for the certificate.
    pub certificate_id: CertificateId,
    /// Server holding the certificate.
    pub server_id: ServerId,
    /// Web app the certificate secures.
    #[serde(default)]
    pub webapp_id: Option<WebAppId>,
    /// Covered domains.
    pub domains: Vec<String>,
    /// Current state.
    pub status: ResourceStatus,
    /// Reason for the last failed job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the certificate was issued.
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
    /// When the certificate expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A database hosted on a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    /// Unique identifier for the database.
    pub database_id: DatabaseId,
    /// Server hosting the database.
    pub server_id: ServerId,
    /// Database name.
    pub name: String,
    /// Database engine.
    pub engine: DatabaseEngine,
    /// Current state.
    pub status: ResourceStatus,
    /// Reason for the last failed job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum DatabaseEngine {
    Mysql,
    Postgresql,
}

/// A firewall rule applied on a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRule {
    /// Unique identifier for the rule.
    pub rule_id: FirewallRuleId,
    /// Server the rule applies to.
    pub server_id: ServerId,
    /// Destination port.
    pub port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Allow or deny.
    pub action: FirewallAction,
    /// Source address or CIDR; any when absent.
    #[serde(default)]
    pub source: Option<String>,
    /// Current state.
    pub status: ResourceStatus,
    /// Reason for the last failed job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Transport protocol of a firewall rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Firewall rule action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum FirewallAction {
    Allow,
    Deny,
}

/// A crontab entry on a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    /// Unique identifier for the entry.
    pub cron_id: CronJobId,
    /// Server whose crontab holds the entry.
    pub server_id: ServerId,
    /// Five-field schedule expression.
    pub expression: String,
    /// Command to run.
    pub command: String,
    /// User whose crontab holds the entry.
    pub user: String,
    /// Current state.
    pub status: ResourceStatus,
    /// Reason for the last failed sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Health monitors
// =============================================================================

/// An uptime monitor probing an HTTP or TCP target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMonitor {
    /// Unique identifier for the monitor.
    pub monitor_id: MonitorId,
    /// Server the target belongs to, if any.
    #[serde(default)]
    pub server_id: Option<ServerId>,
    /// Probe kind.
    pub monitor_type: MonitorType,
    /// URL (`http`) or `host:port` (`tcp`).
    pub url: String,
    /// Seconds between probes.
    pub interval_seconds: u32,
    /// Probe timeout in seconds.
    pub timeout_seconds: u32,
    /// Consecutive failures before the monitor goes down.
    pub failure_threshold: u32,
    /// Consecutive successes before a down monitor recovers.
    pub recovery_threshold: u32,
    /// Current state.
    pub status: MonitorStatus,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Successes since the last failure.
    pub consecutive_successes: u32,
    /// Error of the most recent failed probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the last probe ran.
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl HealthMonitor {
    /// Create a pending HTTP monitor with default timing and thresholds.
    #[must_use]
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            monitor_id: MonitorId::generate(),
            server_id: None,
            monitor_type: MonitorType::Http,
            url: url.into(),
            interval_seconds: 60,
            timeout_seconds: 10,
            failure_threshold: 3,
            recovery_threshold: 2,
            status: MonitorStatus::Pending,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_error: None,
            last_checked_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Probe kind of a health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorType {
    /// HTTP GET expecting a 2xx/3xx response.
    Http,
    /// TCP connect.
    Tcp,
}

/// State of a health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    /// No conclusive probe yet.
    Pending,
    /// Target reachable.
    Up,
    /// Target failed `failure_threshold` probes in a row.
    Down,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_u8_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_u8(status.as_u8()), Some(status));
        }
        assert_eq!(JobStatus::from_u8(0), None);
    }

    #[test]
    fn job_type_wire_names_match_serde() {
        for job_type in JobType::ALL {
            let json = serde_json::to_string(&job_type).unwrap();
            assert_eq!(json, format!("\"{}\"", job_type.as_str()));
            assert_eq!(job_type.as_str().parse::<JobType>().unwrap(), job_type);
        }
    }

    #[test]
    fn unknown_job_type_rejected() {
        assert!("reboot_everything".parse::<JobType>().is_err());
    }

    #[test]
    fn resource_ref_is_tagged() {
        let id = WebAppId::from_bytes([7u8; 16]);
        let json = serde_json::to_value(ResourceRef::WebApp(id)).unwrap();
        assert_eq!(json["kind"], "web_app");
        assert_eq!(json["id"], id.to_string());
    }

    #[test]
    fn deploy_status_defaults_to_none() {
        assert_eq!(DeployStatus::default(), DeployStatus::NeverDeployed);
        assert_eq!(
            serde_json::to_string(&DeployStatus::NeverDeployed).unwrap(),
            "\"none\""
        );
    }

    #[test]
    fn held_ports_covers_both_shapes() {
        let now = Utc::now();
        let app = WebApp {
            webapp_id: WebAppId::generate(),
            server_id: ServerId::generate(),
            domain: "example.com".into(),
            app_type: AppType::Nodejs,
            status: ResourceStatus::Pending,
            error_message: None,
            directory: "/srv/example".into(),
            system_user: "deploy".into(),
            node_port: Some(3000),
            node_processes: vec![NodeProcess {
                name: "api".into(),
                command: "node api.js".into(),
                port: 3001,
            }],
            package_manager: PackageManager::Npm,
            start_command: None,
            supervisor_program_id: None,
            deploy_status: DeployStatus::NeverDeployed,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(app.held_ports().collect::<Vec<_>>(), vec![3000, 3001]);
        assert!(app.is_monorepo());
    }
}
