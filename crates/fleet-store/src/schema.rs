//! Database schema definitions and column families.
//!
//! Every record kind has a primary column family keyed by its 16-byte ID.
//! Records that belong to a server also get a `*_by_server` index keyed by
//! `server_id || record_id` with empty values.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Server records, keyed by `server_id`.
    pub const SERVERS: &str = "servers";

    /// Primary job records, keyed by `job_id`.
    pub const JOBS: &str = "jobs";

    /// Index: jobs by server, keyed by `server_id || job_id`.
    pub const JOBS_BY_SERVER: &str = "jobs_by_server";

    /// Index: jobs by status, keyed by `status || job_id`.
    pub const JOBS_BY_STATUS: &str = "jobs_by_status";

    /// Index: jobs by server and status, keyed by `server_id || status || job_id`.
    pub const JOBS_BY_SERVER_STATUS: &str = "jobs_by_server_status";

    /// Index: follow-up jobs by parent, keyed by `parent_job_id || job_id`.
    pub const JOBS_BY_PARENT: &str = "jobs_by_parent";

    /// Web app records, keyed by `webapp_id`.
    pub const WEB_APPS: &str = "web_apps";

    /// Index: web apps by server.
    pub const WEB_APPS_BY_SERVER: &str = "web_apps_by_server";

    /// Supervisor program records, keyed by `program_id`.
    pub const SUPERVISOR_PROGRAMS: &str = "supervisor_programs";

    /// Index: supervisor programs by server.
    pub const SUPERVISOR_BY_SERVER: &str = "supervisor_by_server";

    /// Unique index: `server_id || name` to `program_id`.
    pub const SUPERVISOR_BY_NAME: &str = "supervisor_by_name";

    /// Service records, keyed by `service_id`.
    pub const SERVICES: &str = "services";

    /// Index: services by server.
    pub const SERVICES_BY_SERVER: &str = "services_by_server";

    /// SSL certificate records, keyed by `certificate_id`.
    pub const CERTIFICATES: &str = "certificates";

    /// Index: certificates by server.
    pub const CERTIFICATES_BY_SERVER: &str = "certificates_by_server";

    /// Database records, keyed by `database_id`.
    pub const DATABASES: &str = "databases";

    /// Index: databases by server.
    pub const DATABASES_BY_SERVER: &str = "databases_by_server";

    /// Firewall rule records, keyed by `rule_id`.
    pub const FIREWALL_RULES: &str = "firewall_rules";

    /// Index: firewall rules by server.
    pub const FIREWALL_RULES_BY_SERVER: &str = "firewall_rules_by_server";

    /// Cron job records, keyed by `cron_id`.
    pub const CRON_JOBS: &str = "cron_jobs";

    /// Index: cron jobs by server.
    pub const CRON_JOBS_BY_SERVER: &str = "cron_jobs_by_server";

    /// Health monitor records, keyed by `monitor_id`.
    pub const HEALTH_MONITORS: &str = "health_monitors";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::SERVERS,
        cf::JOBS,
        cf::JOBS_BY_SERVER,
        cf::JOBS_BY_STATUS,
        cf::JOBS_BY_SERVER_STATUS,
        cf::JOBS_BY_PARENT,
        cf::WEB_APPS,
        cf::WEB_APPS_BY_SERVER,
        cf::SUPERVISOR_PROGRAMS,
        cf::SUPERVISOR_BY_SERVER,
        cf::SUPERVISOR_BY_NAME,
        cf::SERVICES,
        cf::SERVICES_BY_SERVER,
        cf::CERTIFICATES,
        cf::CERTIFICATES_BY_SERVER,
        cf::DATABASES,
        cf::DATABASES_BY_SERVER,
        cf::FIREWALL_RULES,
        cf::FIREWALL_RULES_BY_SERVER,
        cf::CRON_JOBS,
        cf::CRON_JOBS_BY_SERVER,
        cf::HEALTH_MONITORS,
    ]
}
