//! Job outcome processing.
//!
//! `CallbackProcessor::handle` is the single entry point for job outcomes,
//! whether reported by an agent or synthesized by the sweeper. Deliveries of
//! one job are serialized by a per-job lock, and a job that is already
//! terminal is reported as a duplicate without touching anything, so
//! at-least-once delivery applies each outcome exactly once.
//!
//! Resource mutations and follow-up dispatches happen before the job is
//! marked terminal. Program names are deterministic and programs are upserted
//! by name, and follow-ups carry their parent's job id, so replaying an
//! outcome after a failed write reuses what the first attempt created.

use std::sync::Arc;

use chrono::{Duration, Utc};
use fleet_core::{
    CertificateId, CronJobId, DatabaseId, FirewallRuleId, JobId, ServerId, ServiceId,
    SupervisorProgramId, WebAppId,
};
use fleet_store::{
    DeployStatus, Job, JobPayload, JobStatus, JobType, ProgramStatus, ResourceRef,
    ResourceStatus, ServerStatus, Store, SupervisorProgram, WebApp,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::dispatcher::JobDispatcher;
use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::locks::StripedLocks;
use crate::notify::{NotificationKind, NotificationRequest};
use crate::supervisor::{self, SupervisorConfigBuilder};

/// Validity of an issued certificate.
const CERTIFICATE_LIFETIME_DAYS: i64 = 90;

/// The outcome of a job as reported by its agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackOutcome {
    /// Whether the job succeeded.
    pub success: bool,
    /// Failure reason.
    #[serde(default)]
    pub error: Option<String>,
    /// Captured output.
    #[serde(default)]
    pub output: Option<String>,
}

impl CallbackOutcome {
    /// A successful outcome.
    #[must_use]
    pub const fn success(output: Option<String>) -> Self {
        Self {
            success: true,
            error: None,
            output,
        }
    }

    /// A failed outcome.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            output: None,
        }
    }

    /// The failure reason, or `None` on success. A failure without a usable
    /// reason still yields one.
    fn error_message(&self) -> Option<String> {
        if self.success {
            return None;
        }
        Some(
            self.error
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map_or_else(|| "job failed without an error message".to_string(), str::to_string),
        )
    }
}

/// What processing a callback did.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackReport {
    /// The job after processing.
    pub job: Job,
    /// True if the job was already terminal and nothing was applied.
    pub duplicate: bool,
    /// Jobs dispatched as a consequence of this outcome.
    pub follow_up_jobs: Vec<JobId>,
    /// Notifications to deliver.
    pub notifications: Vec<NotificationRequest>,
}

/// Side effects collected while applying an outcome.
#[derive(Default)]
struct Effects {
    follow_ups: Vec<JobId>,
    notifications: Vec<NotificationRequest>,
}

/// Applies job outcomes to the resources they drive.
pub struct CallbackProcessor<S: Store> {
    store: Arc<S>,
    dispatcher: Arc<JobDispatcher<S>>,
    supervisor: SupervisorConfigBuilder,
    job_locks: Arc<StripedLocks>,
}

impl<S: Store> CallbackProcessor<S> {
    /// Create a new processor.
    ///
    /// `job_locks` must be the table the dispatcher uses.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        dispatcher: Arc<JobDispatcher<S>>,
        supervisor: SupervisorConfigBuilder,
        job_locks: Arc<StripedLocks>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            supervisor,
            job_locks,
        }
    }

    /// Apply a job outcome.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::JobNotFound` if the job doesn't exist, or a
    /// store error. A store error leaves the job non-terminal so redelivery
    /// can retry.
    pub fn handle(&self, job_id: &JobId, outcome: &CallbackOutcome) -> Result<CallbackReport> {
        let _guard = self.job_locks.lock(job_id.as_bytes());

        let mut job = self
            .store
            .get_job(job_id)?
            .ok_or(ControlError::JobNotFound(*job_id))?;

        if job.is_terminal() {
            tracing::debug!(job_id = %job_id, status = ?job.status, "Duplicate callback ignored");
            return Ok(CallbackReport {
                job,
                duplicate: true,
                follow_up_jobs: Vec::new(),
                notifications: Vec::new(),
            });
        }

        let error = outcome.error_message();
        let mut effects = Effects::default();

        if let Some(resource) = job.resource {
            self.apply(&job, resource, error.as_deref(), &mut effects)?;

            if let Some(error) = &error {
                effects.notifications.push(NotificationRequest::new(
                    Some(job.server_id),
                    NotificationKind::JobFailed {
                        job_id: job.job_id,
                        job_type: job.job_type,
                        error: error.clone(),
                    },
                ));
            }
        }

        let status = if error.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        debug_assert!(lifecycle::is_valid_job_transition(job.status, status));
        job.status = status;
        job.error = error;
        job.output.clone_from(&outcome.output);
        job.finished_at = Some(Utc::now());
        self.store.put_job(&job)?;

        tracing::info!(
            job_id = %job.job_id,
            job_type = %job.job_type,
            status = ?job.status,
            follow_ups = effects.follow_ups.len(),
            "Processed job callback"
        );

        Ok(CallbackReport {
            job,
            duplicate: false,
            follow_up_jobs: effects.follow_ups,
            notifications: effects.notifications,
        })
    }

    fn apply(
        &self,
        job: &Job,
        resource: ResourceRef,
        error: Option<&str>,
        effects: &mut Effects,
    ) -> Result<()> {
        match resource {
            ResourceRef::WebApp(id) => self.apply_webapp(job, id, error, effects),
            ResourceRef::SupervisorProgram(id) => self.apply_program(job, id, error),
            ResourceRef::Service(id) => self.apply_service(id, error),
            ResourceRef::SslCertificate(id) => self.apply_certificate(id, error),
            ResourceRef::Database(id) => self.apply_database(job, id, error),
            ResourceRef::FirewallRule(id) => self.apply_firewall_rule(id, error),
            ResourceRef::CronJob(id) => self.apply_cron_job(id, error),
            ResourceRef::Server(id) => self.apply_server(job, id, error),
        }
    }

    // =========================================================================
    // Web apps
    // =========================================================================

    fn apply_webapp(
        &self,
        job: &Job,
        webapp_id: WebAppId,
        error: Option<&str>,
        effects: &mut Effects,
    ) -> Result<()> {
        let Some(mut app) = self.store.get_web_app(&webapp_id)? else {
            if job.job_type == JobType::DeleteWebapp {
                tracing::debug!(job_id = %job.job_id, webapp_id = %webapp_id, "Web app removal settled");
                return Ok(());
            }
            tracing::warn!(
                job_id = %job.job_id,
                webapp_id = %webapp_id,
                "Web app no longer exists, outcome recorded on job only"
            );
            return Ok(());
        };

        match job.job_type {
            JobType::CreateWebapp => self.on_webapp_created(job, &mut app, error, effects),
            JobType::Deploy | JobType::GitDeploy => {
                self.on_deployed(job, &mut app, error, effects)
            }
            other => {
                tracing::debug!(
                    job_id = %job.job_id,
                    job_type = %other,
                    "No web app transition for job type"
                );
                Ok(())
            }
        }
    }

    fn on_webapp_created(
        &self,
        job: &Job,
        app: &mut WebApp,
        error: Option<&str>,
        effects: &mut Effects,
    ) -> Result<()> {
        let resource = ResourceRef::WebApp(app.webapp_id);

        if error.is_none() {
            if !transition_allowed(resource, app.status, ResourceStatus::Active) {
                return Ok(());
            }
            if app.is_nodejs() {
                self.create_node_programs(job, app, effects)?;
            }
        }

        if settle(resource, &mut app.status, &mut app.error_message, error) {
            app.updated_at = Utc::now();
            self.store.put_web_app(app)?;
            tracing::info!(webapp_id = %app.webapp_id, status = ?app.status, "Web app settled");
        }
        Ok(())
    }

    /// Create one supervisor program per Node.js process, dispatch a
    /// `supervisor_create` for each, and link the first to the app.
    fn create_node_programs(
        &self,
        parent: &Job,
        app: &mut WebApp,
        effects: &mut Effects,
    ) -> Result<()> {
        let specs: Vec<(String, String, Option<u16>)> = if app.is_monorepo() {
            app.node_processes
                .iter()
                .map(|p| {
                    (
                        supervisor::monorepo_program_name(&app.webapp_id, &p.name),
                        p.command.clone(),
                        Some(p.port),
                    )
                })
                .collect()
        } else {
            vec![(
                supervisor::node_program_name(&app.webapp_id),
                supervisor::node_command_for(app),
                app.node_port,
            )]
        };

        let mut first = None;
        for (name, command, port) in specs {
            let mut program = self.supervisor.node_program(app, name, command, port);
            if let Some(existing) = self
                .store
                .get_supervisor_program_by_name(&app.server_id, &program.name)?
            {
                program.program_id = existing.program_id;
                program.created_at = existing.created_at;
            }
            self.store.put_supervisor_program(&program)?;

            let job = self.dispatch_supervisor(parent, &program, JobType::SupervisorCreate, true)?;
            effects.follow_ups.push(job.job_id);
            first.get_or_insert(program.program_id);
        }

        app.supervisor_program_id = first;
        Ok(())
    }

    fn on_deployed(
        &self,
        parent: &Job,
        app: &mut WebApp,
        error: Option<&str>,
        effects: &mut Effects,
    ) -> Result<()> {
        match error {
            Some(error) => {
                // The app keeps serving the previous release.
                app.deploy_status = DeployStatus::Failed;
                app.error_message = Some(error.to_string());
            }
            None => {
                app.deploy_status = DeployStatus::Deployed;
                app.error_message = None;

                if let Some(program_id) = app.supervisor_program_id.filter(|_| app.is_nodejs()) {
                    match self.store.get_supervisor_program(&program_id)? {
                        Some(program) => {
                            let job = self.dispatch_supervisor(
                                parent,
                                &program,
                                JobType::SupervisorRestart,
                                false,
                            )?;
                            effects.follow_ups.push(job.job_id);
                        }
                        None => tracing::warn!(
                            webapp_id = %app.webapp_id,
                            program_id = %program_id,
                            "Linked supervisor program missing, no restart dispatched"
                        ),
                    }
                }
            }
        }

        app.updated_at = Utc::now();
        self.store.put_web_app(app)?;
        tracing::info!(
            webapp_id = %app.webapp_id,
            deploy_status = ?app.deploy_status,
            "Deploy settled"
        );
        Ok(())
    }

    fn dispatch_supervisor(
        &self,
        parent: &Job,
        program: &SupervisorProgram,
        job_type: JobType,
        with_config: bool,
    ) -> Result<Job> {
        let mut payload = JobPayload::new();
        payload.insert("program_id".into(), json!(program.program_id));
        payload.insert("name".into(), json!(program.name));
        if with_config {
            payload.insert(
                "config".into(),
                json!(self.supervisor.generate_config(program)?),
            );
        }
        self.dispatcher.dispatch_follow_up(
            parent,
            ResourceRef::SupervisorProgram(program.program_id),
            job_type,
            payload,
            0,
        )
    }

    // =========================================================================
    // Supervisor programs
    // =========================================================================

    fn apply_program(
        &self,
        job: &Job,
        program_id: SupervisorProgramId,
        error: Option<&str>,
    ) -> Result<()> {
        let Some(mut program) = self.store.get_supervisor_program(&program_id)? else {
            tracing::warn!(program_id = %program_id, "Supervisor program no longer exists");
            return Ok(());
        };
        let resource = ResourceRef::SupervisorProgram(program_id);

        if error.is_none() && job.job_type == JobType::SupervisorDelete {
            self.store.delete_supervisor_program(&program_id)?;
            self.unlink_program(&program)?;
            tracing::info!(program_id = %program_id, name = %program.name, "Supervisor program removed");
            return Ok(());
        }

        let target = match (job.job_type, error) {
            (_, Some(_)) => ProgramStatus::Failed,
            (JobType::SupervisorStop, None) => ProgramStatus::Stopped,
            (
                JobType::SupervisorCreate
                | JobType::SupervisorUpdate
                | JobType::SupervisorStart
                | JobType::SupervisorRestart,
                None,
            ) => ProgramStatus::Active,
            (other, None) => {
                tracing::debug!(job_type = %other, "No program transition for job type");
                return Ok(());
            }
        };

        if let Err(e) = lifecycle::validate_program_transition(resource, program.status, target) {
            tracing::warn!(error = %e, "Skipping invalid transition");
            return Ok(());
        }

        program.status = target;
        program.error_message = error.map(str::to_string);
        program.updated_at = Utc::now();
        self.store.put_supervisor_program(&program)?;
        tracing::info!(program_id = %program_id, status = ?target, "Supervisor program settled");
        Ok(())
    }

    fn unlink_program(&self, program: &SupervisorProgram) -> Result<()> {
        let Some(webapp_id) = program.webapp_id else {
            return Ok(());
        };
        if let Some(mut app) = self.store.get_web_app(&webapp_id)? {
            if app.supervisor_program_id == Some(program.program_id) {
                app.supervisor_program_id = None;
                app.updated_at = Utc::now();
                self.store.put_web_app(&app)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Satellite resources
    // =========================================================================

    fn apply_service(&self, service_id: ServiceId, error: Option<&str>) -> Result<()> {
        let Some(mut service) = self.store.get_service(&service_id)? else {
            tracing::warn!(service_id = %service_id, "Service no longer exists");
            return Ok(());
        };
        let resource = ResourceRef::Service(service_id);
        if settle(resource, &mut service.status, &mut service.error_message, error) {
            service.updated_at = Utc::now();
            self.store.put_service(&service)?;
            tracing::info!(service_id = %service_id, status = ?service.status, "Service settled");
        }
        Ok(())
    }

    fn apply_certificate(&self, certificate_id: CertificateId, error: Option<&str>) -> Result<()> {
        let Some(mut certificate) = self.store.get_certificate(&certificate_id)? else {
            tracing::warn!(certificate_id = %certificate_id, "Certificate no longer exists");
            return Ok(());
        };
        let resource = ResourceRef::SslCertificate(certificate_id);
        if settle(
            resource,
            &mut certificate.status,
            &mut certificate.error_message,
            error,
        ) {
            let now = Utc::now();
            if error.is_none() {
                certificate.issued_at = Some(now);
                certificate.expires_at = Duration::try_days(CERTIFICATE_LIFETIME_DAYS)
                    .and_then(|d| now.checked_add_signed(d));
            }
            certificate.updated_at = now;
            self.store.put_certificate(&certificate)?;
            tracing::info!(
                certificate_id = %certificate_id,
                status = ?certificate.status,
                "Certificate settled"
            );
        }
        Ok(())
    }

    fn apply_database(&self, job: &Job, database_id: DatabaseId, error: Option<&str>) -> Result<()> {
        let Some(mut database) = self.store.get_database(&database_id)? else {
            tracing::warn!(database_id = %database_id, "Database no longer exists");
            return Ok(());
        };

        if error.is_none() && job.job_type == JobType::DeleteDatabase {
            self.store.delete_database(&database_id)?;
            tracing::info!(database_id = %database_id, "Database removed");
            return Ok(());
        }

        let resource = ResourceRef::Database(database_id);
        if settle(resource, &mut database.status, &mut database.error_message, error) {
            database.updated_at = Utc::now();
            self.store.put_database(&database)?;
            tracing::info!(database_id = %database_id, status = ?database.status, "Database settled");
        }
        Ok(())
    }

    fn apply_firewall_rule(&self, rule_id: FirewallRuleId, error: Option<&str>) -> Result<()> {
        let Some(mut rule) = self.store.get_firewall_rule(&rule_id)? else {
            tracing::warn!(rule_id = %rule_id, "Firewall rule no longer exists");
            return Ok(());
        };
        let resource = ResourceRef::FirewallRule(rule_id);
        if settle(resource, &mut rule.status, &mut rule.error_message, error) {
            rule.updated_at = Utc::now();
            self.store.put_firewall_rule(&rule)?;
            tracing::info!(rule_id = %rule_id, status = ?rule.status, "Firewall rule settled");
        }
        Ok(())
    }

    fn apply_cron_job(&self, cron_id: CronJobId, error: Option<&str>) -> Result<()> {
        let Some(mut cron_job) = self.store.get_cron_job(&cron_id)? else {
            tracing::warn!(cron_id = %cron_id, "Cron job no longer exists");
            return Ok(());
        };
        let resource = ResourceRef::CronJob(cron_id);
        if settle(resource, &mut cron_job.status, &mut cron_job.error_message, error) {
            cron_job.updated_at = Utc::now();
            self.store.put_cron_job(&cron_job)?;
        }
        Ok(())
    }

    // =========================================================================
    // Servers
    // =========================================================================

    fn apply_server(&self, job: &Job, server_id: ServerId, error: Option<&str>) -> Result<()> {
        match job.job_type {
            JobType::SyncCrontab => self.on_crontab_synced(server_id, error),
            JobType::ProvisionServer => self.on_provisioned(server_id, error),
            other => {
                tracing::debug!(
                    job_id = %job.job_id,
                    job_type = %other,
                    "Outcome recorded on job only"
                );
                Ok(())
            }
        }
    }

    fn on_crontab_synced(&self, server_id: ServerId, error: Option<&str>) -> Result<()> {
        let now = Utc::now();
        let mut changed = 0usize;

        for mut cron_job in self.store.list_cron_jobs_by_server(&server_id)? {
            // A failed sync only blames entries that were waiting on it.
            if error.is_some() && cron_job.status != ResourceStatus::Pending {
                continue;
            }
            let resource = ResourceRef::CronJob(cron_job.cron_id);
            if settle(resource, &mut cron_job.status, &mut cron_job.error_message, error) {
                cron_job.updated_at = now;
                self.store.put_cron_job(&cron_job)?;
                changed += 1;
            }
        }

        tracing::info!(
            server_id = %server_id,
            success = error.is_none(),
            entries = changed,
            "Crontab sync settled"
        );
        Ok(())
    }

    fn on_provisioned(&self, server_id: ServerId, error: Option<&str>) -> Result<()> {
        let Some(mut server) = self.store.get_server(&server_id)? else {
            tracing::warn!(server_id = %server_id, "Server no longer exists");
            return Ok(());
        };

        let target = if error.is_some() {
            ServerStatus::Failed
        } else {
            ServerStatus::Active
        };
        if let Err(e) =
            lifecycle::validate_server_transition(ResourceRef::Server(server_id), server.status, target)
        {
            tracing::warn!(error = %e, "Skipping invalid transition");
            return Ok(());
        }

        server.status = target;
        server.error_message = error.map(str::to_string);
        server.updated_at = Utc::now();
        self.store.put_server(&server)?;
        tracing::info!(server_id = %server_id, status = ?target, "Server provisioning settled");
        Ok(())
    }
}

/// Move a simple resource to `active` or `failed` depending on `error`.
///
/// Returns false, leaving everything untouched, if the lifecycle forbids it.
fn settle(
    resource: ResourceRef,
    status: &mut ResourceStatus,
    error_message: &mut Option<String>,
    error: Option<&str>,
) -> bool {
    let target = if error.is_some() {
        ResourceStatus::Failed
    } else {
        ResourceStatus::Active
    };
    if !transition_allowed(resource, *status, target) {
        return false;
    }
    *status = target;
    *error_message = error.map(str::to_string);
    true
}

fn transition_allowed(resource: ResourceRef, from: ResourceStatus, to: ResourceStatus) -> bool {
    match lifecycle::validate_resource_transition(resource, from, to) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping invalid transition");
            false
        }
    }
}
