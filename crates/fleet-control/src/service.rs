//! Control plane service implementation.
//!
//! This module provides the `FleetControl` trait and the
//! `FleetControlService` implementation that ties the dispatcher, callback
//! processor, port allocator, alert engine and health checker together.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_core::{
    CertificateId, CronJobId, DatabaseId, FirewallRuleId, JobId, ServerId, ServiceId,
    SupervisorProgramId, WebAppId,
};
use fleet_store::{
    CronJob, Database, DeployStatus, FirewallRule, HealthMonitor, Job, JobPayload, JobType,
    NodeProcess, ProgramStatus, ResourceRef, ResourceStatus, Server, ServerStatus, Service,
    SslCertificate, Store, SupervisorProgram, WebApp,
};
use serde_json::json;

use crate::alerts::{AlertEngine, ServerStats};
use crate::callback::{CallbackOutcome, CallbackProcessor, CallbackReport};
use crate::dispatcher::JobDispatcher;
use crate::error::{ControlError, Result};
use crate::health::{self, HealthChecker, NetworkProber, Prober};
use crate::lifecycle;
use crate::locks::StripedLocks;
use crate::notify::{NotificationRequest, Notifier};
use crate::ports::{PortAllocator, PortUsage};
use crate::supervisor::SupervisorConfigBuilder;
use crate::sweeper::JobSweeper;
use crate::types::{
    AlertSettings, ControlConfig, CreateDatabaseRequest, CreateProgramRequest,
    CreateWebAppRequest, CronJobRequest, DeployRequest, Dispatched, FirewallRuleRequest,
    IssueCertificateRequest, ProgramAction,
};

/// Trait defining the control plane operations.
///
/// Operator actions persist the affected record in a waiting state and
/// dispatch the job carrying them out; the record settles when the job's
/// outcome arrives through [`FleetControl::handle_callback`].
#[async_trait]
pub trait FleetControl: Send + Sync {
    // =========================================================================
    // Servers
    // =========================================================================

    /// Register a managed server.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRequest` if the name or address is empty.
    async fn register_server(&self, name: &str, ip_address: &str) -> Result<Server>;

    /// Get a server by ID.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ServerNotFound` if the server doesn't exist.
    async fn get_server(&self, server_id: &ServerId) -> Result<Server>;

    /// Move a server to `provisioning` and dispatch `provision_server`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidState` if the server is already
    /// provisioning.
    async fn provision_server(&self, server_id: &ServerId) -> Result<Dispatched<Server>>;

    /// Replace a server's resource alert settings.
    async fn update_alert_settings(
        &self,
        server_id: &ServerId,
        settings: AlertSettings,
    ) -> Result<Server>;

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Dispatch a job that owns no resource.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidPayload` if a required key is missing.
    async fn dispatch_job(
        &self,
        server_id: &ServerId,
        job_type: JobType,
        payload: JobPayload,
        priority: i32,
    ) -> Result<Job>;

    /// Get a job by ID.
    async fn get_job(&self, job_id: &JobId) -> Result<Job>;

    /// Hand the next pending job of a server to its agent, marking it running.
    async fn next_job(&self, server_id: &ServerId) -> Result<Option<Job>>;

    /// Apply a job outcome reported by an agent.
    ///
    /// Safe under duplicate and concurrent delivery.
    async fn handle_callback(&self, job_id: &JobId, outcome: CallbackOutcome)
        -> Result<CallbackReport>;

    /// Fail jobs past their deadline. Returns how many were failed.
    async fn sweep_expired_jobs(&self, now: DateTime<Utc>) -> Result<usize>;

    // =========================================================================
    // Web apps
    // =========================================================================

    /// Create a web app, allocating ports for Node.js apps.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRequest` for a malformed request and
    /// `ControlError::PortsExhausted` if the server has no room left.
    async fn create_webapp(
        &self,
        server_id: &ServerId,
        request: CreateWebAppRequest,
    ) -> Result<Dispatched<WebApp>>;

    /// Get a web app by ID.
    async fn get_webapp(&self, webapp_id: &WebAppId) -> Result<WebApp>;

    /// Retry the creation of a failed web app.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidState` unless the app is `failed`.
    async fn retry_webapp(&self, webapp_id: &WebAppId) -> Result<Dispatched<WebApp>>;

    /// Deploy an active web app.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidState` unless the app is `active`.
    async fn deploy_webapp(
        &self,
        webapp_id: &WebAppId,
        request: DeployRequest,
    ) -> Result<Dispatched<WebApp>>;

    /// Delete a web app, its supervisor programs and its ports.
    ///
    /// Returns the `delete_webapp` job.
    async fn delete_webapp(&self, webapp_id: &WebAppId) -> Result<Job>;

    // =========================================================================
    // Supervisor programs
    // =========================================================================

    /// Create an ad-hoc supervisor program on a server.
    ///
    /// # Errors
    ///
    /// Returns a store conflict if the name is taken on the server.
    async fn create_supervisor_program(
        &self,
        server_id: &ServerId,
        request: CreateProgramRequest,
    ) -> Result<Dispatched<SupervisorProgram>>;

    /// Start, stop, restart, update or delete a supervisor program.
    async fn control_supervisor_program(
        &self,
        program_id: &SupervisorProgramId,
        action: ProgramAction,
    ) -> Result<Dispatched<SupervisorProgram>>;

    // =========================================================================
    // Satellite resources
    // =========================================================================

    /// Register a system service (e.g. `nginx`) running on a server.
    async fn register_service(&self, server_id: &ServerId, name: &str) -> Result<Service>;

    /// Restart or reload a service.
    async fn restart_service(
        &self,
        service_id: &ServiceId,
        reload: bool,
    ) -> Result<Dispatched<Service>>;

    /// Issue a certificate.
    async fn issue_certificate(
        &self,
        server_id: &ServerId,
        request: IssueCertificateRequest,
    ) -> Result<Dispatched<SslCertificate>>;

    /// Create a database.
    async fn create_database(
        &self,
        server_id: &ServerId,
        request: CreateDatabaseRequest,
    ) -> Result<Dispatched<Database>>;

    /// Delete a database.
    async fn delete_database(&self, database_id: &DatabaseId) -> Result<Dispatched<Database>>;

    /// Add a firewall rule.
    async fn add_firewall_rule(
        &self,
        server_id: &ServerId,
        request: FirewallRuleRequest,
    ) -> Result<Dispatched<FirewallRule>>;

    /// Add a crontab entry and resynchronize the server's crontab.
    async fn add_cron_job(
        &self,
        server_id: &ServerId,
        request: CronJobRequest,
    ) -> Result<Dispatched<CronJob>>;

    // =========================================================================
    // Telemetry
    // =========================================================================

    /// Port usage of a server.
    async fn port_usage(&self, server_id: &ServerId) -> Result<PortUsage>;

    /// Apply a resource sample to a server's alert state.
    async fn record_server_stats(&self, server_id: &ServerId, stats: ServerStats)
        -> Result<Server>;

    /// Add a health monitor.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRequest` for an unusable target or
    /// thresholds.
    async fn add_health_monitor(&self, monitor: HealthMonitor) -> Result<HealthMonitor>;

    /// Probe due monitors. Returns how many were probed.
    async fn run_health_checks(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// The main control plane service implementation.
pub struct FleetControlService<S: Store, N: Notifier> {
    store: Arc<S>,
    notifier: Arc<N>,
    config: ControlConfig,
    dispatcher: Arc<JobDispatcher<S>>,
    processor: Arc<CallbackProcessor<S>>,
    sweeper: JobSweeper<S>,
    ports: PortAllocator<S>,
    alerts: AlertEngine<S>,
    health: HealthChecker<S>,
    supervisor: SupervisorConfigBuilder,
    server_locks: StripedLocks,
}

impl<S: Store + 'static, N: Notifier> FleetControlService<S, N> {
    /// Create a new service probing monitors over the network.
    #[must_use]
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: ControlConfig) -> Self {
        Self::with_prober(store, notifier, config, Arc::new(NetworkProber::default()))
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>, notifier: Arc<N>) -> Self {
        Self::new(store, notifier, ControlConfig::default())
    }

    /// Create a new service with a custom prober.
    #[must_use]
    pub fn with_prober(
        store: Arc<S>,
        notifier: Arc<N>,
        config: ControlConfig,
        prober: Arc<dyn Prober>,
    ) -> Self {
        let job_locks = Arc::new(StripedLocks::new(config.lock_stripes));
        let supervisor = SupervisorConfigBuilder::new(config.supervisor.clone());
        let dispatcher = Arc::new(JobDispatcher::new(
            Arc::clone(&store),
            config.job_timeouts.clone(),
            Arc::clone(&job_locks),
        ));
        let processor = Arc::new(CallbackProcessor::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            supervisor.clone(),
            job_locks,
        ));

        Self {
            sweeper: JobSweeper::new(Arc::clone(&store), Arc::clone(&processor)),
            ports: PortAllocator::new(Arc::clone(&store), config.lock_stripes),
            alerts: AlertEngine::new(
                Arc::clone(&store),
                config.alert_cooldown_seconds,
                config.lock_stripes,
            ),
            health: HealthChecker::new(
                Arc::clone(&store),
                prober,
                config.health_check_concurrency,
            ),
            server_locks: StripedLocks::new(config.lock_stripes),
            store,
            notifier,
            config,
            dispatcher,
            processor,
            supervisor,
        }
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    async fn deliver(&self, requests: Vec<NotificationRequest>) {
        for request in requests {
            self.notifier.notify(request).await;
        }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    fn load_server(&self, server_id: &ServerId) -> Result<Server> {
        self.store
            .get_server(server_id)?
            .ok_or(ControlError::ServerNotFound(*server_id))
    }

    fn load_webapp(&self, webapp_id: &WebAppId) -> Result<WebApp> {
        self.store
            .get_web_app(webapp_id)?
            .ok_or(ControlError::WebAppNotFound(*webapp_id))
    }

    fn load_program(&self, program_id: &SupervisorProgramId) -> Result<SupervisorProgram> {
        self.store
            .get_supervisor_program(program_id)?
            .ok_or(ControlError::ProgramNotFound(*program_id))
    }

    // =========================================================================
    // Job payloads
    // =========================================================================

    fn dispatch_create_webapp(&self, app: &WebApp) -> Result<Job> {
        let mut payload = JobPayload::new();
        payload.insert("webapp_id".into(), json!(app.webapp_id));
        payload.insert("domain".into(), json!(app.domain));
        payload.insert("app_type".into(), json!(app.app_type));
        payload.insert("directory".into(), json!(app.directory));
        payload.insert("system_user".into(), json!(app.system_user));
        if let Some(port) = app.node_port {
            payload.insert("node_port".into(), json!(port));
        }
        if !app.node_processes.is_empty() {
            payload.insert("node_processes".into(), json!(app.node_processes));
        }

        self.dispatcher.dispatch_for(
            ResourceRef::WebApp(app.webapp_id),
            app.server_id,
            JobType::CreateWebapp,
            payload,
            0,
        )
    }

    fn dispatch_program(&self, program: &SupervisorProgram, job_type: JobType) -> Result<Job> {
        let mut payload = JobPayload::new();
        payload.insert("program_id".into(), json!(program.program_id));
        payload.insert("name".into(), json!(program.name));
        if matches!(job_type, JobType::SupervisorCreate | JobType::SupervisorUpdate) {
            payload.insert(
                "config".into(),
                json!(self.supervisor.generate_config(program)?),
            );
        }

        self.dispatcher.dispatch_for(
            ResourceRef::SupervisorProgram(program.program_id),
            program.server_id,
            job_type,
            payload,
            0,
        )
    }

    fn dispatch_database(&self, database: &Database, job_type: JobType) -> Result<Job> {
        let mut payload = JobPayload::new();
        payload.insert("database_id".into(), json!(database.database_id));
        payload.insert("name".into(), json!(database.name));
        payload.insert("engine".into(), json!(database.engine));
        self.dispatcher.dispatch_for(
            ResourceRef::Database(database.database_id),
            database.server_id,
            job_type,
            payload,
            0,
        )
    }

    /// Render the server's crontab, one `/etc/cron.d` style line per entry.
    fn render_crontab(cron_jobs: &[CronJob]) -> String {
        cron_jobs
            .iter()
            .map(|c| format!("{} {} {}\n", c.expression, c.user, c.command))
            .collect()
    }
}

/// Move a simple resource back to `pending` ahead of a new job.
fn to_pending(resource: ResourceRef, status: &mut ResourceStatus) -> Result<()> {
    *status = lifecycle::validate_resource_transition(resource, *status, ResourceStatus::Pending)?;
    Ok(())
}

#[async_trait]
impl<S: Store + 'static, N: Notifier + 'static> FleetControl for FleetControlService<S, N> {
    // =========================================================================
    // Servers
    // =========================================================================

    async fn register_server(&self, name: &str, ip_address: &str) -> Result<Server> {
        let name = name.trim();
        let ip_address = ip_address.trim();
        if name.is_empty() || ip_address.is_empty() {
            return Err(ControlError::InvalidRequest(
                "server name and address must not be empty".to_string(),
            ));
        }

        let server = Server::new(name, ip_address);
        self.store.put_server(&server)?;

        tracing::info!(
            server_id = %server.server_id,
            name = %server.name,
            ip_address = %server.ip_address,
            "Registered server"
        );

        Ok(server)
    }

    async fn get_server(&self, server_id: &ServerId) -> Result<Server> {
        self.load_server(server_id)
    }

    async fn provision_server(&self, server_id: &ServerId) -> Result<Dispatched<Server>> {
        let mut server = self.load_server(server_id)?;
        if server.status == ServerStatus::Provisioning {
            return Err(ControlError::InvalidState {
                resource: ResourceRef::Server(*server_id),
                from: format!("{:?}", server.status),
                to: format!("{:?}", ServerStatus::Provisioning),
            });
        }
        server.status = lifecycle::validate_server_transition(
            ResourceRef::Server(*server_id),
            server.status,
            ServerStatus::Provisioning,
        )?;
        server.error_message = None;
        server.updated_at = Utc::now();
        self.store.put_server(&server)?;

        let job = self.dispatcher.dispatch_for(
            ResourceRef::Server(*server_id),
            *server_id,
            JobType::ProvisionServer,
            JobPayload::new(),
            10,
        )?;

        tracing::info!(server_id = %server_id, job_id = %job.job_id, "Provisioning server");

        Ok(Dispatched { record: server, job })
    }

    async fn update_alert_settings(
        &self,
        server_id: &ServerId,
        settings: AlertSettings,
    ) -> Result<Server> {
        self.alerts.update_settings(server_id, settings)
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    async fn dispatch_job(
        &self,
        server_id: &ServerId,
        job_type: JobType,
        payload: JobPayload,
        priority: i32,
    ) -> Result<Job> {
        self.load_server(server_id)?;
        self.dispatcher
            .dispatch(*server_id, job_type, payload, priority)
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Job> {
        self.store
            .get_job(job_id)?
            .ok_or(ControlError::JobNotFound(*job_id))
    }

    async fn next_job(&self, server_id: &ServerId) -> Result<Option<Job>> {
        self.load_server(server_id)?;
        self.dispatcher.claim_next(server_id)
    }

    async fn handle_callback(
        &self,
        job_id: &JobId,
        outcome: CallbackOutcome,
    ) -> Result<CallbackReport> {
        let report = self.processor.handle(job_id, &outcome)?;
        self.deliver(report.notifications.clone()).await;
        Ok(report)
    }

    async fn sweep_expired_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let reports = self.sweeper.sweep(now)?;
        let count = reports.len();
        for report in reports {
            self.deliver(report.notifications).await;
        }
        if count > 0 {
            tracing::info!(count, "Swept expired jobs");
        }
        Ok(count)
    }

    // =========================================================================
    // Web apps
    // =========================================================================

    async fn create_webapp(
        &self,
        server_id: &ServerId,
        request: CreateWebAppRequest,
    ) -> Result<Dispatched<WebApp>> {
        request.validate()?;
        self.load_server(server_id)?;

        let app = self
            .ports
            .reserve(server_id, request.port_count(), |ports| {
                let now = Utc::now();
                let (node_port, node_processes) = if request.processes.is_empty() {
                    (ports.first().copied(), Vec::new())
                } else {
                    let processes = request
                        .processes
                        .iter()
                        .zip(ports)
                        .map(|(spec, &port)| NodeProcess {
                            name: spec.name.clone(),
                            command: spec.command.trim().to_string(),
                            port,
                        })
                        .collect();
                    (None, processes)
                };

                let app = WebApp {
                    webapp_id: WebAppId::generate(),
                    server_id: *server_id,
                    domain: request.domain.trim().to_string(),
                    app_type: request.app_type,
                    status: ResourceStatus::Pending,
                    error_message: None,
                    directory: request.resolved_directory(),
                    system_user: request.system_user.clone(),
                    node_port,
                    node_processes,
                    package_manager: request.package_manager,
                    start_command: request.start_command.clone(),
                    supervisor_program_id: None,
                    deploy_status: DeployStatus::NeverDeployed,
                    created_at: now,
                    updated_at: now,
                };
                self.store.put_web_app(&app)?;
                Ok(app)
            })?;

        let job = self.dispatch_create_webapp(&app)?;

        tracing::info!(
            webapp_id = %app.webapp_id,
            server_id = %server_id,
            domain = %app.domain,
            app_type = ?app.app_type,
            ports = ?app.held_ports().collect::<Vec<_>>(),
            "Created web app"
        );

        Ok(Dispatched { record: app, job })
    }

    async fn get_webapp(&self, webapp_id: &WebAppId) -> Result<WebApp> {
        self.load_webapp(webapp_id)
    }

    async fn retry_webapp(&self, webapp_id: &WebAppId) -> Result<Dispatched<WebApp>> {
        let mut app = self.load_webapp(webapp_id)?;
        if app.status != ResourceStatus::Failed {
            return Err(ControlError::InvalidState {
                resource: ResourceRef::WebApp(*webapp_id),
                from: format!("{:?}", app.status),
                to: format!("{:?}", ResourceStatus::Pending),
            });
        }

        to_pending(ResourceRef::WebApp(*webapp_id), &mut app.status)?;
        app.error_message = None;
        app.updated_at = Utc::now();
        self.store.put_web_app(&app)?;

        let job = self.dispatch_create_webapp(&app)?;
        tracing::info!(webapp_id = %webapp_id, job_id = %job.job_id, "Retrying web app creation");

        Ok(Dispatched { record: app, job })
    }

    async fn deploy_webapp(
        &self,
        webapp_id: &WebAppId,
        request: DeployRequest,
    ) -> Result<Dispatched<WebApp>> {
        let mut app = self.load_webapp(webapp_id)?;
        if app.status != ResourceStatus::Active {
            return Err(ControlError::InvalidState {
                resource: ResourceRef::WebApp(*webapp_id),
                from: format!("{:?}", app.status),
                to: format!("{:?}", DeployStatus::Deploying),
            });
        }

        let mut payload = JobPayload::new();
        payload.insert("webapp_id".into(), json!(app.webapp_id));
        payload.insert("domain".into(), json!(app.domain));
        payload.insert("directory".into(), json!(app.directory));
        payload.insert("system_user".into(), json!(app.system_user));
        if app.is_nodejs() {
            payload.insert("package_manager".into(), json!(app.package_manager));
        }
        let job_type = match request.repository {
            Some(repository) => {
                payload.insert("repository".into(), json!(repository));
                payload.insert(
                    "branch".into(),
                    json!(request.branch.unwrap_or_else(|| "main".to_string())),
                );
                JobType::GitDeploy
            }
            None => JobType::Deploy,
        };

        let job = self.dispatcher.dispatch_for(
            ResourceRef::WebApp(*webapp_id),
            app.server_id,
            job_type,
            payload,
            0,
        )?;

        app.deploy_status = DeployStatus::Deploying;
        app.updated_at = Utc::now();
        self.store.put_web_app(&app)?;

        tracing::info!(
            webapp_id = %webapp_id,
            job_id = %job.job_id,
            job_type = %job_type,
            "Deploying web app"
        );

        Ok(Dispatched { record: app, job })
    }

    async fn delete_webapp(&self, webapp_id: &WebAppId) -> Result<Job> {
        let app = self.load_webapp(webapp_id)?;

        let programs: Vec<SupervisorProgram> = self
            .store
            .list_supervisor_programs_by_server(&app.server_id)?
            .into_iter()
            .filter(|p| p.webapp_id == Some(*webapp_id))
            .collect();
        for program in &programs {
            self.dispatch_program(program, JobType::SupervisorDelete)?;
        }

        let mut payload = JobPayload::new();
        payload.insert("webapp_id".into(), json!(app.webapp_id));
        payload.insert("domain".into(), json!(app.domain));
        payload.insert("directory".into(), json!(app.directory));
        let job = self.dispatcher.dispatch_for(
            ResourceRef::WebApp(*webapp_id),
            app.server_id,
            JobType::DeleteWebapp,
            payload,
            0,
        )?;

        self.store.delete_web_app(webapp_id)?;
        self.ports.release(&app);

        tracing::info!(
            webapp_id = %webapp_id,
            server_id = %app.server_id,
            programs = programs.len(),
            "Deleted web app"
        );

        Ok(job)
    }

    // =========================================================================
    // Supervisor programs
    // =========================================================================

    async fn create_supervisor_program(
        &self,
        server_id: &ServerId,
        request: CreateProgramRequest,
    ) -> Result<Dispatched<SupervisorProgram>> {
        request.validate()?;
        self.load_server(server_id)?;

        let now = Utc::now();
        let program = SupervisorProgram {
            program_id: SupervisorProgramId::generate(),
            server_id: *server_id,
            webapp_id: None,
            name: request.name,
            command: request.command.trim().to_string(),
            directory: request.directory,
            user: request.user,
            numprocs: request.numprocs,
            autostart: request.autostart,
            autorestart: request.autorestart,
            startsecs: self.supervisor.startsecs(),
            stopwaitsecs: self.supervisor.stopwaitsecs(),
            environment: request.environment,
            status: ProgramStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put_supervisor_program(&program)?;

        let job = self.dispatch_program(&program, JobType::SupervisorCreate)?;
        tracing::info!(
            program_id = %program.program_id,
            server_id = %server_id,
            name = %program.name,
            "Created supervisor program"
        );

        Ok(Dispatched {
            record: program,
            job,
        })
    }

    async fn control_supervisor_program(
        &self,
        program_id: &SupervisorProgramId,
        action: ProgramAction,
    ) -> Result<Dispatched<SupervisorProgram>> {
        let program = self.load_program(program_id)?;
        let job = self.dispatch_program(&program, action.job_type())?;

        tracing::info!(
            program_id = %program_id,
            name = %program.name,
            action = ?action,
            "Dispatched supervisor action"
        );

        Ok(Dispatched {
            record: program,
            job,
        })
    }

    // =========================================================================
    // Satellite resources
    // =========================================================================

    async fn register_service(&self, server_id: &ServerId, name: &str) -> Result<Service> {
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ControlError::InvalidRequest(format!(
                "invalid service name: {name:?}"
            )));
        }
        self.load_server(server_id)?;

        let service = Service {
            service_id: ServiceId::generate(),
            server_id: *server_id,
            name: name.to_string(),
            status: ResourceStatus::Active,
            error_message: None,
            updated_at: Utc::now(),
        };
        self.store.put_service(&service)?;

        tracing::info!(service_id = %service.service_id, name = %service.name, "Registered service");
        Ok(service)
    }

    async fn restart_service(
        &self,
        service_id: &ServiceId,
        reload: bool,
    ) -> Result<Dispatched<Service>> {
        let mut service = self
            .store
            .get_service(service_id)?
            .ok_or(ControlError::ServiceNotFound(*service_id))?;

        to_pending(ResourceRef::Service(*service_id), &mut service.status)?;
        service.error_message = None;
        service.updated_at = Utc::now();
        self.store.put_service(&service)?;

        let job_type = if reload {
            JobType::ServiceReload
        } else {
            JobType::ServiceRestart
        };
        let mut payload = JobPayload::new();
        payload.insert("service".into(), json!(service.name));
        let job = self.dispatcher.dispatch_for(
            ResourceRef::Service(*service_id),
            service.server_id,
            job_type,
            payload,
            0,
        )?;

        tracing::info!(service_id = %service_id, job_type = %job_type, "Dispatched service action");
        Ok(Dispatched {
            record: service,
            job,
        })
    }

    async fn issue_certificate(
        &self,
        server_id: &ServerId,
        request: IssueCertificateRequest,
    ) -> Result<Dispatched<SslCertificate>> {
        request.validate()?;
        self.load_server(server_id)?;
        if let Some(webapp_id) = request.webapp_id {
            let app = self.load_webapp(&webapp_id)?;
            if app.server_id != *server_id {
                return Err(ControlError::InvalidRequest(format!(
                    "web app {webapp_id} is not hosted on server {server_id}"
                )));
            }
        }

        let certificate = SslCertificate {
            certificate_id: CertificateId::generate(),
            server_id: *server_id,
            webapp_id: request.webapp_id,
            domains: request.domains,
            status: ResourceStatus::Pending,
            error_message: None,
            issued_at: None,
            expires_at: None,
            updated_at: Utc::now(),
        };
        self.store.put_certificate(&certificate)?;

        let mut payload = JobPayload::new();
        payload.insert("certificate_id".into(), json!(certificate.certificate_id));
        payload.insert("domains".into(), json!(certificate.domains));
        if let Some(webapp_id) = certificate.webapp_id {
            payload.insert("webapp_id".into(), json!(webapp_id));
        }
        let job = self.dispatcher.dispatch_for(
            ResourceRef::SslCertificate(certificate.certificate_id),
            *server_id,
            JobType::SslIssue,
            payload,
            0,
        )?;

        tracing::info!(
            certificate_id = %certificate.certificate_id,
            domains = ?certificate.domains,
            "Issuing certificate"
        );
        Ok(Dispatched {
            record: certificate,
            job,
        })
    }

    async fn create_database(
        &self,
        server_id: &ServerId,
        request: CreateDatabaseRequest,
    ) -> Result<Dispatched<Database>> {
        request.validate()?;
        self.load_server(server_id)?;

        let database = Database {
            database_id: DatabaseId::generate(),
            server_id: *server_id,
            name: request.name,
            engine: request.engine,
            status: ResourceStatus::Pending,
            error_message: None,
            updated_at: Utc::now(),
        };
        self.store.put_database(&database)?;

        let job = self.dispatch_database(&database, JobType::CreateDatabase)?;
        tracing::info!(database_id = %database.database_id, name = %database.name, "Creating database");
        Ok(Dispatched {
            record: database,
            job,
        })
    }

    async fn delete_database(&self, database_id: &DatabaseId) -> Result<Dispatched<Database>> {
        let mut database = self
            .store
            .get_database(database_id)?
            .ok_or(ControlError::DatabaseNotFound(*database_id))?;

        to_pending(ResourceRef::Database(*database_id), &mut database.status)?;
        database.error_message = None;
        database.updated_at = Utc::now();
        self.store.put_database(&database)?;

        let job = self.dispatch_database(&database, JobType::DeleteDatabase)?;
        tracing::info!(database_id = %database_id, "Deleting database");
        Ok(Dispatched {
            record: database,
            job,
        })
    }

    async fn add_firewall_rule(
        &self,
        server_id: &ServerId,
        request: FirewallRuleRequest,
    ) -> Result<Dispatched<FirewallRule>> {
        if request.port == 0 {
            return Err(ControlError::InvalidRequest(
                "firewall port must not be 0".to_string(),
            ));
        }
        self.load_server(server_id)?;

        let rule = FirewallRule {
            rule_id: FirewallRuleId::generate(),
            server_id: *server_id,
            port: request.port,
            protocol: request.protocol,
            action: request.action,
            source: request.source,
            status: ResourceStatus::Pending,
            error_message: None,
            updated_at: Utc::now(),
        };
        self.store.put_firewall_rule(&rule)?;

        let mut payload = JobPayload::new();
        payload.insert("rule_id".into(), json!(rule.rule_id));
        payload.insert("port".into(), json!(rule.port));
        payload.insert("protocol".into(), json!(rule.protocol));
        payload.insert("action".into(), json!(rule.action));
        if let Some(source) = &rule.source {
            payload.insert("source".into(), json!(source));
        }
        let job = self.dispatcher.dispatch_for(
            ResourceRef::FirewallRule(rule.rule_id),
            *server_id,
            JobType::ApplyFirewallRule,
            payload,
            0,
        )?;

        tracing::info!(rule_id = %rule.rule_id, port = rule.port, action = ?rule.action, "Applying firewall rule");
        Ok(Dispatched { record: rule, job })
    }

    async fn add_cron_job(
        &self,
        server_id: &ServerId,
        request: CronJobRequest,
    ) -> Result<Dispatched<CronJob>> {
        request.validate()?;
        self.load_server(server_id)?;

        // One crontab per server: concurrent additions must not render
        // overlapping snapshots.
        let _guard = self.server_locks.lock(server_id.as_bytes());

        let now = Utc::now();
        let cron_job = CronJob {
            cron_id: CronJobId::generate(),
            server_id: *server_id,
            expression: request.expression.split_whitespace().collect::<Vec<_>>().join(" "),
            command: request.command.trim().to_string(),
            user: request.user,
            status: ResourceStatus::Pending,
            error_message: None,
            updated_at: now,
        };
        self.store.put_cron_job(&cron_job)?;

        let mut entries = self.store.list_cron_jobs_by_server(server_id)?;
        for entry in &mut entries {
            if entry.status != ResourceStatus::Pending {
                to_pending(ResourceRef::CronJob(entry.cron_id), &mut entry.status)?;
                entry.updated_at = now;
                self.store.put_cron_job(entry)?;
            }
        }

        let mut payload = JobPayload::new();
        payload.insert("crontab".into(), json!(Self::render_crontab(&entries)));
        let job = self.dispatcher.dispatch_for(
            ResourceRef::Server(*server_id),
            *server_id,
            JobType::SyncCrontab,
            payload,
            0,
        )?;

        tracing::info!(
            cron_id = %cron_job.cron_id,
            server_id = %server_id,
            entries = entries.len(),
            "Syncing crontab"
        );
        Ok(Dispatched {
            record: cron_job,
            job,
        })
    }

    // =========================================================================
    // Telemetry
    // =========================================================================

    async fn port_usage(&self, server_id: &ServerId) -> Result<PortUsage> {
        self.load_server(server_id)?;
        self.ports.usage_stats(server_id)
    }

    async fn record_server_stats(
        &self,
        server_id: &ServerId,
        stats: ServerStats,
    ) -> Result<Server> {
        let (server, requests) = self.alerts.process(server_id, &stats, Utc::now())?;
        self.deliver(requests).await;
        Ok(server)
    }

    async fn add_health_monitor(&self, monitor: HealthMonitor) -> Result<HealthMonitor> {
        health::validate_monitor(&monitor)?;
        if let Some(server_id) = &monitor.server_id {
            self.load_server(server_id)?;
        }
        self.store.put_health_monitor(&monitor)?;

        tracing::info!(
            monitor_id = %monitor.monitor_id,
            monitor_type = ?monitor.monitor_type,
            url = %monitor.url,
            "Added health monitor"
        );
        Ok(monitor)
    }

    async fn run_health_checks(&self, now: DateTime<Utc>) -> Result<usize> {
        let (probed, requests) = self.health.run(now).await?;
        self.deliver(requests).await;
        Ok(probed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ProbeResult;
    use crate::notify::{MemoryNotifier, NotificationKind};
    use fleet_store::{
        AppType, DatabaseEngine, JobStatus, MonitorStatus, PackageManager, RocksStore,
    };
    use tempfile::TempDir;

    struct FailingProber;

    #[async_trait]
    impl Prober for FailingProber {
        async fn probe(&self, _monitor: &HealthMonitor) -> ProbeResult {
            Err("connection refused".to_string())
        }
    }

    type TestService = FleetControlService<RocksStore, MemoryNotifier>;

    fn create_test_service() -> (TestService, Arc<MemoryNotifier>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let notifier = Arc::new(MemoryNotifier::new());
        let service = FleetControlService::with_prober(
            store,
            Arc::clone(&notifier),
            ControlConfig::default(),
            Arc::new(FailingProber),
        );
        (service, notifier, dir)
    }

    async fn server(service: &TestService) -> ServerId {
        service
            .register_server("web-1", "203.0.113.10")
            .await
            .unwrap()
            .server_id
    }

    async fn settle(service: &TestService, job: &Job) -> CallbackReport {
        service
            .handle_callback(&job.job_id, CallbackOutcome::success(None))
            .await
            .unwrap()
    }

    fn jobs_of_type(service: &TestService, server_id: &ServerId, job_type: JobType) -> Vec<Job> {
        service
            .store()
            .list_jobs_by_server(server_id)
            .unwrap()
            .into_iter()
            .filter(|j| j.job_type == job_type)
            .collect()
    }

    #[tokio::test]
    async fn register_and_get_server() {
        let (service, _, _dir) = create_test_service();
        let server_id = server(&service).await;

        let server = service.get_server(&server_id).await.unwrap();
        assert_eq!(server.name, "web-1");
        assert_eq!(server.status, ServerStatus::Pending);

        assert!(matches!(
            service.register_server(" ", "10.0.0.1").await,
            Err(ControlError::InvalidRequest(_))
        ));
        assert!(matches!(
            service.get_server(&ServerId::generate()).await,
            Err(ControlError::ServerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn provision_server_flow() {
        let (service, _, _dir) = create_test_service();
        let server_id = server(&service).await;

        let dispatched = service.provision_server(&server_id).await.unwrap();
        assert_eq!(dispatched.record.status, ServerStatus::Provisioning);
        assert_eq!(dispatched.job.job_type, JobType::ProvisionServer);

        assert!(matches!(
            service.provision_server(&server_id).await,
            Err(ControlError::InvalidState { .. })
        ));

        settle(&service, &dispatched.job).await;
        let server = service.get_server(&server_id).await.unwrap();
        assert_eq!(server.status, ServerStatus::Active);
    }

    #[tokio::test]
    async fn nodejs_webapp_gets_port_and_program() {
        let (service, _, _dir) = create_test_service();
        let server_id = server(&service).await;

        let request = CreateWebAppRequest::new("api.test", AppType::Nodejs)
            .with_package_manager(PackageManager::Yarn);
        let dispatched = service.create_webapp(&server_id, request).await.unwrap();

        assert_eq!(dispatched.record.node_port, Some(3000));
        assert_eq!(dispatched.record.status, ResourceStatus::Pending);
        assert_eq!(dispatched.job.job_type, JobType::CreateWebapp);
        assert_eq!(dispatched.job.payload["node_port"], 3000);

        let report = settle(&service, &dispatched.job).await;
        assert_eq!(report.follow_up_jobs.len(), 1);

        let app = service
            .get_webapp(&dispatched.record.webapp_id)
            .await
            .unwrap();
        let program = service
            .store()
            .get_supervisor_program(&app.supervisor_program_id.unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(program.command, "yarn start");
    }

    #[tokio::test]
    async fn webapps_get_distinct_ports() {
        let (service, _, _dir) = create_test_service();
        let server_id = server(&service).await;

        let first = service
            .create_webapp(&server_id, CreateWebAppRequest::new("a.test", AppType::Nodejs))
            .await
            .unwrap();
        let monorepo = service
            .create_webapp(
                &server_id,
                CreateWebAppRequest::new("b.test", AppType::Nodejs)
                    .with_process("web", "node web.js")
                    .with_process("api", "node api.js"),
            )
            .await
            .unwrap();
        let php = service
            .create_webapp(&server_id, CreateWebAppRequest::new("c.test", AppType::Php))
            .await
            .unwrap();

        assert_eq!(first.record.node_port, Some(3000));
        let ports: Vec<u16> = monorepo.record.node_processes.iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![3001, 3002]);
        assert_eq!(monorepo.record.node_port, None);
        assert_eq!(php.record.node_port, None);

        let usage = service.port_usage(&server_id).await.unwrap();
        assert_eq!(usage.used, 3);
    }

    #[tokio::test]
    async fn invalid_webapp_request_allocates_nothing() {
        let (service, _, _dir) = create_test_service();
        let server_id = server(&service).await;

        let result = service
            .create_webapp(
                &server_id,
                CreateWebAppRequest::new("bad domain", AppType::Nodejs),
            )
            .await;
        assert!(matches!(result, Err(ControlError::InvalidRequest(_))));
        assert_eq!(service.port_usage(&server_id).await.unwrap().used, 0);
        assert!(service
            .store()
            .list_jobs_by_server(&server_id)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn retry_only_from_failed() {
        let (service, notifier, _dir) = create_test_service();
        let server_id = server(&service).await;
        let created = service
            .create_webapp(&server_id, CreateWebAppRequest::new("a.test", AppType::Php))
            .await
            .unwrap();
        let webapp_id = created.record.webapp_id;

        assert!(matches!(
            service.retry_webapp(&webapp_id).await,
            Err(ControlError::InvalidState { .. })
        ));

        service
            .handle_callback(&created.job.job_id, CallbackOutcome::failure("disk full"))
            .await
            .unwrap();
        assert!(matches!(
            notifier.take()[..],
            [NotificationRequest {
                kind: NotificationKind::JobFailed { .. },
                ..
            }]
        ));

        let retried = service.retry_webapp(&webapp_id).await.unwrap();
        assert_eq!(retried.record.status, ResourceStatus::Pending);
        assert!(retried.record.error_message.is_none());
        assert_ne!(retried.job.job_id, created.job.job_id);

        settle(&service, &retried.job).await;
        let app = service.get_webapp(&webapp_id).await.unwrap();
        assert_eq!(app.status, ResourceStatus::Active);
    }

    #[tokio::test]
    async fn deploy_requires_active_app() {
        let (service, _, _dir) = create_test_service();
        let server_id = server(&service).await;
        let created = service
            .create_webapp(&server_id, CreateWebAppRequest::new("a.test", AppType::Nodejs))
            .await
            .unwrap();
        let webapp_id = created.record.webapp_id;

        assert!(matches!(
            service
                .deploy_webapp(&webapp_id, DeployRequest::default())
                .await,
            Err(ControlError::InvalidState { .. })
        ));

        settle(&service, &created.job).await;
        let deploy = service
            .deploy_webapp(
                &webapp_id,
                DeployRequest {
                    repository: Some("git@example.com:shop.git".into()),
                    branch: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(deploy.job.job_type, JobType::GitDeploy);
        assert_eq!(deploy.job.payload_str("branch"), Some("main"));
        assert_eq!(deploy.record.deploy_status, DeployStatus::Deploying);

        settle(&service, &deploy.job).await;
        assert_eq!(
            jobs_of_type(&service, &server_id, JobType::SupervisorRestart).len(),
            1
        );
    }

    #[tokio::test]
    async fn delete_monorepo_webapp_releases_ports() {
        let (service, _, _dir) = create_test_service();
        let server_id = server(&service).await;
        let created = service
            .create_webapp(
                &server_id,
                CreateWebAppRequest::new("mono.test", AppType::Nodejs)
                    .with_process("web", "node web.js")
                    .with_process("worker", "node worker.js"),
            )
            .await
            .unwrap();
        settle(&service, &created.job).await;

        let job = service
            .delete_webapp(&created.record.webapp_id)
            .await
            .unwrap();
        assert_eq!(job.job_type, JobType::DeleteWebapp);
        assert_eq!(
            jobs_of_type(&service, &server_id, JobType::SupervisorDelete).len(),
            2
        );
        assert!(matches!(
            service.get_webapp(&created.record.webapp_id).await,
            Err(ControlError::WebAppNotFound(_))
        ));
        assert_eq!(service.port_usage(&server_id).await.unwrap().used, 0);

        let report = settle(&service, &job).await;
        assert_eq!(report.job.status, JobStatus::Completed);
        for delete in jobs_of_type(&service, &server_id, JobType::SupervisorDelete) {
            settle(&service, &delete).await;
        }
        assert!(service
            .store()
            .list_supervisor_programs_by_server(&server_id)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn supervisor_program_actions() {
        let (service, _, _dir) = create_test_service();
        let server_id = server(&service).await;
        let request = CreateProgramRequest::new(
            "queue-worker",
            "php artisan queue:work",
            "/home/deploy/shop.test",
            "deploy",
        );

        let created = service
            .create_supervisor_program(&server_id, request.clone())
            .await
            .unwrap();
        assert!(created
            .job
            .payload_str("config")
            .unwrap()
            .contains("command=php artisan queue:work\n"));

        assert!(matches!(
            service.create_supervisor_program(&server_id, request).await,
            Err(ControlError::Store(fleet_store::StoreError::Conflict(_)))
        ));

        settle(&service, &created.job).await;
        let program_id = created.record.program_id;
        let stop = service
            .control_supervisor_program(&program_id, ProgramAction::Stop)
            .await
            .unwrap();
        settle(&service, &stop.job).await;
        let program = service
            .store()
            .get_supervisor_program(&program_id)
            .unwrap()
            .unwrap();
        assert_eq!(program.status, ProgramStatus::Stopped);

        let update = service
            .control_supervisor_program(&program_id, ProgramAction::Update)
            .await
            .unwrap();
        assert!(update.job.payload.contains_key("config"));
    }

    #[tokio::test]
    async fn service_restart_round_trip() {
        let (service, _, _dir) = create_test_service();
        let server_id = server(&service).await;
        let nginx = service.register_service(&server_id, "nginx").await.unwrap();

        let restart = service
            .restart_service(&nginx.service_id, true)
            .await
            .unwrap();
        assert_eq!(restart.record.status, ResourceStatus::Pending);
        assert_eq!(restart.job.job_type, JobType::ServiceReload);
        assert_eq!(restart.job.payload_str("service"), Some("nginx"));

        service
            .handle_callback(
                &restart.job.job_id,
                CallbackOutcome::failure("nginx: [emerg] unknown directive"),
            )
            .await
            .unwrap();
        let stored = service
            .store()
            .get_service(&nginx.service_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ResourceStatus::Failed);

        // A failed service can be restarted again
        let again = service
            .restart_service(&nginx.service_id, false)
            .await
            .unwrap();
        settle(&service, &again.job).await;
        let stored = service
            .store()
            .get_service(&nginx.service_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ResourceStatus::Active);
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn certificate_must_target_app_on_same_server() {
        let (service, _, _dir) = create_test_service();
        let server_a = server(&service).await;
        let server_b = server(&service).await;
        let app = service
            .create_webapp(&server_a, CreateWebAppRequest::new("a.test", AppType::Static))
            .await
            .unwrap()
            .record;

        let wrong = service
            .issue_certificate(
                &server_b,
                IssueCertificateRequest {
                    domains: vec!["a.test".into()],
                    webapp_id: Some(app.webapp_id),
                },
            )
            .await;
        assert!(matches!(wrong, Err(ControlError::InvalidRequest(_))));

        let issued = service
            .issue_certificate(
                &server_a,
                IssueCertificateRequest {
                    domains: vec!["a.test".into()],
                    webapp_id: Some(app.webapp_id),
                },
            )
            .await
            .unwrap();
        settle(&service, &issued.job).await;
        let certificate = service
            .store()
            .get_certificate(&issued.record.certificate_id)
            .unwrap()
            .unwrap();
        assert_eq!(certificate.status, ResourceStatus::Active);
        assert!(certificate.expires_at.is_some());
    }

    #[tokio::test]
    async fn database_create_and_delete() {
        let (service, _, _dir) = create_test_service();
        let server_id = server(&service).await;

        let created = service
            .create_database(
                &server_id,
                CreateDatabaseRequest {
                    name: "shop".into(),
                    engine: DatabaseEngine::Mysql,
                },
            )
            .await
            .unwrap();
        settle(&service, &created.job).await;

        let database_id = created.record.database_id;
        let deleted = service.delete_database(&database_id).await.unwrap();
        assert_eq!(deleted.record.status, ResourceStatus::Pending);
        settle(&service, &deleted.job).await;

        assert!(service.store().get_database(&database_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn firewall_rule_applied() {
        let (service, _, _dir) = create_test_service();
        let server_id = server(&service).await;

        assert!(service
            .add_firewall_rule(&server_id, FirewallRuleRequest::allow_tcp(0))
            .await
            .is_err());

        let rule = service
            .add_firewall_rule(&server_id, FirewallRuleRequest::allow_tcp(443))
            .await
            .unwrap();
        assert_eq!(rule.job.payload["port"], 443);
        settle(&service, &rule.job).await;

        let stored = service
            .store()
            .get_firewall_rule(&rule.record.rule_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ResourceStatus::Active);
    }

    #[tokio::test]
    async fn cron_jobs_resync_whole_crontab() {
        let (service, _, _dir) = create_test_service();
        let server_id = server(&service).await;
        let request = |command: &str| CronJobRequest {
            expression: "0  3 * * *".into(),
            command: command.into(),
            user: "deploy".into(),
        };

        let first = service
            .add_cron_job(&server_id, request("backup.sh"))
            .await
            .unwrap();
        settle(&service, &first.job).await;
        assert_eq!(
            service
                .store()
                .get_cron_job(&first.record.cron_id)
                .unwrap()
                .unwrap()
                .status,
            ResourceStatus::Active
        );

        let second = service
            .add_cron_job(&server_id, request("cleanup.sh"))
            .await
            .unwrap();
        let crontab = second.job.payload_str("crontab").unwrap();
        assert!(crontab.contains("0 3 * * * deploy backup.sh\n"));
        assert!(crontab.contains("0 3 * * * deploy cleanup.sh\n"));

        // Every entry waits on the new sync
        for entry in service.store().list_cron_jobs_by_server(&server_id).unwrap() {
            assert_eq!(entry.status, ResourceStatus::Pending);
        }
        settle(&service, &second.job).await;
        for entry in service.store().list_cron_jobs_by_server(&server_id).unwrap() {
            assert_eq!(entry.status, ResourceStatus::Active);
        }
    }

    #[tokio::test]
    async fn stats_trigger_and_clear_alerts() {
        let (service, notifier, _dir) = create_test_service();
        let server_id = server(&service).await;
        service
            .update_alert_settings(
                &server_id,
                AlertSettings {
                    enabled: true,
                    load_threshold: Some(5.0),
                    memory_threshold: None,
                    disk_threshold: None,
                },
            )
            .await
            .unwrap();

        let high = ServerStats {
            load_1m: 8.5,
            memory_percent: 40.0,
            disk_percent: 50.0,
        };
        let server = service.record_server_stats(&server_id, high).await.unwrap();
        assert!(server.is_load_alert_active);
        assert!(matches!(
            notifier.take()[..],
            [NotificationRequest {
                kind: NotificationKind::HighLoad { .. },
                ..
            }]
        ));

        let normal = ServerStats {
            load_1m: 2.0,
            ..high
        };
        service.record_server_stats(&server_id, normal).await.unwrap();
        service.record_server_stats(&server_id, normal).await.unwrap();
        assert!(matches!(
            notifier.take()[..],
            [NotificationRequest {
                kind: NotificationKind::ResourcesNormal { .. },
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn health_checks_notify_when_down() {
        let (service, notifier, _dir) = create_test_service();
        let mut monitor = HealthMonitor::http("https://shop.test/health");
        monitor.failure_threshold = 1;
        let monitor = service.add_health_monitor(monitor).await.unwrap();

        let probed = service.run_health_checks(Utc::now()).await.unwrap();
        assert_eq!(probed, 1);

        let stored = service
            .store()
            .get_health_monitor(&monitor.monitor_id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, MonitorStatus::Down);
        assert!(matches!(
            notifier.take()[..],
            [NotificationRequest {
                kind: NotificationKind::MonitorDown { .. },
                ..
            }]
        ));

        // Not due again until the interval has passed
        assert_eq!(service.run_health_checks(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn next_job_claims_highest_priority() {
        let (service, _, _dir) = create_test_service();
        let server_id = server(&service).await;

        let mut payload = JobPayload::new();
        payload.insert("path".into(), json!("/var/www"));
        let low = service
            .dispatch_job(&server_id, JobType::ListDirectory, payload, 0)
            .await
            .unwrap();
        let high = service
            .dispatch_job(&server_id, JobType::CheckServices, JobPayload::new(), 5)
            .await
            .unwrap();

        let claimed = service.next_job(&server_id).await.unwrap().unwrap();
        assert_eq!(claimed.job_id, high.job_id);
        assert_eq!(claimed.status, JobStatus::Running);
        let claimed = service.next_job(&server_id).await.unwrap().unwrap();
        assert_eq!(claimed.job_id, low.job_id);
        assert!(service.next_job(&server_id).await.unwrap().is_none());
    }
}
