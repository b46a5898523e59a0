//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use fleet_core::{
    CertificateId, CronJobId, DatabaseId, FirewallRuleId, JobId, MonitorId, ServerId, ServiceId,
    SupervisorProgramId, WebAppId,
};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::keys::{self, ID_LEN};
use crate::schema::{all_column_families, cf};
use crate::types::{
    CronJob, Database, FirewallRule, HealthMonitor, Job, JobStatus, Server, Service,
    SslCertificate, SupervisorProgram, WebApp,
};
use crate::Store;

/// A record that belongs to a server and is indexed by it.
trait ServerScoped: Serialize + DeserializeOwned {
    const CF: &'static str;
    const BY_SERVER: &'static str;

    fn id_bytes(&self) -> &[u8; ID_LEN];
    fn owner(&self) -> &ServerId;
}

macro_rules! server_scoped {
    ($ty:ty, $cf:expr, $by_server:expr, $id:ident) => {
        impl ServerScoped for $ty {
            const CF: &'static str = $cf;
            const BY_SERVER: &'static str = $by_server;

            fn id_bytes(&self) -> &[u8; ID_LEN] {
                self.$id.as_bytes()
            }

            fn owner(&self) -> &ServerId {
                &self.server_id
            }
        }
    };
}

server_scoped!(Job, cf::JOBS, cf::JOBS_BY_SERVER, job_id);
server_scoped!(WebApp, cf::WEB_APPS, cf::WEB_APPS_BY_SERVER, webapp_id);
server_scoped!(
    SupervisorProgram,
    cf::SUPERVISOR_PROGRAMS,
    cf::SUPERVISOR_BY_SERVER,
    program_id
);
server_scoped!(Service, cf::SERVICES, cf::SERVICES_BY_SERVER, service_id);
server_scoped!(
    SslCertificate,
    cf::CERTIFICATES,
    cf::CERTIFICATES_BY_SERVER,
    certificate_id
);
server_scoped!(Database, cf::DATABASES, cf::DATABASES_BY_SERVER, database_id);
server_scoped!(
    FirewallRule,
    cf::FIREWALL_RULES,
    cf::FIREWALL_RULES_BY_SERVER,
    rule_id
);
server_scoped!(CronJob, cf::CRON_JOBS, cf::CRON_JOBS_BY_SERVER, cron_id);

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    // Serializes the check-then-write on the program name index.
    program_names: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::debug!("Opened RocksDB store");

        Ok(Self {
            db: Arc::new(db),
            program_names: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_value<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Collect every key in `cf_name` starting with `prefix`.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Box<[u8]>>> {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, rocksdb::Direction::Forward));

        let mut found = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }
            found.push(key);
        }
        Ok(found)
    }

    fn scan_all<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            records.push(Self::deserialize(&value)?);
        }
        Ok(records)
    }

    /// Stage the primary record and its server index entry.
    fn stage_scoped<T: ServerScoped>(&self, batch: &mut WriteBatch, record: &T) -> Result<()> {
        let cf_main = self.cf(T::CF)?;
        let cf_by_server = self.cf(T::BY_SERVER)?;

        batch.put_cf(
            &cf_main,
            keys::record_key(record.id_bytes()),
            Self::serialize(record)?,
        );
        batch.put_cf(
            &cf_by_server,
            keys::server_index_key(record.owner(), record.id_bytes()),
            [],
        );
        Ok(())
    }

    fn put_scoped<T: ServerScoped>(&self, record: &T) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_scoped(&mut batch, record)?;
        self.write(batch)
    }

    /// Stage removal of the primary record and its server index entry.
    fn stage_delete_scoped<T: ServerScoped>(
        &self,
        batch: &mut WriteBatch,
        id: &[u8; ID_LEN],
    ) -> Result<T> {
        let record: T = self
            .get_value(T::CF, &keys::record_key(id))?
            .ok_or(StoreError::NotFound)?;

        let cf_main = self.cf(T::CF)?;
        let cf_by_server = self.cf(T::BY_SERVER)?;

        batch.delete_cf(&cf_main, keys::record_key(id));
        batch.delete_cf(&cf_by_server, keys::server_index_key(record.owner(), id));
        Ok(record)
    }

    fn delete_scoped<T: ServerScoped>(&self, id: &[u8; ID_LEN]) -> Result<T> {
        let mut batch = WriteBatch::default();
        let record = self.stage_delete_scoped(&mut batch, id)?;
        self.write(batch)?;
        Ok(record)
    }

    /// Load the jobs whose IDs end the keys found under `prefix` in `cf_name`.
    fn jobs_from_index(
        &self,
        cf_name: &str,
        prefix: &[u8],
        job_key: fn(&[u8]) -> &[u8],
    ) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        for key in self.scan_prefix(cf_name, prefix)? {
            if let Some(job) = self.get_value(cf::JOBS, job_key(&key))? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    fn list_scoped<T: ServerScoped>(&self, server_id: &ServerId) -> Result<Vec<T>> {
        let prefix = keys::server_prefix(server_id);
        let mut records = Vec::new();
        for key in self.scan_prefix(T::BY_SERVER, &prefix)? {
            let record_key = keys::record_key_from_server_index(&key);
            if let Some(record) = self.get_value(T::CF, record_key)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Server Operations
    // =========================================================================

    fn put_server(&self, server: &Server) -> Result<()> {
        let cf = self.cf(cf::SERVERS)?;
        let value = Self::serialize(server)?;

        self.db
            .put_cf(&cf, keys::record_key(server.server_id.as_bytes()), value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_server(&self, server_id: &ServerId) -> Result<Option<Server>> {
        self.get_value(cf::SERVERS, &keys::record_key(server_id.as_bytes()))
    }

    fn list_servers(&self) -> Result<Vec<Server>> {
        self.scan_all(cf::SERVERS)
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    fn put_job(&self, job: &Job) -> Result<()> {
        let cf_by_status = self.cf(cf::JOBS_BY_STATUS)?;
        let cf_by_server_status = self.cf(cf::JOBS_BY_SERVER_STATUS)?;
        let job_key = job.job_id.as_bytes();

        // Check if the job exists to handle status index updates
        let old_status = self
            .get_value::<Job>(cf::JOBS, &keys::record_key(job_key))?
            .map(|j| j.status);

        let mut batch = WriteBatch::default();
        self.stage_scoped(&mut batch, job)?;

        if let Some(old) = old_status.filter(|old| *old != job.status) {
            batch.delete_cf(&cf_by_status, keys::status_job_key(old.as_u8(), job_key));
            batch.delete_cf(
                &cf_by_server_status,
                keys::server_status_job_key(&job.server_id, old.as_u8(), job_key),
            );
        }
        batch.put_cf(
            &cf_by_status,
            keys::status_job_key(job.status.as_u8(), job_key),
            [],
        );
        batch.put_cf(
            &cf_by_server_status,
            keys::server_status_job_key(&job.server_id, job.status.as_u8(), job_key),
            [],
        );
        if let Some(parent) = &job.parent_job_id {
            let cf_by_parent = self.cf(cf::JOBS_BY_PARENT)?;
            batch.put_cf(&cf_by_parent, keys::parent_job_key(parent, job_key), []);
        }

        self.write(batch)
    }

    fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        self.get_value(cf::JOBS, &keys::record_key(job_id.as_bytes()))
    }

    fn list_jobs_by_server(&self, server_id: &ServerId) -> Result<Vec<Job>> {
        self.list_scoped(server_id)
    }

    fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        self.jobs_from_index(
            cf::JOBS_BY_STATUS,
            &keys::status_prefix(status.as_u8()),
            keys::record_key_from_status_index,
        )
    }

    fn list_jobs_by_server_and_status(
        &self,
        server_id: &ServerId,
        status: JobStatus,
    ) -> Result<Vec<Job>> {
        self.jobs_from_index(
            cf::JOBS_BY_SERVER_STATUS,
            &keys::server_status_prefix(server_id, status.as_u8()),
            keys::record_key_from_server_status_index,
        )
    }

    fn list_jobs_by_parent(&self, parent_job_id: &JobId) -> Result<Vec<Job>> {
        self.jobs_from_index(
            cf::JOBS_BY_PARENT,
            parent_job_id.as_bytes(),
            keys::record_key_from_parent_index,
        )
    }

    // =========================================================================
    // Web App Operations
    // =========================================================================

    fn put_web_app(&self, app: &WebApp) -> Result<()> {
        self.put_scoped(app)
    }

    fn get_web_app(&self, webapp_id: &WebAppId) -> Result<Option<WebApp>> {
        self.get_value(cf::WEB_APPS, &keys::record_key(webapp_id.as_bytes()))
    }

    fn delete_web_app(&self, webapp_id: &WebAppId) -> Result<()> {
        self.delete_scoped::<WebApp>(webapp_id.as_bytes())
            .map(|_| ())
    }

    fn list_web_apps_by_server(&self, server_id: &ServerId) -> Result<Vec<WebApp>> {
        self.list_scoped(server_id)
    }

    // =========================================================================
    // Supervisor Program Operations
    // =========================================================================

    fn put_supervisor_program(&self, program: &SupervisorProgram) -> Result<()> {
        let cf_by_name = self.cf(cf::SUPERVISOR_BY_NAME)?;
        let program_key = program.program_id.as_bytes();
        let name_key = keys::program_name_key(&program.server_id, &program.name);

        let _guard = self.program_names.lock();

        let owner = self
            .db
            .get_cf(&cf_by_name, &name_key)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        if let Some(owner) = owner {
            if owner.as_slice() != program_key.as_slice() {
                return Err(StoreError::Conflict(format!(
                    "supervisor program name already in use: {}",
                    program.name
                )));
            }
        }

        let previous = self.get_supervisor_program(&program.program_id)?;

        let mut batch = WriteBatch::default();
        if let Some(previous) = previous {
            if previous.name != program.name {
                batch.delete_cf(
                    &cf_by_name,
                    keys::program_name_key(&previous.server_id, &previous.name),
                );
            }
        }
        self.stage_scoped(&mut batch, program)?;
        batch.put_cf(&cf_by_name, &name_key, program_key);

        self.write(batch)
    }

    fn get_supervisor_program(
        &self,
        program_id: &SupervisorProgramId,
    ) -> Result<Option<SupervisorProgram>> {
        self.get_value(
            cf::SUPERVISOR_PROGRAMS,
            &keys::record_key(program_id.as_bytes()),
        )
    }

    fn get_supervisor_program_by_name(
        &self,
        server_id: &ServerId,
        name: &str,
    ) -> Result<Option<SupervisorProgram>> {
        let cf_by_name = self.cf(cf::SUPERVISOR_BY_NAME)?;
        let owner = self
            .db
            .get_cf(&cf_by_name, keys::program_name_key(server_id, name))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        match owner {
            Some(program_key) => self.get_value(cf::SUPERVISOR_PROGRAMS, &program_key),
            None => Ok(None),
        }
    }

    fn delete_supervisor_program(&self, program_id: &SupervisorProgramId) -> Result<()> {
        let cf_by_name = self.cf(cf::SUPERVISOR_BY_NAME)?;
        let _guard = self.program_names.lock();

        let mut batch = WriteBatch::default();
        let program =
            self.stage_delete_scoped::<SupervisorProgram>(&mut batch, program_id.as_bytes())?;
        batch.delete_cf(
            &cf_by_name,
            keys::program_name_key(&program.server_id, &program.name),
        );
        self.write(batch)
    }

    fn list_supervisor_programs_by_server(
        &self,
        server_id: &ServerId,
    ) -> Result<Vec<SupervisorProgram>> {
        self.list_scoped(server_id)
    }

    // =========================================================================
    // Satellite Resource Operations
    // =========================================================================

    fn put_service(&self, service: &Service) -> Result<()> {
        self.put_scoped(service)
    }

    fn get_service(&self, service_id: &ServiceId) -> Result<Option<Service>> {
        self.get_value(cf::SERVICES, &keys::record_key(service_id.as_bytes()))
    }

    fn put_certificate(&self, certificate: &SslCertificate) -> Result<()> {
        self.put_scoped(certificate)
    }

    fn get_certificate(&self, certificate_id: &CertificateId) -> Result<Option<SslCertificate>> {
        self.get_value(
            cf::CERTIFICATES,
            &keys::record_key(certificate_id.as_bytes()),
        )
    }

    fn put_database(&self, database: &Database) -> Result<()> {
        self.put_scoped(database)
    }

    fn get_database(&self, database_id: &DatabaseId) -> Result<Option<Database>> {
        self.get_value(cf::DATABASES, &keys::record_key(database_id.as_bytes()))
    }

    fn delete_database(&self, database_id: &DatabaseId) -> Result<()> {
        self.delete_scoped::<Database>(database_id.as_bytes())
            .map(|_| ())
    }

    fn put_firewall_rule(&self, rule: &FirewallRule) -> Result<()> {
        self.put_scoped(rule)
    }

    fn get_firewall_rule(&self, rule_id: &FirewallRuleId) -> Result<Option<FirewallRule>> {
        self.get_value(cf::FIREWALL_RULES, &keys::record_key(rule_id.as_bytes()))
    }

    fn put_cron_job(&self, cron_job: &CronJob) -> Result<()> {
        self.put_scoped(cron_job)
    }

    fn get_cron_job(&self, cron_id: &CronJobId) -> Result<Option<CronJob>> {
        self.get_value(cf::CRON_JOBS, &keys::record_key(cron_id.as_bytes()))
    }

    fn list_cron_jobs_by_server(&self, server_id: &ServerId) -> Result<Vec<CronJob>> {
        self.list_scoped(server_id)
    }

    // =========================================================================
    // Health Monitor Operations
    // =========================================================================

    fn put_health_monitor(&self, monitor: &HealthMonitor) -> Result<()> {
        let cf = self.cf(cf::HEALTH_MONITORS)?;
        let value = Self::serialize(monitor)?;

        self.db
            .put_cf(&cf, keys::record_key(monitor.monitor_id.as_bytes()), value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_health_monitor(&self, monitor_id: &MonitorId) -> Result<Option<HealthMonitor>> {
        self.get_value(
            cf::HEALTH_MONITORS,
            &keys::record_key(monitor_id.as_bytes()),
        )
    }

    fn list_health_monitors(&self) -> Result<Vec<HealthMonitor>> {
        self.scan_all(cf::HEALTH_MONITORS)
    }
}
