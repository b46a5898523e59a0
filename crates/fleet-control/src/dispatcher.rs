//! Job creation and delivery bookkeeping.
//!
//! The dispatcher validates a payload against its job type, persists a
//! pending job with a deadline, and serves the poll contract used by the
//! agent transport (`next_pending` + `mark_running`).

use std::sync::Arc;

use chrono::{Duration, Utc};
use fleet_core::{JobId, ServerId};
use fleet_store::{Job, JobPayload, JobStatus, JobType, ResourceRef, Store};

use crate::error::{ControlError, Result};
use crate::locks::StripedLocks;
use crate::types::JobTimeouts;

/// Keys a payload must carry for each job type.
#[must_use]
pub const fn required_keys(job_type: JobType) -> &'static [&'static str] {
    match job_type {
        JobType::CreateWebapp => &["webapp_id", "domain", "app_type"],
        JobType::DeleteWebapp => &["webapp_id", "domain"],
        JobType::Deploy => &["webapp_id"],
        JobType::GitDeploy => &["webapp_id", "repository", "branch"],
        JobType::SslIssue => &["certificate_id", "domains"],
        JobType::ServiceRestart | JobType::ServiceReload => &["service"],
        JobType::SupervisorCreate | JobType::SupervisorUpdate => &["program_id", "name", "config"],
        JobType::SupervisorStart
        | JobType::SupervisorStop
        | JobType::SupervisorRestart
        | JobType::SupervisorDelete => &["program_id", "name"],
        JobType::SyncCrontab => &["crontab"],
        JobType::ApplyFirewallRule => &["rule_id", "port", "action"],
        JobType::CreateDatabase | JobType::DeleteDatabase => &["database_id", "name"],
        JobType::DatabaseBackup | JobType::TestDatabaseConnection => &["database_id"],
        JobType::ListDirectory => &["path"],
        JobType::SshKeyAdd => &["public_key"],
        JobType::CheckServices
        | JobType::ProvisionServer
        | JobType::ProvisionPhp
        | JobType::ProvisionNodejs
        | JobType::ProvisionDatabase => &[],
    }
}

/// Check that `payload` carries every key `job_type` requires.
///
/// # Errors
///
/// Returns `ControlError::InvalidPayload` naming the first missing key. A key
/// holding `null` counts as missing.
pub fn validate_payload(job_type: JobType, payload: &JobPayload) -> Result<()> {
    for &key in required_keys(job_type) {
        if payload.get(key).map_or(true, serde_json::Value::is_null) {
            return Err(ControlError::InvalidPayload { job_type, key });
        }
    }
    Ok(())
}

/// Creates job records and hands them to the transport.
pub struct JobDispatcher<S: Store> {
    store: Arc<S>,
    timeouts: JobTimeouts,
    job_locks: Arc<StripedLocks>,
}

impl<S: Store> JobDispatcher<S> {
    /// Create a new dispatcher.
    ///
    /// `job_locks` must be the table the callback processor uses so delivery
    /// and outcomes of one job are serialized.
    #[must_use]
    pub fn new(store: Arc<S>, timeouts: JobTimeouts, job_locks: Arc<StripedLocks>) -> Self {
        Self {
            store,
            timeouts,
            job_locks,
        }
    }

    /// Create a pending job with no owning resource.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidPayload` if a required key is missing.
    pub fn dispatch(
        &self,
        server_id: ServerId,
        job_type: JobType,
        payload: JobPayload,
        priority: i32,
    ) -> Result<Job> {
        self.create(None, None, server_id, job_type, payload, priority)
    }

    /// Create a pending job whose outcome drives `resource`.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidPayload` if a required key is missing.
    pub fn dispatch_for(
        &self,
        resource: ResourceRef,
        server_id: ServerId,
        job_type: JobType,
        payload: JobPayload,
        priority: i32,
    ) -> Result<Job> {
        self.create(Some(resource), None, server_id, job_type, payload, priority)
    }

    /// Create a follow-up of `parent` driving `resource` on the parent's
    /// server.
    ///
    /// If `parent` already has a follow-up of the same type for the same
    /// resource, that job is returned and nothing new is dispatched, so a
    /// callback replayed after a partial failure never queues the work twice.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidPayload` if a required key is missing.
    pub fn dispatch_follow_up(
        &self,
        parent: &Job,
        resource: ResourceRef,
        job_type: JobType,
        payload: JobPayload,
        priority: i32,
    ) -> Result<Job> {
        let existing = self
            .store
            .list_jobs_by_parent(&parent.job_id)?
            .into_iter()
            .find(|job| job.job_type == job_type && job.resource == Some(resource));
        if let Some(job) = existing {
            tracing::debug!(
                job_id = %job.job_id,
                parent_job_id = %parent.job_id,
                job_type = %job_type,
                "Follow-up already dispatched"
            );
            return Ok(job);
        }

        self.create(
            Some(resource),
            Some(parent.job_id),
            parent.server_id,
            job_type,
            payload,
            priority,
        )
    }

    fn create(
        &self,
        resource: Option<ResourceRef>,
        parent_job_id: Option<JobId>,
        server_id: ServerId,
        job_type: JobType,
        payload: JobPayload,
        priority: i32,
    ) -> Result<Job> {
        validate_payload(job_type, &payload)?;

        let now = Utc::now();
        let timeout = self.timeouts.for_type(job_type);
        let deadline_at = i64::try_from(timeout)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|d| now.checked_add_signed(d));

        let job = Job {
            job_id: JobId::generate(),
            server_id,
            job_type,
            payload,
            priority,
            status: JobStatus::Pending,
            resource,
            parent_job_id,
            error: None,
            output: None,
            created_at: now,
            deadline_at,
            started_at: None,
            finished_at: None,
        };

        self.store.put_job(&job)?;

        tracing::info!(
            job_id = %job.job_id,
            server_id = %server_id,
            job_type = %job_type,
            resource = ?resource,
            "Dispatched job"
        );

        Ok(job)
    }

    /// The pending job a server's agent should run next: highest priority
    /// first, oldest first among equals.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub fn next_pending(&self, server_id: &ServerId) -> Result<Option<Job>> {
        Ok(self.pending_for(server_id)?.into_iter().next())
    }

    /// Record transport acknowledgement: `pending → running`.
    ///
    /// Returns `None` and leaves the job untouched if it is no longer pending.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::JobNotFound` if the job doesn't exist.
    pub fn mark_running(&self, job_id: &JobId) -> Result<Option<Job>> {
        let _guard = self.job_locks.lock(job_id.as_bytes());

        let mut job = self
            .store
            .get_job(job_id)?
            .ok_or(ControlError::JobNotFound(*job_id))?;

        if job.status != JobStatus::Pending {
            tracing::debug!(job_id = %job_id, status = ?job.status, "Job not pending, left untouched");
            return Ok(None);
        }

        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        self.store.put_job(&job)?;

        tracing::debug!(job_id = %job_id, "Job marked running");
        Ok(Some(job))
    }

    /// Take the next pending job for a server and mark it running.
    ///
    /// Concurrent pollers never receive the same job.
    ///
    /// # Errors
    ///
    /// Returns an error if a store operation fails.
    pub fn claim_next(&self, server_id: &ServerId) -> Result<Option<Job>> {
        for candidate in self.pending_for(server_id)? {
            if let Some(job) = self.mark_running(&candidate.job_id)? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    fn pending_for(&self, server_id: &ServerId) -> Result<Vec<Job>> {
        let mut pending = self
            .store
            .list_jobs_by_server_and_status(server_id, JobStatus::Pending)?;

        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::WebAppId;
    use fleet_store::RocksStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_dispatcher() -> (JobDispatcher<RocksStore>, Arc<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let dispatcher = JobDispatcher::new(
            Arc::clone(&store),
            JobTimeouts::default(),
            Arc::new(StripedLocks::default()),
        );
        (dispatcher, store, dir)
    }

    fn payload(value: serde_json::Value) -> JobPayload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn every_type_has_a_schema() {
        for job_type in JobType::ALL {
            let keys = required_keys(job_type);
            let full: JobPayload = keys.iter().map(|k| ((*k).to_string(), json!("x"))).collect();
            assert!(validate_payload(job_type, &full).is_ok(), "{job_type}");
        }
    }

    #[test]
    fn missing_key_rejected_before_persisting() {
        let (dispatcher, store, _dir) = create_dispatcher();
        let server_id = ServerId::generate();

        let result = dispatcher.dispatch(
            server_id,
            JobType::GitDeploy,
            payload(json!({"webapp_id": "a", "repository": "git@x:y.git"})),
            0,
        );

        assert!(matches!(
            result,
            Err(ControlError::InvalidPayload {
                job_type: JobType::GitDeploy,
                key: "branch"
            })
        ));
        assert!(store.list_jobs_by_server(&server_id).unwrap().is_empty());
    }

    #[test]
    fn null_value_counts_as_missing() {
        let result = validate_payload(JobType::ListDirectory, &payload(json!({"path": null})));
        assert!(result.is_err());
    }

    #[test]
    fn dispatch_persists_pending_job_with_deadline() {
        let (dispatcher, store, _dir) = create_dispatcher();
        let server_id = ServerId::generate();
        let webapp_id = WebAppId::generate();

        let job = dispatcher
            .dispatch_for(
                ResourceRef::WebApp(webapp_id),
                server_id,
                JobType::Deploy,
                payload(json!({"webapp_id": webapp_id.to_string()})),
                5,
            )
            .unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.resource, Some(ResourceRef::WebApp(webapp_id)));
        let deadline = job.deadline_at.unwrap();
        assert_eq!((deadline - job.created_at).num_seconds(), 1800);

        let stored = store.get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(stored.priority, 5);
    }

    #[test]
    fn next_pending_orders_by_priority_then_age() {
        let (dispatcher, store, _dir) = create_dispatcher();
        let server_id = ServerId::generate();

        // A long finished history on the same server must not surface
        for _ in 0..200 {
            let mut done = dispatcher
                .dispatch(server_id, JobType::CheckServices, JobPayload::new(), 50)
                .unwrap();
            done.status = JobStatus::Completed;
            done.finished_at = Some(Utc::now());
            store.put_job(&done).unwrap();
        }

        let low = dispatcher
            .dispatch(server_id, JobType::CheckServices, JobPayload::new(), 0)
            .unwrap();
        let high = dispatcher
            .dispatch(server_id, JobType::CheckServices, JobPayload::new(), 10)
            .unwrap();
        let low_later = dispatcher
            .dispatch(server_id, JobType::CheckServices, JobPayload::new(), 0)
            .unwrap();

        assert_eq!(
            dispatcher.next_pending(&server_id).unwrap().unwrap().job_id,
            high.job_id
        );

        let order: Vec<_> = (0..3)
            .map(|_| dispatcher.claim_next(&server_id).unwrap().unwrap().job_id)
            .collect();
        assert_eq!(order[0], high.job_id);
        assert!(order.contains(&low.job_id));
        assert!(order.contains(&low_later.job_id));
        assert!(dispatcher.claim_next(&server_id).unwrap().is_none());
        assert_eq!(store.list_jobs_by_server(&server_id).unwrap().len(), 203);
    }

    #[test]
    fn follow_up_dispatched_once_per_parent() {
        let (dispatcher, store, _dir) = create_dispatcher();
        let server_id = ServerId::generate();
        let webapp_id = WebAppId::generate();
        let parent = dispatcher
            .dispatch(server_id, JobType::Deploy, payload(json!({"webapp_id": "a"})), 0)
            .unwrap();
        let restart = || payload(json!({"program_id": "p", "name": "nodejs-a"}));

        let first = dispatcher
            .dispatch_follow_up(
                &parent,
                ResourceRef::WebApp(webapp_id),
                JobType::SupervisorRestart,
                restart(),
                0,
            )
            .unwrap();
        assert_eq!(first.parent_job_id, Some(parent.job_id));
        assert_eq!(first.server_id, server_id);

        let again = dispatcher
            .dispatch_follow_up(
                &parent,
                ResourceRef::WebApp(webapp_id),
                JobType::SupervisorRestart,
                restart(),
                0,
            )
            .unwrap();
        assert_eq!(again.job_id, first.job_id);

        // Another resource under the same parent is its own follow-up
        let other = dispatcher
            .dispatch_follow_up(
                &parent,
                ResourceRef::WebApp(WebAppId::generate()),
                JobType::SupervisorRestart,
                restart(),
                0,
            )
            .unwrap();
        assert_ne!(other.job_id, first.job_id);
        assert_eq!(store.list_jobs_by_parent(&parent.job_id).unwrap().len(), 2);
    }

    #[test]
    fn mark_running_only_moves_pending_jobs() {
        let (dispatcher, _store, _dir) = create_dispatcher();
        let job = dispatcher
            .dispatch(ServerId::generate(), JobType::CheckServices, JobPayload::new(), 0)
            .unwrap();

        let running = dispatcher.mark_running(&job.job_id).unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());

        assert!(dispatcher.mark_running(&job.job_id).unwrap().is_none());
        assert!(matches!(
            dispatcher.mark_running(&JobId::generate()),
            Err(ControlError::JobNotFound(_))
        ));
    }
}
