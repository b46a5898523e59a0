//! Deadline enforcement for jobs whose agent never reported back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleet_store::{Job, JobStatus, Store};

use crate::callback::{CallbackOutcome, CallbackProcessor, CallbackReport};
use crate::error::Result;

/// Fails pending and running jobs that are past their deadline.
///
/// Timeouts go through [`CallbackProcessor::handle`] like any other failure,
/// so the owning resource settles and a callback racing the sweep is applied
/// at most once.
pub struct JobSweeper<S: Store> {
    store: Arc<S>,
    processor: Arc<CallbackProcessor<S>>,
}

impl<S: Store> JobSweeper<S> {
    /// Create a new sweeper.
    #[must_use]
    pub fn new(store: Arc<S>, processor: Arc<CallbackProcessor<S>>) -> Self {
        Self { store, processor }
    }

    /// Fail every job whose deadline is before `now`.
    ///
    /// Returns the reports of the jobs actually failed; jobs settled by a
    /// concurrent callback are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if listing jobs fails. Failures on individual jobs
    /// are logged and left for the next sweep.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<CallbackReport>> {
        let mut expired: Vec<Job> = self.store.list_jobs_by_status(JobStatus::Pending)?;
        expired.extend(self.store.list_jobs_by_status(JobStatus::Running)?);
        expired.retain(|job| job.deadline_at.is_some_and(|deadline| deadline < now));

        let mut reports = Vec::new();
        for job in expired {
            let outcome = CallbackOutcome::failure(timeout_message(&job));
            match self.processor.handle(&job.job_id, &outcome) {
                Ok(report) if report.duplicate => {}
                Ok(report) => {
                    tracing::warn!(
                        job_id = %job.job_id,
                        server_id = %job.server_id,
                        job_type = %job.job_type,
                        "Job timed out"
                    );
                    reports.push(report);
                }
                Err(e) => {
                    tracing::error!(job_id = %job.job_id, error = %e, "Failed to time out job");
                }
            }
        }

        Ok(reports)
    }
}

fn timeout_message(job: &Job) -> String {
    let seconds = job
        .deadline_at
        .map_or(0, |deadline| (deadline - job.created_at).num_seconds());
    format!("job timed out after {seconds}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::JobDispatcher;
    use crate::locks::StripedLocks;
    use crate::notify::NotificationKind;
    use crate::supervisor::SupervisorConfigBuilder;
    use crate::types::JobTimeouts;
    use chrono::Duration;
    use fleet_core::{ServiceId, ServerId};
    use fleet_store::{JobPayload, JobType, ResourceRef, ResourceStatus, RocksStore, Service};
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (
        Arc<RocksStore>,
        Arc<JobDispatcher<RocksStore>>,
        Arc<CallbackProcessor<RocksStore>>,
        JobSweeper<RocksStore>,
        TempDir,
    ) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let locks = Arc::new(StripedLocks::default());
        let dispatcher = Arc::new(JobDispatcher::new(
            Arc::clone(&store),
            JobTimeouts::default(),
            Arc::clone(&locks),
        ));
        let processor = Arc::new(CallbackProcessor::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            SupervisorConfigBuilder::default(),
            locks,
        ));
        let sweeper = JobSweeper::new(Arc::clone(&store), Arc::clone(&processor));
        (store, dispatcher, processor, sweeper, dir)
    }

    fn service_job(
        store: &RocksStore,
        dispatcher: &JobDispatcher<RocksStore>,
        server_id: ServerId,
    ) -> (Service, Job) {
        let service = Service {
            service_id: ServiceId::generate(),
            server_id,
            name: "nginx".into(),
            status: ResourceStatus::Pending,
            error_message: None,
            updated_at: Utc::now(),
        };
        store.put_service(&service).unwrap();

        let mut payload = JobPayload::new();
        payload.insert("service".into(), json!("nginx"));
        let job = dispatcher
            .dispatch_for(
                ResourceRef::Service(service.service_id),
                server_id,
                JobType::ServiceRestart,
                payload,
                0,
            )
            .unwrap();
        (service, job)
    }

    #[test]
    fn expired_job_fails_and_settles_resource() {
        let (store, dispatcher, _, sweeper, _dir) = setup();
        let (service, job) = service_job(&store, &dispatcher, ServerId::generate());

        let reports = sweeper.sweep(Utc::now() + Duration::hours(1)).unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].job.status, JobStatus::Failed);
        assert_eq!(
            reports[0].job.error.as_deref(),
            Some("job timed out after 600s")
        );
        assert!(matches!(
            reports[0].notifications[0].kind,
            NotificationKind::JobFailed { .. }
        ));

        let stored = store.get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        let service = store.get_service(&service.service_id).unwrap().unwrap();
        assert_eq!(service.status, ResourceStatus::Failed);
    }

    #[test]
    fn running_jobs_expire_too() {
        let (store, dispatcher, _, sweeper, _dir) = setup();
        let server_id = ServerId::generate();
        let (_, job) = service_job(&store, &dispatcher, server_id);
        dispatcher.claim_next(&server_id).unwrap().unwrap();

        let reports = sweeper.sweep(Utc::now() + Duration::hours(1)).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].job.job_id, job.job_id);
    }

    #[test]
    fn jobs_within_deadline_untouched() {
        let (store, dispatcher, _, sweeper, _dir) = setup();
        let (_, job) = service_job(&store, &dispatcher, ServerId::generate());

        assert!(sweeper.sweep(Utc::now()).unwrap().is_empty());
        let stored = store.get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
    }

    #[test]
    fn late_callback_after_timeout_is_duplicate() {
        let (store, dispatcher, processor, sweeper, _dir) = setup();
        let (service, job) = service_job(&store, &dispatcher, ServerId::generate());

        sweeper.sweep(Utc::now() + Duration::hours(1)).unwrap();
        let late = processor
            .handle(&job.job_id, &CallbackOutcome::success(None))
            .unwrap();

        assert!(late.duplicate);
        let service = store.get_service(&service.service_id).unwrap().unwrap();
        assert_eq!(service.status, ResourceStatus::Failed);
    }
}
