//! In-process [`JobStore`] with the same transition rules as [`PgJobStore`].
//!
//! Used by tests and by local runs without a database.
//!
//! [`PgJobStore`]: crate::store::PgJobStore

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{JobStatus, NotificationJob};

use crate::store::{CANCELLED_REASON, CLAIM_TIMEOUT_REASON, JobStore, StaleClaims};

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, NotificationJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored job, oldest first.
    pub async fn snapshot(&self) -> Vec<NotificationJob> {
        let jobs = self.jobs.lock().await;
        let mut all: Vec<NotificationJob> = jobs.values().cloned().collect();
        all.sort_by_key(|j| j.created_at);
        all
    }

    /// Overwrite a stored job as-is, bypassing transition rules.
    pub async fn put(&self, job: NotificationJob) {
        self.jobs.lock().await.insert(job.id, job);
    }

    /// Apply `f` to a job currently in `processing`.
    async fn finish<F>(&self, id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut NotificationJob),
    {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                f(job);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn fetch_eligible(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NotificationJob>, AppError> {
        let jobs = self.jobs.lock().await;
        let mut eligible: Vec<NotificationJob> = jobs
            .values()
            .filter(|j| j.is_eligible(now))
            .cloned()
            .collect();
        eligible.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        eligible.truncate(limit.max(0) as usize);
        Ok(eligible)
    }

    async fn claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationJob>, AppError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending && job.attempts < job.max_attempts => {
                job.status = JobStatus::Processing;
                job.attempts += 1;
                job.last_attempt_at = Some(now);
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        provider_message_id: Option<&str>,
    ) -> Result<bool, AppError> {
        Ok(self
            .finish(id, |job| {
                job.status = JobStatus::Sent;
                job.sent_at = Some(now);
                job.provider_message_id = provider_message_id.map(str::to_string);
                job.error_message = None;
            })
            .await)
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        process_after: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, AppError> {
        Ok(self
            .finish(id, |job| {
                job.status = JobStatus::Pending;
                job.process_after = job.process_after.max(process_after);
                job.error_message = Some(error.to_string());
            })
            .await)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool, AppError> {
        Ok(self
            .finish(id, |job| {
                job.status = JobStatus::Failed;
                job.error_message = Some(error.to_string());
            })
            .await)
    }

    async fn insert(&self, job: &NotificationJob) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(AppError::Validation(format!("Job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn cancel_pending(&self, reference_id: &str) -> Result<u64, AppError> {
        let mut jobs = self.jobs.lock().await;
        let mut cancelled = 0;
        for job in jobs.values_mut() {
            if job.status == JobStatus::Pending && job.reference_id.as_deref() == Some(reference_id)
            {
                job.status = JobStatus::Cancelled;
                job.error_message = Some(CANCELLED_REASON.to_string());
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn history(&self, reference_id: &str) -> Result<Vec<NotificationJob>, AppError> {
        let jobs = self.jobs.lock().await;
        let mut matching: Vec<NotificationJob> = jobs
            .values()
            .filter(|j| j.reference_id.as_deref() == Some(reference_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<StaleClaims, AppError> {
        let mut jobs = self.jobs.lock().await;
        let mut outcome = StaleClaims::default();
        for job in jobs.values_mut() {
            let stale = job.status == JobStatus::Processing
                && job.last_attempt_at.is_some_and(|at| at < cutoff);
            if !stale {
                continue;
            }
            job.error_message = Some(CLAIM_TIMEOUT_REASON.to_string());
            if job.attempts >= job.max_attempts {
                job.status = JobStatus::Failed;
                outcome.failed += 1;
            } else {
                job.status = JobStatus::Pending;
                outcome.released += 1;
            }
        }
        Ok(outcome)
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationJob>, AppError> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }
}
