//! Producer side of the queue: enqueue, cancel and inspect jobs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Channel, JobStatus, NewJob, NotificationJob};

use crate::store::JobStore;

/// Priority applied when a producer does not set one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Materialize a [`NewJob`] into a pending queue row.
pub fn build_job(new: NewJob, default_max_attempts: i32, now: DateTime<Utc>) -> NotificationJob {
    NotificationJob {
        id: Uuid::new_v4(),
        notification_id: Some(Uuid::new_v4()),
        reference_id: new.reference_id,
        channel: new.channel.trim().to_lowercase(),
        recipient: new.recipient.trim().to_string(),
        recipient_name: new.recipient_name,
        subject: new.subject,
        body: new.body,
        notification_type: new.notification_type,
        data: new.data.unwrap_or_else(|| serde_json::json!({})),
        priority: new.priority.unwrap_or(DEFAULT_PRIORITY),
        status: JobStatus::Pending,
        attempts: 0,
        max_attempts: new.max_attempts.unwrap_or(default_max_attempts),
        process_after: new.process_after.unwrap_or(now),
        last_attempt_at: None,
        created_at: now,
        sent_at: None,
        error_message: None,
        provider_message_id: None,
    }
}

pub struct Producer {
    store: Arc<dyn JobStore>,
    default_max_attempts: i32,
}

impl Producer {
    pub fn new(store: Arc<dyn JobStore>, default_max_attempts: i32) -> Self {
        Self {
            store,
            default_max_attempts,
        }
    }

    /// Validate and insert a job as `pending` with zero attempts.
    pub async fn enqueue(&self, new: NewJob) -> Result<NotificationJob, AppError> {
        validate(&new)?;
        let job = build_job(new, self.default_max_attempts, Utc::now());
        self.store.insert(&job).await?;

        tracing::info!(
            job_id = %job.id,
            channel = %job.channel,
            notification_type = %job.notification_type,
            priority = job.priority,
            reference_id = ?job.reference_id,
            "Notification queued"
        );

        Ok(job)
    }

    /// Cancel every pending job for a reference (e.g. a cancelled reservation).
    pub async fn cancel_pending(&self, reference_id: &str) -> Result<u64, AppError> {
        let cancelled = self.store.cancel_pending(reference_id).await?;
        if cancelled > 0 {
            tracing::info!(reference_id, cancelled, "Pending notifications cancelled");
        }
        Ok(cancelled)
    }

    /// Every job recorded for a reference, or `NotFound` when there are none.
    pub async fn history(&self, reference_id: &str) -> Result<Vec<NotificationJob>, AppError> {
        let jobs = self.store.history(reference_id).await?;
        if jobs.is_empty() {
            return Err(AppError::NotFound(format!(
                "No notifications for reference '{}'",
                reference_id
            )));
        }
        Ok(jobs)
    }
}

fn validate(new: &NewJob) -> Result<(), AppError> {
    new.channel
        .parse::<Channel>()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    if new.recipient.trim().is_empty() {
        return Err(AppError::Validation("recipient is required".to_string()));
    }
    if new.body.trim().is_empty() {
        return Err(AppError::Validation("body is required".to_string()));
    }
    if new.notification_type.trim().is_empty() {
        return Err(AppError::Validation(
            "notification_type is required".to_string(),
        ));
    }
    if new.max_attempts.is_some_and(|m| m < 1) {
        return Err(AppError::Validation(
            "max_attempts must be at least 1".to_string(),
        ));
    }
    Ok(())
}
