//! Job persistence.
//!
//! [`JobStore`] is the narrow read/update contract the pipeline needs from the
//! record store. Every state transition is a single conditional statement, so
//! correctness under concurrent runners rests on the store, not on any
//! in-process locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{JobStatus, NotificationJob};

/// Error text recorded on jobs removed by a producer.
pub const CANCELLED_REASON: &str = "cancelled";

/// Error text recorded on orphaned claims returned by the sweep.
pub const CLAIM_TIMEOUT_REASON: &str = "claim timed out";

/// Outcome of an orphaned-claim sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleClaims {
    /// Returned to `pending` for another attempt.
    pub released: u64,
    /// Out of attempts, moved to `failed`.
    pub failed: u64,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Pending jobs due at `now` with attempts left, most urgent first.
    async fn fetch_eligible(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NotificationJob>, AppError>;

    /// Atomically move a job `pending → processing`, stamping `last_attempt_at`
    /// and incrementing `attempts`. `None` means another runner won the claim.
    async fn claim(&self, id: Uuid, now: DateTime<Utc>)
    -> Result<Option<NotificationJob>, AppError>;

    /// `processing → sent`. Returns false if the job was no longer claimed.
    async fn mark_sent(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        provider_message_id: Option<&str>,
    ) -> Result<bool, AppError>;

    /// `processing → pending` with `process_after` advanced (never moved back).
    async fn schedule_retry(
        &self,
        id: Uuid,
        process_after: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, AppError>;

    /// `processing → failed`.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool, AppError>;

    async fn insert(&self, job: &NotificationJob) -> Result<(), AppError>;

    /// Cancel every still-pending job for a producer reference.
    async fn cancel_pending(&self, reference_id: &str) -> Result<u64, AppError>;

    /// All jobs for a producer reference, newest first.
    async fn history(&self, reference_id: &str) -> Result<Vec<NotificationJob>, AppError>;

    /// Return `processing` jobs last claimed before `cutoff` to the queue.
    async fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<StaleClaims, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<NotificationJob>, AppError>;
}

/// Postgres-backed store over `notification_queue`, mirroring terminal states
/// onto the parent `notifications` row.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn fetch_eligible(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NotificationJob>, AppError> {
        let jobs: Vec<NotificationJob> = sqlx::query_as(
            r#"
            SELECT * FROM notification_queue
            WHERE status = 'pending'
              AND process_after <= $1
              AND attempts < max_attempts
            ORDER BY priority ASC, created_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationJob>, AppError> {
        let job: Option<NotificationJob> = sqlx::query_as(
            r#"
            UPDATE notification_queue
            SET status = 'processing',
                attempts = attempts + 1,
                last_attempt_at = $2
            WHERE id = $1
              AND status = 'pending'
              AND attempts < max_attempts
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        provider_message_id: Option<&str>,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Option<Uuid>,)> = sqlx::query_as(
            r#"
            UPDATE notification_queue
            SET status = 'sent', sent_at = $2, provider_message_id = $3, error_message = NULL
            WHERE id = $1 AND status = 'processing'
            RETURNING notification_id
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(provider_message_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((notification_id,)) = row else {
            tx.rollback().await?;
            return Ok(false);
        };

        if let Some(notification_id) = notification_id {
            sqlx::query(
                r#"
                UPDATE notifications
                SET status = 'sent', sent_at = $2, provider_message_id = $3, error_message = NULL
                WHERE id = $1
                "#,
            )
            .bind(notification_id)
            .bind(now)
            .bind(provider_message_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        process_after: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = 'pending',
                process_after = GREATEST(process_after, $2),
                error_message = $3
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(process_after)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Option<Uuid>,)> = sqlx::query_as(
            r#"
            UPDATE notification_queue
            SET status = 'failed', error_message = $2
            WHERE id = $1 AND status = 'processing'
            RETURNING notification_id
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((notification_id,)) = row else {
            tx.rollback().await?;
            return Ok(false);
        };

        if let Some(notification_id) = notification_id {
            sqlx::query("UPDATE notifications SET status = 'failed', error_message = $2 WHERE id = $1")
                .bind(notification_id)
                .bind(error)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn insert(&self, job: &NotificationJob) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        if let Some(notification_id) = job.notification_id {
            sqlx::query(
                r#"
                INSERT INTO notifications
                    (id, reference_id, notification_type, channel, recipient, recipient_name,
                     subject, body, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9)
                "#,
            )
            .bind(notification_id)
            .bind(&job.reference_id)
            .bind(&job.notification_type)
            .bind(&job.channel)
            .bind(&job.recipient)
            .bind(&job.recipient_name)
            .bind(&job.subject)
            .bind(&job.body)
            .bind(job.created_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO notification_queue
                (id, notification_id, reference_id, channel, recipient, recipient_name, subject,
                 body, notification_type, data, priority, status, attempts, max_attempts,
                 process_after, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'pending', 0, $12, $13, $14)
            "#,
        )
        .bind(job.id)
        .bind(job.notification_id)
        .bind(&job.reference_id)
        .bind(&job.channel)
        .bind(&job.recipient)
        .bind(&job.recipient_name)
        .bind(&job.subject)
        .bind(&job.body)
        .bind(&job.notification_type)
        .bind(&job.data)
        .bind(job.priority)
        .bind(job.max_attempts)
        .bind(job.process_after)
        .bind(job.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn cancel_pending(&self, reference_id: &str) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(Option<Uuid>,)> = sqlx::query_as(
            r#"
            UPDATE notification_queue
            SET status = 'cancelled', error_message = $2
            WHERE reference_id = $1 AND status = 'pending'
            RETURNING notification_id
            "#,
        )
        .bind(reference_id)
        .bind(CANCELLED_REASON)
        .fetch_all(&mut *tx)
        .await?;

        let parents: Vec<Uuid> = rows.iter().filter_map(|(id,)| *id).collect();
        if !parents.is_empty() {
            sqlx::query(
                "UPDATE notifications SET status = 'failed', error_message = $2 WHERE id = ANY($1)",
            )
            .bind(&parents)
            .bind(CANCELLED_REASON)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn history(&self, reference_id: &str) -> Result<Vec<NotificationJob>, AppError> {
        let jobs: Vec<NotificationJob> = sqlx::query_as(
            "SELECT * FROM notification_queue WHERE reference_id = $1 ORDER BY created_at DESC",
        )
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<StaleClaims, AppError> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(JobStatus, Option<Uuid>)> = sqlx::query_as(
            r#"
            UPDATE notification_queue
            SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                error_message = $2
            WHERE status = 'processing' AND last_attempt_at < $1
            RETURNING status, notification_id
            "#,
        )
        .bind(cutoff)
        .bind(CLAIM_TIMEOUT_REASON)
        .fetch_all(&mut *tx)
        .await?;

        let failed_parents: Vec<Uuid> = rows
            .iter()
            .filter(|(status, _)| *status == JobStatus::Failed)
            .filter_map(|(_, id)| *id)
            .collect();
        if !failed_parents.is_empty() {
            sqlx::query(
                "UPDATE notifications SET status = 'failed', error_message = $2 WHERE id = ANY($1)",
            )
            .bind(&failed_parents)
            .bind(CLAIM_TIMEOUT_REASON)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let failed = rows
            .iter()
            .filter(|(status, _)| *status == JobStatus::Failed)
            .count() as u64;
        Ok(StaleClaims {
            released: rows.len() as u64 - failed,
            failed,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationJob>, AppError> {
        let job: Option<NotificationJob> =
            sqlx::query_as("SELECT * FROM notification_queue WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(job)
    }
}
