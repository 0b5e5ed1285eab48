//! Dispatcher: claim a job, deliver it through its channel provider and record
//! the result.
//!
//! Each attempt persists exactly two transitions: the claim
//! (`pending → processing`) and one final transition (`sent`, back to
//! `pending` for a retry, or `failed`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use courier_common::error::AppError;
use courier_common::types::NotificationJob;

use crate::backoff::BackoffPolicy;
use crate::providers::{ProviderRegistry, SendRequest};
use crate::store::JobStore;

/// Why a job ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Retrying cannot help (unknown channel, missing credentials, bad recipient,
    /// provider rejection).
    NonRetryable,
    /// The failure was transient but the attempt budget is spent.
    RetriesExhausted,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NonRetryable => "non_retryable",
            FailureReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// Result of processing one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent {
        message_id: Option<String>,
    },
    Retried {
        next_attempt_at: DateTime<Utc>,
        error: String,
    },
    Failed {
        reason: FailureReason,
        error: String,
    },
    /// The claim was lost to a concurrent runner; nothing was sent.
    Skipped,
}

impl DispatchOutcome {
    pub fn error(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Retried { error, .. } | DispatchOutcome::Failed { error, .. } => {
                Some(error)
            }
            _ => None,
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    providers: Arc<ProviderRegistry>,
    backoff: BackoffPolicy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        providers: Arc<ProviderRegistry>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            providers,
            backoff,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Process a single job at `now`.
    ///
    /// Delivery failures are outcomes, not errors; `Err` is only returned when
    /// the store itself fails.
    pub async fn process(
        &self,
        job: &NotificationJob,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, AppError> {
        let Some(claimed) = self.store.claim(job.id, now).await? else {
            tracing::debug!(job_id = %job.id, "Job already claimed by another runner");
            return Ok(DispatchOutcome::Skipped);
        };

        let Some(provider) = self.providers.resolve(&claimed.channel) else {
            let error = format!("Unknown channel: {}", claimed.channel);
            return self
                .fail(&claimed, FailureReason::NonRetryable, error)
                .await;
        };

        let request = SendRequest::from(&claimed);
        match provider.send(&request).await {
            Ok(receipt) => {
                let recorded = self
                    .store
                    .mark_sent(claimed.id, now, receipt.message_id.as_deref())
                    .await?;
                if !recorded {
                    tracing::warn!(job_id = %claimed.id, "Delivered job was no longer claimed");
                }
                tracing::info!(
                    job_id = %claimed.id,
                    channel = %claimed.channel,
                    attempts = claimed.attempts,
                    message_id = ?receipt.message_id,
                    "Notification sent"
                );
                Ok(DispatchOutcome::Sent {
                    message_id: receipt.message_id,
                })
            }
            Err(e) if !e.is_retryable() => {
                self.fail(&claimed, FailureReason::NonRetryable, e.to_string())
                    .await
            }
            Err(e) if !self.backoff.should_retry(claimed.attempts, claimed.max_attempts) => {
                self.fail(&claimed, FailureReason::RetriesExhausted, e.to_string())
                    .await
            }
            Err(e) => {
                let error = e.to_string();
                let next_attempt_at =
                    self.backoff
                        .next_attempt_at(claimed.attempts, now, claimed.process_after);
                let recorded = self
                    .store
                    .schedule_retry(claimed.id, next_attempt_at, &error)
                    .await?;
                if !recorded {
                    tracing::warn!(job_id = %claimed.id, "Retried job was no longer claimed");
                }
                tracing::warn!(
                    job_id = %claimed.id,
                    channel = %claimed.channel,
                    attempts = claimed.attempts,
                    max_attempts = claimed.max_attempts,
                    next_attempt_at = %next_attempt_at,
                    error = %error,
                    "Delivery failed, retry scheduled"
                );
                Ok(DispatchOutcome::Retried {
                    next_attempt_at,
                    error,
                })
            }
        }
    }

    async fn fail(
        &self,
        job: &NotificationJob,
        reason: FailureReason,
        error: String,
    ) -> Result<DispatchOutcome, AppError> {
        let recorded = self.store.mark_failed(job.id, &error).await?;
        if !recorded {
            tracing::warn!(job_id = %job.id, "Failed job was no longer claimed");
        }
        tracing::error!(
            job_id = %job.id,
            channel = %job.channel,
            attempts = job.attempts,
            reason = reason.as_str(),
            error = %error,
            "Delivery failed permanently"
        );
        Ok(DispatchOutcome::Failed { reason, error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use courier_common::types::{Channel, JobStatus, NewJob};

    use crate::memory::MemoryJobStore;
    use crate::producer::build_job;
    use crate::providers::{ChannelProvider, ProviderError, SendReceipt};

    struct Scripted {
        channel: Channel,
        result: Result<SendReceipt, ProviderError>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(channel: Channel, result: Result<SendReceipt, ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                channel,
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChannelProvider for Scripted {
        fn channel(&self) -> Channel {
            self.channel
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn send(&self, _request: &SendRequest) -> Result<SendReceipt, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    async fn setup(
        provider: Arc<Scripted>,
        channel: &str,
        max_attempts: i32,
    ) -> (Dispatcher, Arc<MemoryJobStore>, NotificationJob, DateTime<Utc>) {
        let now = Utc::now();
        let store = Arc::new(MemoryJobStore::new());
        let job = build_job(
            NewJob::new(channel, "recipient", "test", "body"),
            max_attempts,
            now,
        );
        store.insert(&job).await.unwrap();

        let mut registry = ProviderRegistry::new();
        registry.register_arc(provider);
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(registry), BackoffPolicy::default());
        (dispatcher, store, job, now)
    }

    #[tokio::test]
    async fn test_success_marks_sent() {
        let provider = Scripted::new(Channel::Email, Ok(SendReceipt::with_id("m-1")));
        let (dispatcher, store, job, now) = setup(provider, "email", 3).await;

        let outcome = dispatcher.process(&job, now).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Sent {
                message_id: Some("m-1".into())
            }
        );

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Sent);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.sent_at, Some(now));
        assert_eq!(stored.provider_message_id.as_deref(), Some("m-1"));
    }

    #[tokio::test]
    async fn test_transient_failure_schedules_retry() {
        let provider = Scripted::new(
            Channel::Telegram,
            Err(ProviderError::Transient("timeout".into())),
        );
        let (dispatcher, store, job, now) = setup(provider, "telegram", 3).await;

        let outcome = dispatcher.process(&job, now).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Retried { .. }));

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.process_after, now + Duration::minutes(2));
        assert!(stored.process_after > job.process_after);
        assert!(stored.error_message.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_non_retryable_fails_on_first_attempt() {
        let provider = Scripted::new(
            Channel::Email,
            Err(ProviderError::InvalidRecipient("no such mailbox".into())),
        );
        let (dispatcher, store, job, now) = setup(provider, "email", 3).await;

        let outcome = dispatcher.process(&job, now).await.unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed {
                reason: FailureReason::NonRetryable,
                ..
            }
        ));
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_last_attempt_fails_as_exhausted() {
        let provider = Scripted::new(
            Channel::Push,
            Err(ProviderError::RateLimited("slow down".into())),
        );
        let (dispatcher, store, job, now) = setup(provider, "push", 1).await;

        let outcome = dispatcher.process(&job, now).await.unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed {
                reason: FailureReason::RetriesExhausted,
                ..
            }
        ));
        assert_eq!(
            store.get(job.id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_unknown_channel_fails_without_calling_providers() {
        let provider = Scripted::new(Channel::Email, Ok(SendReceipt::default()));
        let (dispatcher, store, job, now) = setup(provider.clone(), "fax", 3).await;

        let outcome = dispatcher.process(&job, now).await.unwrap();
        assert_eq!(outcome.error(), Some("Unknown channel: fax"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_lost_claim_is_skipped() {
        let provider = Scripted::new(Channel::Email, Ok(SendReceipt::default()));
        let (dispatcher, store, job, now) = setup(provider.clone(), "email", 3).await;
        store.claim(job.id, now).await.unwrap();

        let outcome = dispatcher.process(&job, now).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
