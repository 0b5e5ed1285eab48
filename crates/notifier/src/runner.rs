//! Notification runner: one pass of sweep → fetch → dispatch.
//!
//! A run is invoked by the scheduler or the trigger endpoint. Jobs within the
//! batch are dispatched concurrently up to a fixed width; a failing job never
//! aborts the batch, only a failing fetch does.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use serde::Serialize;
use uuid::Uuid;

use courier_common::config::AppConfig;
use courier_common::error::AppError;
use courier_common::types::NotificationJob;

use crate::backoff::BackoffPolicy;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::fetcher::QueueFetcher;
use crate::providers::ProviderRegistry;
use crate::store::JobStore;

/// A job that did not end the run as sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobError {
    pub id: Uuid,
    pub channel: String,
    pub error: String,
}

/// Aggregate result of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub processed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Orphaned claims returned to the queue by the sweep.
    pub released: u64,
    /// Orphaned claims the sweep failed because they had no attempts left.
    pub timed_out: u64,
    pub errors: Vec<JobError>,
}

impl RunReport {
    fn record(&mut self, job: &NotificationJob, result: Result<DispatchOutcome, AppError>) {
        let error = match result {
            Ok(DispatchOutcome::Sent { .. }) => {
                self.sent += 1;
                None
            }
            Ok(DispatchOutcome::Skipped) => {
                self.skipped += 1;
                None
            }
            Ok(DispatchOutcome::Retried { error, .. }) => {
                self.retried += 1;
                Some(error)
            }
            Ok(DispatchOutcome::Failed { error, .. }) => {
                self.failed += 1;
                Some(error)
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Store error while dispatching job");
                Some(e.to_string())
            }
        };

        if let Some(error) = error {
            self.errors.push(JobError {
                id: job.id,
                channel: job.channel.clone(),
                error,
            });
        }
    }
}

pub struct NotificationRunner {
    fetcher: QueueFetcher,
    dispatcher: Arc<Dispatcher>,
    concurrency: usize,
    claim_timeout: Duration,
}

impl NotificationRunner {
    pub fn new(
        fetcher: QueueFetcher,
        dispatcher: Arc<Dispatcher>,
        concurrency: usize,
        claim_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            dispatcher,
            concurrency: concurrency.max(1),
            claim_timeout,
        }
    }

    /// Wire a runner and its dispatcher from configuration.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn JobStore>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            providers,
            BackoffPolicy::from_config(config),
        ));
        Self::new(
            QueueFetcher::new(store, config.queue_batch_size),
            dispatcher,
            config.worker_concurrency,
            config.claim_timeout(),
        )
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn run(&self) -> Result<RunReport, AppError> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport, AppError> {
        let mut report = RunReport::default();

        match self
            .dispatcher
            .store()
            .release_stale_claims(now - self.claim_timeout)
            .await
        {
            Ok(swept) => {
                report.released = swept.released;
                report.timed_out = swept.failed;
                if swept.released > 0 || swept.failed > 0 {
                    tracing::warn!(
                        released = swept.released,
                        failed = swept.failed,
                        "Recovered orphaned claims"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "Claim sweep failed, continuing"),
        }

        let jobs = self.fetcher.fetch(now).await.map_err(|e| {
            tracing::error!(error = %e, "Queue fetch failed, aborting run");
            e
        })?;
        report.processed = jobs.len();
        if jobs.is_empty() {
            return Ok(report);
        }

        let dispatcher = &self.dispatcher;
        let results: Vec<(NotificationJob, Result<DispatchOutcome, AppError>)> =
            futures::stream::iter(jobs)
                .map(|job| async move {
                    let result = dispatcher.process(&job, now).await;
                    (job, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        for (job, result) in results {
            report.record(&job, result);
        }

        tracing::info!(
            processed = report.processed,
            sent = report.sent,
            retried = report.retried,
            failed = report.failed,
            skipped = report.skipped,
            released = report.released,
            timed_out = report.timed_out,
            "Notification run complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use courier_common::types::{Channel, JobStatus, NewJob};

    use crate::memory::MemoryJobStore;
    use crate::producer::build_job;
    use crate::providers::{ChannelProvider, ProviderError, SendReceipt, SendRequest};

    /// Succeeds unless the body says "fail".
    struct ByBody {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ChannelProvider for ByBody {
        fn channel(&self) -> Channel {
            Channel::Sms
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn send(&self, request: &SendRequest) -> Result<SendReceipt, ProviderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if request.body == "fail" {
                Err(ProviderError::Transient("carrier down".into()))
            } else {
                Ok(SendReceipt::with_id("sid"))
            }
        }
    }

    fn runner(
        store: Arc<MemoryJobStore>,
        provider: Arc<ByBody>,
        concurrency: usize,
    ) -> NotificationRunner {
        let mut registry = ProviderRegistry::new();
        registry.register_arc(provider);
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            Arc::new(registry),
            BackoffPolicy::default(),
        ));
        NotificationRunner::new(
            QueueFetcher::new(store, 50),
            dispatcher,
            concurrency,
            Duration::minutes(15),
        )
    }

    fn provider() -> Arc<ByBody> {
        Arc::new(ByBody {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_batch() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        for body in ["ok", "fail", "ok"] {
            let job = build_job(NewJob::new("sms", "+1555", "otp", body), 3, now);
            store.insert(&job).await.unwrap();
        }
        let unknown = build_job(NewJob::new("pager", "42", "otp", "ok"), 3, now);
        store.insert(&unknown).await.unwrap();

        let report = runner(store, provider(), 4).run_at(now).await.unwrap();
        assert_eq!(report.processed, 4);
        assert_eq!(report.sent, 2);
        assert_eq!(report.retried, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors.len(), 2);
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.id == unknown.id && e.channel == "pager")
        );
    }

    #[tokio::test]
    async fn test_fan_out_is_bounded() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        for _ in 0..12 {
            let job = build_job(NewJob::new("sms", "+1555", "otp", "ok"), 3, now);
            store.insert(&job).await.unwrap();
        }
        let provider = provider();

        let report = runner(store, provider.clone(), 3).run_at(now).await.unwrap();
        assert_eq!(report.sent, 12);
        assert!(provider.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_sweep_releases_orphans_before_fetch() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let job = build_job(NewJob::new("sms", "+1555", "otp", "ok"), 3, now);
        store.insert(&job).await.unwrap();
        store.claim(job.id, now - Duration::hours(1)).await.unwrap();

        let report = runner(store.clone(), provider(), 2).run_at(now).await.unwrap();
        assert_eq!(report.released, 1);
        assert_eq!(report.sent, 1);

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Sent);
        assert_eq!(stored.attempts, 2);
    }

    #[tokio::test]
    async fn test_sweep_counts_exhausted_orphans() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let job = build_job(NewJob::new("sms", "+1555", "otp", "ok"), 1, now);
        store.insert(&job).await.unwrap();
        store.claim(job.id, now - Duration::hours(1)).await.unwrap();

        let report = runner(store.clone(), provider(), 2).run_at(now).await.unwrap();
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.released, 0);
        assert_eq!(report.processed, 0);

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_empty_queue_is_not_an_error() {
        let store = Arc::new(MemoryJobStore::new());
        let report = runner(store, provider(), 2).run().await.unwrap();
        assert_eq!(report, RunReport::default());
    }
}
