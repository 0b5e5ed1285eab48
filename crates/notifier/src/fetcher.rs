use std::sync::Arc;

use chrono::{DateTime, Utc};

use courier_common::error::AppError;
use courier_common::types::NotificationJob;

use crate::store::JobStore;

/// Selects the next batch of deliverable jobs.
#[derive(Clone)]
pub struct QueueFetcher {
    store: Arc<dyn JobStore>,
    batch_size: u32,
}

impl QueueFetcher {
    pub fn new(store: Arc<dyn JobStore>, batch_size: u32) -> Self {
        Self { store, batch_size }
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Up to `batch_size` pending jobs due at `now`, ordered by priority then
    /// creation time. An empty queue is an empty batch.
    pub async fn fetch(&self, now: DateTime<Utc>) -> Result<Vec<NotificationJob>, AppError> {
        let jobs = self
            .store
            .fetch_eligible(now, i64::from(self.batch_size))
            .await?;
        tracing::debug!(count = jobs.len(), limit = self.batch_size, "Fetched eligible jobs");
        Ok(jobs)
    }
}
