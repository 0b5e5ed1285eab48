//! Alert evaluation: read current metric values and compare them with each
//! definition's thresholds.
//!
//! Metric collection lives elsewhere; this module only consumes the latest
//! value through a [`MetricSource`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;

use courier_common::error::AppError;
use courier_common::types::{AlertDefinition, AlertEvaluationResult, AlertLevel};

use crate::definitions::level_for;

/// Samples older than this are ignored by [`PgMetricSource`].
pub const METRIC_FRESHNESS_MINUTES: i64 = 15;

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Latest value of `metric`, or `None` when there is no recent sample.
    async fn current_value(&self, metric: &str) -> Result<Option<f64>, AppError>;
}

/// Reads the newest sample per metric from `metric_samples`, ignoring samples
/// older than the freshness window.
#[derive(Debug, Clone)]
pub struct PgMetricSource {
    pool: PgPool,
    freshness: Duration,
}

impl PgMetricSource {
    pub fn new(pool: PgPool, freshness: Duration) -> Self {
        Self { pool, freshness }
    }
}

#[async_trait]
impl MetricSource for PgMetricSource {
    async fn current_value(&self, metric: &str) -> Result<Option<f64>, AppError> {
        let row: Option<(f64,)> = sqlx::query_as(
            r#"
            SELECT value FROM metric_samples
            WHERE metric = $1 AND recorded_at >= $2
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(metric)
        .bind(Utc::now() - self.freshness)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value,)| value))
    }
}

/// In-process metric values, set directly by the caller.
#[derive(Debug, Default)]
pub struct StaticMetricSource {
    values: RwLock<HashMap<String, f64>>,
}

impl StaticMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, metric: &str, value: f64) {
        self.values.write().await.insert(metric.to_string(), value);
    }

    pub async fn clear(&self, metric: &str) {
        self.values.write().await.remove(metric);
    }
}

#[async_trait]
impl MetricSource for StaticMetricSource {
    async fn current_value(&self, metric: &str) -> Result<Option<f64>, AppError> {
        Ok(self.values.read().await.get(metric).copied())
    }
}

pub struct AlertEvaluator {
    definitions: Vec<AlertDefinition>,
    source: Arc<dyn MetricSource>,
}

impl AlertEvaluator {
    pub fn new(definitions: Vec<AlertDefinition>, source: Arc<dyn MetricSource>) -> Self {
        Self {
            definitions,
            source,
        }
    }

    pub fn definitions(&self) -> &[AlertDefinition] {
        &self.definitions
    }

    /// Evaluate every definition and return the triggered ones (WARNING or
    /// CRITICAL). A metric that cannot be read is logged and skipped.
    pub async fn evaluate(&self) -> Vec<AlertEvaluationResult> {
        let mut triggered = Vec::new();

        for definition in &self.definitions {
            let value = match self.source.current_value(&definition.metric).await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    tracing::debug!(alert_id = %definition.id, "No recent sample, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        alert_id = %definition.id,
                        metric = %definition.metric,
                        error = %e,
                        "Failed to read metric"
                    );
                    continue;
                }
            };

            if let Some(result) = Self::evaluate_value(definition, value) {
                tracing::warn!(
                    alert_id = %definition.id,
                    level = %result.level,
                    value,
                    unit = %definition.unit,
                    "Alert triggered"
                );
                triggered.push(result);
            }
        }

        triggered
    }

    /// Result for a single reading, or `None` when the value is healthy.
    pub fn evaluate_value(definition: &AlertDefinition, value: f64) -> Option<AlertEvaluationResult> {
        let level = level_for(definition, value);
        let (threshold, action) = match level {
            AlertLevel::Info => return None,
            AlertLevel::Warning => (definition.warning_threshold, &definition.warning_action),
            AlertLevel::Critical => (definition.critical_threshold, &definition.critical_action),
        };
        let comparison = if definition.higher_is_bad { ">=" } else { "<=" };

        Some(AlertEvaluationResult {
            alert: definition.clone(),
            level,
            current_value: value,
            message: format!(
                "{}: {:.1}{} ({} {} threshold {}{})",
                definition.name,
                value,
                definition.unit,
                comparison,
                level.as_str().to_lowercase(),
                threshold,
                definition.unit
            ),
            action: action.clone(),
        })
    }
}
