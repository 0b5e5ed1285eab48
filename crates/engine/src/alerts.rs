//! Alert runner: evaluate, filter through the cooldown tracker, and deliver
//! the survivors through the notification dispatcher.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::Serialize;
use sqlx::PgPool;

use courier_common::config::{AlertTargets, AppConfig};
use courier_common::types::{AlertEvaluationResult, AlertLevel, Channel, NewJob};
use courier_notifier::dispatcher::{DispatchOutcome, Dispatcher};
use courier_notifier::producer::build_job;

use crate::cooldown::{CooldownDecision, CooldownTracker, RedisCooldownStore};
use crate::definitions::default_alerts;
use crate::evaluator::{AlertEvaluator, METRIC_FRESHNESS_MINUTES, PgMetricSource};

/// Notification type stamped on alert jobs.
pub const ALERT_NOTIFICATION_TYPE: &str = "system_alert";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSummary {
    pub id: String,
    pub name: String,
    pub level: AlertLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertReport {
    pub status: HealthStatus,
    pub triggered_count: usize,
    pub notifications_sent: usize,
    /// Alerts suppressed by the cooldown window.
    pub notifications_skipped: usize,
    pub notifications_failed: usize,
    /// Jobs that failed transiently and stay queued for the notification runner.
    pub notifications_retrying: usize,
    pub alerts: Vec<AlertSummary>,
    #[serde(rename = "duration_ms")]
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

fn health_status(results: &[AlertEvaluationResult]) -> HealthStatus {
    if results.is_empty() {
        HealthStatus::Healthy
    } else if results.iter().any(|r| r.level == AlertLevel::Critical) {
        HealthStatus::Critical
    } else {
        HealthStatus::Warning
    }
}

/// Delivery priority for an alert level; critical alerts jump the queue.
pub fn priority_for(level: AlertLevel) -> i32 {
    match level {
        AlertLevel::Critical => 1,
        AlertLevel::Warning => 3,
        AlertLevel::Info => 5,
    }
}

pub struct AlertRunner {
    evaluator: AlertEvaluator,
    cooldown: CooldownTracker,
    dispatcher: Arc<Dispatcher>,
    targets: AlertTargets,
    max_attempts: i32,
}

impl AlertRunner {
    pub fn new(
        evaluator: AlertEvaluator,
        cooldown: CooldownTracker,
        dispatcher: Arc<Dispatcher>,
        targets: AlertTargets,
        max_attempts: i32,
    ) -> Self {
        Self {
            evaluator,
            cooldown,
            dispatcher,
            targets,
            max_attempts,
        }
    }

    /// Default catalogue over Postgres metrics and the Redis cooldown cache.
    pub fn from_config(
        config: &AppConfig,
        pool: PgPool,
        redis: Option<ConnectionManager>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let source = PgMetricSource::new(pool, chrono::Duration::minutes(METRIC_FRESHNESS_MINUTES));
        let cooldown = CooldownTracker::new(
            Arc::new(RedisCooldownStore::new(redis)),
            config.cooldown_window(),
            config.cooldown_ttl(),
        );

        Self::new(
            AlertEvaluator::new(default_alerts(), Arc::new(source)),
            cooldown,
            dispatcher,
            config.alert_targets.clone(),
            config.default_max_attempts,
        )
    }

    /// One job per configured alert target.
    pub fn jobs_for(&self, result: &AlertEvaluationResult) -> Vec<NewJob> {
        let targets = [
            (Channel::Telegram, &self.targets.telegram_chat_id),
            (Channel::Email, &self.targets.email),
            (Channel::Push, &self.targets.push_token),
        ];
        let subject = format!("[{}] {}", result.level, result.alert.name);
        let body = format!("{}\n\n{}", result.message, result.action.trim());

        targets
            .into_iter()
            .filter_map(|(channel, target)| {
                let recipient = target.as_deref()?;
                Some(
                    NewJob::new(channel.as_str(), recipient, ALERT_NOTIFICATION_TYPE, body.clone())
                        .with_subject(subject.clone())
                        .with_priority(priority_for(result.level))
                        .with_max_attempts(self.max_attempts)
                        .with_reference(format!("alert:{}", result.alert.id))
                        .with_data(serde_json::json!({
                            "alert_id": result.alert.id,
                            "level": result.level,
                            "value": result.current_value,
                            "unit": result.alert.unit,
                        })),
                )
            })
            .collect()
    }

    pub async fn run(&self) -> AlertReport {
        self.run_at(Utc::now()).await
    }

    /// Evaluate alerts and notify at `now`. Never fails: evaluation, cooldown
    /// and delivery problems are logged and reflected in the counts.
    pub async fn run_at(&self, now: DateTime<Utc>) -> AlertReport {
        let started = Instant::now();
        let results = self.evaluator.evaluate().await;

        let mut report = AlertReport {
            status: health_status(&results),
            triggered_count: results.len(),
            notifications_sent: 0,
            notifications_skipped: 0,
            notifications_failed: 0,
            notifications_retrying: 0,
            alerts: Vec::with_capacity(results.len()),
            duration_ms: 0,
            timestamp: now,
        };

        for result in &results {
            report.alerts.push(AlertSummary {
                id: result.alert.id.clone(),
                name: result.alert.name.clone(),
                level: result.level,
                message: result.message.clone(),
            });

            let decision = self.cooldown.check(&result.alert.id, result.level, now).await;
            if let CooldownDecision::Suppressed { .. } = decision {
                report.notifications_skipped += 1;
                continue;
            }

            let jobs = self.jobs_for(result);
            if jobs.is_empty() {
                tracing::warn!(alert_id = %result.alert.id, "No alert targets configured");
                continue;
            }

            let mut enqueued = 0;
            for new in jobs {
                let job = build_job(new, self.max_attempts, now);
                if let Err(e) = self.dispatcher.store().insert(&job).await {
                    tracing::error!(alert_id = %result.alert.id, error = %e, "Failed to enqueue alert");
                    report.notifications_failed += 1;
                    continue;
                }
                enqueued += 1;

                match self.dispatcher.process(&job, now).await {
                    Ok(DispatchOutcome::Sent { .. }) => report.notifications_sent += 1,
                    Ok(DispatchOutcome::Retried { .. }) | Ok(DispatchOutcome::Skipped) => {
                        report.notifications_retrying += 1
                    }
                    Ok(DispatchOutcome::Failed { .. }) => report.notifications_failed += 1,
                    Err(e) => {
                        tracing::error!(job_id = %job.id, error = %e, "Alert dispatch failed");
                        report.notifications_failed += 1;
                    }
                }
            }

            if enqueued > 0 {
                self.cooldown.record(&result.alert.id, result.level, now).await;
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            status = ?report.status,
            triggered = report.triggered_count,
            sent = report.notifications_sent,
            skipped = report.notifications_skipped,
            failed = report.notifications_failed,
            "Alert check complete"
        );

        report
    }
}
