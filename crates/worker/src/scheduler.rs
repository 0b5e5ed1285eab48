//! Fixed-interval scheduling of the notification and alert runners.
//!
//! Both runners share one task, so a tick waits for any run already in
//! progress. Missed ticks are skipped rather than replayed in a burst.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};

use courier_common::config::AppConfig;
use courier_engine::alerts::{AlertReport, AlertRunner};
use courier_notifier::runner::{NotificationRunner, RunReport};

pub struct Scheduler {
    notifications: Arc<NotificationRunner>,
    alerts: Arc<AlertRunner>,
    notify_every: Duration,
    alert_every: Duration,
}

impl Scheduler {
    pub fn new(
        notifications: Arc<NotificationRunner>,
        alerts: Arc<AlertRunner>,
        notify_every: Duration,
        alert_every: Duration,
    ) -> Self {
        Self {
            notifications,
            alerts,
            notify_every,
            alert_every,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        notifications: Arc<NotificationRunner>,
        alerts: Arc<AlertRunner>,
    ) -> Self {
        Self::new(
            notifications,
            alerts,
            Duration::from_secs(config.notify_interval_seconds.max(1)),
            Duration::from_secs(config.alert_interval_seconds.max(1)),
        )
    }

    /// Run both schedules until the future is dropped.
    pub async fn run(&self) {
        let mut notify = interval(self.notify_every);
        let mut alert = interval(self.alert_every);
        notify.set_missed_tick_behavior(MissedTickBehavior::Skip);
        alert.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            notify_interval_secs = self.notify_every.as_secs(),
            alert_interval_secs = self.alert_every.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = notify.tick() => {
                    self.notification_tick().await;
                }
                _ = alert.tick() => {
                    self.alert_tick().await;
                }
            }
        }
    }

    /// One notification run. A failed run is logged and retried on the next tick.
    pub async fn notification_tick(&self) -> Option<RunReport> {
        match self.notifications.run().await {
            Ok(report) => {
                if report.processed > 0 || report.released > 0 || report.timed_out > 0 {
                    tracing::info!(
                        processed = report.processed,
                        sent = report.sent,
                        retried = report.retried,
                        failed = report.failed,
                        released = report.released,
                        timed_out = report.timed_out,
                        "Notification run finished"
                    );
                }
                Some(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "Notification run aborted");
                None
            }
        }
    }

    pub async fn alert_tick(&self) -> AlertReport {
        self.alerts.run().await
    }
}
