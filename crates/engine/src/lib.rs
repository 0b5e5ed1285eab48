//! Operational alerting: metric thresholds, cooldown suppression and the alert
//! runner that feeds the notification pipeline.

pub mod alerts;
pub mod cooldown;
pub mod definitions;
pub mod evaluator;

pub use alerts::{AlertReport, AlertRunner};
