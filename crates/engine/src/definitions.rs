//! Built-in catalogue of monitored metrics and their thresholds.

use courier_common::types::{AlertCategory, AlertDefinition, AlertLevel};

/// Severity of `value` for a definition, honoring its direction.
///
/// Reaching a threshold counts as crossing it.
pub fn level_for(definition: &AlertDefinition, value: f64) -> AlertLevel {
    let (warning, critical) = (definition.warning_threshold, definition.critical_threshold);
    if definition.higher_is_bad {
        if value >= critical {
            AlertLevel::Critical
        } else if value >= warning {
            AlertLevel::Warning
        } else {
            AlertLevel::Info
        }
    } else if value <= critical {
        AlertLevel::Critical
    } else if value <= warning {
        AlertLevel::Warning
    } else {
        AlertLevel::Info
    }
}

#[allow(clippy::too_many_arguments)]
fn define(
    id: &str,
    name: &str,
    description: &str,
    category: AlertCategory,
    warning_threshold: f64,
    critical_threshold: f64,
    higher_is_bad: bool,
    unit: &str,
    warning_action: &str,
    critical_action: &str,
) -> AlertDefinition {
    AlertDefinition {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category,
        metric: id.to_string(),
        warning_threshold,
        critical_threshold,
        higher_is_bad,
        unit: unit.to_string(),
        warning_action: warning_action.to_string(),
        critical_action: critical_action.to_string(),
    }
}

/// The default alert set. Each definition reads the metric named after its id.
pub fn default_alerts() -> Vec<AlertDefinition> {
    vec![
        define(
            "api_response_time_p95",
            "API Response Time (P95)",
            "P95 response time across all API endpoints",
            AlertCategory::Performance,
            500.0,
            1000.0,
            true,
            "ms",
            "Enable aggressive caching and check the cache hit rate dashboard.",
            "Check recent errors, inspect slow queries in pg_stat_statements and \
             tighten rate limits until latency recovers.",
        ),
        define(
            "db_query_time_p95",
            "Database Query Time (P95)",
            "P95 database query execution time",
            AlertCategory::Database,
            100.0,
            300.0,
            true,
            "ms",
            "Look for missing indexes on frequent queries (pg_stat_user_indexes).",
            "Check lock contention in pg_locks, route reads to a replica and archive \
             old rows to shrink hot tables.",
        ),
        define(
            "cache_hit_rate",
            "Cache Hit Rate",
            "Percentage of requests served from cache",
            AlertCategory::Performance,
            70.0,
            50.0,
            false,
            "%",
            "Review cache key TTLs and warm caches for popular data.",
            "Verify the cache is reachable and not out of memory.",
        ),
        define(
            "error_rate",
            "Error Rate",
            "Errors per minute across the application",
            AlertCategory::Errors,
            5.0,
            20.0,
            true,
            "errors/min",
            "Review recent errors and the health of external services.",
            "Inspect stack traces now, check upstream status pages and roll back \
             the latest deploy if it correlates.",
        ),
        define(
            "db_connections",
            "Database Connections",
            "Active database connections as a percentage of the limit",
            AlertCategory::Database,
            70.0,
            90.0,
            true,
            "%",
            "Confirm connection pooling is active and look for idle-in-transaction sessions.",
            "Terminate long-running queries and enable a connection pooler.",
        ),
        define(
            "db_size",
            "Database Size",
            "Database storage usage as a percentage of the limit",
            AlertCategory::Capacity,
            70.0,
            90.0,
            true,
            "%",
            "Run archive maintenance and review the data retention policy.",
            "Archive immediately, VACUUM FULL the largest tables and raise the storage limit.",
        ),
        define(
            "disk_usage",
            "Disk Usage",
            "Disk usage on the primary volume",
            AlertCategory::Capacity,
            80.0,
            95.0,
            true,
            "%",
            "Rotate logs and clean temporary files.",
            "Free space now or grow the volume before writes start failing.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(id: &str) -> AlertDefinition {
        default_alerts()
            .into_iter()
            .find(|a| a.id == id)
            .unwrap()
    }

    #[test]
    fn test_higher_is_bad_levels() {
        let latency = find("api_response_time_p95");
        assert_eq!(level_for(&latency, 120.0), AlertLevel::Info);
        assert_eq!(level_for(&latency, 500.0), AlertLevel::Warning);
        assert_eq!(level_for(&latency, 999.9), AlertLevel::Warning);
        assert_eq!(level_for(&latency, 1000.0), AlertLevel::Critical);
    }

    #[test]
    fn test_lower_is_bad_levels() {
        let hit_rate = find("cache_hit_rate");
        assert_eq!(level_for(&hit_rate, 92.0), AlertLevel::Info);
        assert_eq!(level_for(&hit_rate, 70.0), AlertLevel::Warning);
        assert_eq!(level_for(&hit_rate, 50.0), AlertLevel::Critical);
        assert_eq!(level_for(&hit_rate, 12.0), AlertLevel::Critical);
    }

    #[test]
    fn test_catalogue_ids_are_unique() {
        let alerts = default_alerts();
        let mut ids: Vec<&str> = alerts.iter().map(|a| a.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), alerts.len());
        assert!(ids.contains(&"disk_usage"));
    }
}
