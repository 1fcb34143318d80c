//! Metrics and observability for the replication bridge
//!
//! A small counter/gauge registry with Prometheus text export, surfaced on
//! `/metrics`. Counters cover the sync paths (rows applied, DDL applied,
//! uploads completed); gauges track live session state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

// Metric names used across the session layer.
pub const SESSIONS_ACTIVE: &str = "posbridge_sessions_active";
pub const SESSIONS_TOTAL: &str = "posbridge_sessions_total";
pub const ROWS_APPLIED: &str = "posbridge_rows_applied_total";
pub const ROW_OP_ERRORS: &str = "posbridge_row_op_errors_total";
pub const DDL_APPLIED: &str = "posbridge_ddl_applied_total";
pub const DDL_SKIPPED: &str = "posbridge_ddl_skipped_total";
pub const TABLES_CREATED: &str = "posbridge_tables_created_total";
pub const CSV_IMPORTS: &str = "posbridge_csv_imports_total";
pub const CSV_ROWS_IMPORTED: &str = "posbridge_csv_rows_imported_total";
pub const LICENSE_REFUSALS: &str = "posbridge_license_refusals_total";

/// Registry of counters and gauges
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<HashMap<String, Arc<AtomicU64>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Increment a counter by one.
    pub async fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    /// Add to a counter.
    pub async fn add_counter(&self, name: &str, value: u64) {
        let counters = self.counters.read().await;
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        drop(counters);

        let mut counters = self.counters.write().await;
        let counter = counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)));
        counter.fetch_add(value, Ordering::Relaxed);
    }

    /// Set a gauge value.
    pub async fn set_gauge(&self, name: &str, value: u64) {
        let gauges = self.gauges.read().await;
        if let Some(gauge) = gauges.get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        drop(gauges);

        let mut gauges = self.gauges.write().await;
        gauges.insert(name.to_string(), Arc::new(AtomicU64::new(value)));
    }

    /// Adjust a gauge up or down.
    pub async fn add_gauge(&self, name: &str, delta: i64) {
        let gauges = self.gauges.read().await;
        if let Some(gauge) = gauges.get(name) {
            if delta >= 0 {
                gauge.fetch_add(delta as u64, Ordering::Relaxed);
            } else {
                gauge.fetch_sub(delta.unsigned_abs().min(gauge.load(Ordering::Relaxed)), Ordering::Relaxed);
            }
            return;
        }
        drop(gauges);

        let mut gauges = self.gauges.write().await;
        let gauge = gauges
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)));
        if delta >= 0 {
            gauge.fetch_add(delta as u64, Ordering::Relaxed);
        }
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .await
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub async fn get_gauge(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .await
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Render the registry in Prometheus text exposition format.
    pub async fn to_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!(
            "# TYPE posbridge_uptime_seconds gauge\nposbridge_uptime_seconds {}\n",
            self.start_time.elapsed().as_secs()
        ));

        let counters = self.counters.read().await;
        let mut names: Vec<_> = counters.keys().collect();
        names.sort();
        for name in names {
            out.push_str(&format!("# TYPE {name} counter\n"));
            out.push_str(&format!(
                "{name} {}\n",
                counters[name].load(Ordering::Relaxed)
            ));
        }
        drop(counters);

        let gauges = self.gauges.read().await;
        let mut names: Vec<_> = gauges.keys().collect();
        names.sort();
        for name in names {
            out.push_str(&format!("# TYPE {name} gauge\n"));
            out.push_str(&format!("{name} {}\n", gauges[name].load(Ordering::Relaxed)));
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter_roundtrip() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.get_counter(ROWS_APPLIED).await, 0);

        registry.inc_counter(ROWS_APPLIED).await;
        registry.add_counter(ROWS_APPLIED, 4).await;
        assert_eq!(registry.get_counter(ROWS_APPLIED).await, 5);
    }

    #[tokio::test]
    async fn test_gauge_roundtrip() {
        let registry = MetricsRegistry::new();
        registry.set_gauge(SESSIONS_ACTIVE, 3).await;
        assert_eq!(registry.get_gauge(SESSIONS_ACTIVE).await, 3);

        registry.add_gauge(SESSIONS_ACTIVE, 2).await;
        assert_eq!(registry.get_gauge(SESSIONS_ACTIVE).await, 5);

        registry.add_gauge(SESSIONS_ACTIVE, -4).await;
        assert_eq!(registry.get_gauge(SESSIONS_ACTIVE).await, 1);
    }

    #[tokio::test]
    async fn test_gauge_never_underflows() {
        let registry = MetricsRegistry::new();
        registry.set_gauge(SESSIONS_ACTIVE, 1).await;
        registry.add_gauge(SESSIONS_ACTIVE, -5).await;
        assert_eq!(registry.get_gauge(SESSIONS_ACTIVE).await, 0);
    }

    #[tokio::test]
    async fn test_prometheus_export() {
        let registry = MetricsRegistry::new();
        registry.inc_counter(CSV_IMPORTS).await;
        registry.set_gauge(SESSIONS_ACTIVE, 2).await;

        let text = registry.to_prometheus().await;
        assert!(text.contains("# TYPE posbridge_csv_imports_total counter"));
        assert!(text.contains("posbridge_csv_imports_total 1"));
        assert!(text.contains("posbridge_sessions_active 2"));
        assert!(text.contains("posbridge_uptime_seconds"));
    }
}
