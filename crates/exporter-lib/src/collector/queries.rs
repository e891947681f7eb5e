//! PromQL expressions used by the load collector

/// Series whose `instance` labels enumerate the reporting nodes
pub const DISCOVERY_QUERY: &str = "node_load5";

/// Default scrape job of the node exporter
pub const DEFAULT_JOB: &str = "node-exporter";

/// Builds per-instance load expressions for one scrape job
#[derive(Debug, Clone)]
pub struct LoadQueries {
    job: String,
}

impl Default for LoadQueries {
    fn default() -> Self {
        Self::new(DEFAULT_JOB)
    }
}

impl LoadQueries {
    pub fn new(job: impl Into<String>) -> Self {
        Self { job: job.into() }
    }

    /// 1-minute load average as a percentage of the instance's logical cores
    pub fn cpu_load(&self, instance: &str) -> String {
        let selector = self.selector(instance);
        format!(
            "avg(node_load1{{{sel}}}) / count(count(node_cpu_seconds_total{{{sel}}}) by (cpu)) * 100",
            sel = selector
        )
    }

    /// Percentage of memory in use
    pub fn mem_load(&self, instance: &str) -> String {
        let selector = self.selector(instance);
        format!(
            "100 - (avg(node_memory_MemAvailable_bytes{{{sel}}}) / avg(node_memory_MemTotal_bytes{{{sel}}}) * 100)",
            sel = selector
        )
    }

    fn selector(&self, instance: &str) -> String {
        format!(
            r#"instance="{}",job="{}""#,
            escape_label_value(instance),
            escape_label_value(&self.job)
        )
    }
}

/// Escape a string for use inside a double-quoted label matcher
fn escape_label_value(value: &str) -> String {
    value.replace('\\', r"\\").replace('"', "\\\"")
}
