//! Execution metrics: fire-and-forget counters for tool calls
//!
//! Sinks are infallible by signature; a broken sink can never surface an
//! error inside the executor.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome label attached to every tool execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Unavailable,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Receives execution measurements
pub trait MetricsSink: Send + Sync {
    fn record_execution(&self, duration: Duration, tool_name: &str, status: ExecutionStatus);

    /// Bump a named counter (e.g. `unknown_plan_type`)
    fn increment(&self, counter: &str);
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ToolStats {
    pub count: u64,
    pub total_ms: u64,
}

/// Serialisable view of the collected metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// `tool -> status -> stats`
    pub tools: BTreeMap<String, BTreeMap<String, ToolStats>>,
    pub counters: BTreeMap<String, u64>,
}

/// In-process metrics collector
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    tools: DashMap<(String, ExecutionStatus), ToolStats>,
    counters: DashMap<String, u64>,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map_or(0, |c| *c)
    }

    pub fn executions(&self, tool_name: &str, status: ExecutionStatus) -> u64 {
        self.tools
            .get(&(tool_name.to_string(), status))
            .map_or(0, |s| s.count)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::default();
        for entry in self.tools.iter() {
            let (tool, status) = entry.key();
            snapshot
                .tools
                .entry(tool.clone())
                .or_default()
                .insert(status.as_str().to_string(), *entry.value());
        }
        for entry in self.counters.iter() {
            snapshot.counters.insert(entry.key().clone(), *entry.value());
        }
        snapshot
    }
}

impl MetricsSink for ExecutionMetrics {
    fn record_execution(&self, duration: Duration, tool_name: &str, status: ExecutionStatus) {
        let mut stats = self
            .tools
            .entry((tool_name.to_string(), status))
            .or_default();
        stats.count += 1;
        stats.total_ms += duration.as_millis() as u64;
    }

    fn increment(&self, counter: &str) {
        *self.counters.entry(counter.to_string()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_execution_by_tool_and_status() {
        let metrics = ExecutionMetrics::new();
        metrics.record_execution(Duration::from_millis(10), "system.echo", ExecutionStatus::Success);
        metrics.record_execution(Duration::from_millis(30), "system.echo", ExecutionStatus::Success);
        metrics.record_execution(Duration::from_millis(5), "system.echo", ExecutionStatus::Error);

        assert_eq!(metrics.executions("system.echo", ExecutionStatus::Success), 2);
        assert_eq!(metrics.executions("system.echo", ExecutionStatus::Error), 1);
        assert_eq!(metrics.executions("system.time", ExecutionStatus::Success), 0);

        let snapshot = metrics.snapshot();
        let echo = &snapshot.tools["system.echo"];
        assert_eq!(echo["success"].count, 2);
        assert_eq!(echo["success"].total_ms, 40);
    }

    #[test]
    fn test_counters() {
        let metrics = ExecutionMetrics::new();
        metrics.increment("unknown_plan_type");
        metrics.increment("unknown_plan_type");
        assert_eq!(metrics.counter("unknown_plan_type"), 2);
        assert_eq!(metrics.counter("rate_limited"), 0);
        assert_eq!(metrics.snapshot().counters["unknown_plan_type"], 2);
    }
}
