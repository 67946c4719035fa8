//! Meta-Cognition Monitor: rolling performance tracking and self-checks
//!
//! Keeps a fixed-size window of recent outcomes, counts error signatures,
//! and watches for the same action type firing too often in a short span.
//! Counters only move forward until an explicit `reset()`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::{info, warn};

use crate::executor::ExecutionResult;

/// Characters of the error message kept in an error signature
const SIGNATURE_ERROR_CHARS: usize = 50;

/// Thresholds and window sizes for the monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub window_size: usize,
    /// A signature is reported once its count exceeds this
    pub error_threshold: u32,
    /// An action type is reported once its recent count exceeds this
    pub loop_threshold: usize,
    pub loop_lookback: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            error_threshold: 3,
            loop_threshold: 10,
            loop_lookback: Duration::minutes(5),
        }
    }
}

/// One entry in the sliding window
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub action_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    RepeatedError,
    PotentialLoop,
}

/// A detected problem
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub kind: IssueKind,
    /// Error signature or action type the issue is about
    pub subject: String,
    pub count: usize,
}

/// Result of evaluating one execution
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub success_rate: f64,
    pub efficiency: f64,
    pub issues_detected: Vec<Issue>,
    pub recommendations: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Evaluation {
    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.issues_detected.iter().any(|i| i.kind == kind)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorCount {
    pub signature: String,
    pub count: u32,
}

/// Aggregate view of the monitor
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSummary {
    pub total_actions: usize,
    pub success_rate: f64,
    /// Top five signatures by count, descending
    pub common_errors: Vec<ErrorCount>,
}

/// Stateful counter engine over recent executions
pub struct MetaCognitionMonitor {
    config: MonitorConfig,
    window: VecDeque<PerformanceRecord>,
    error_patterns: HashMap<String, u32>,
    loop_detection: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl MetaCognitionMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_size.max(1)),
            config,
            error_patterns: HashMap::new(),
            loop_detection: HashMap::new(),
        }
    }

    /// Evaluate an execution result at the current time
    pub fn evaluate(&mut self, result: &ExecutionResult) -> Evaluation {
        self.evaluate_at(result, Utc::now())
    }

    /// Evaluate an execution result as of `now`
    pub fn evaluate_at(&mut self, result: &ExecutionResult, now: DateTime<Utc>) -> Evaluation {
        let mut issues_detected = Vec::new();
        let mut recommendations = Vec::new();

        self.window.push_back(PerformanceRecord {
            timestamp: now,
            success: result.success,
            action_type: result.action_type.clone(),
        });
        while self.window.len() > self.config.window_size.max(1) {
            self.window.pop_front();
        }

        let success_rate = self.success_rate();

        if !result.success {
            let signature = error_signature(result);
            let count = self.error_patterns.entry(signature.clone()).or_insert(0);
            *count += 1;
            let count = *count;

            if count > self.config.error_threshold {
                warn!("Repeated error ({count}x): {signature}");
                recommendations.push(format!(
                    "Error '{signature}' has occurred {count} times; try an alternative approach for '{}'",
                    result.action_type
                ));
                issues_detected.push(Issue {
                    kind: IssueKind::RepeatedError,
                    subject: signature,
                    count: count as usize,
                });
            }
        }

        // Evict stale timestamps on write
        let cutoff = now - self.config.loop_lookback;
        let stamps = self
            .loop_detection
            .entry(result.action_type.clone())
            .or_default();
        stamps.push_back(now);
        while stamps.front().map_or(false, |t| *t < cutoff) {
            stamps.pop_front();
        }
        let recent = stamps.len();

        if recent > self.config.loop_threshold {
            warn!(
                "Potential loop: '{}' executed {recent} times in {}s",
                result.action_type,
                self.config.loop_lookback.num_seconds()
            );
            recommendations.push(format!(
                "Action '{}' repeated {recent} times within {} minutes; consider changing strategy",
                result.action_type,
                self.config.loop_lookback.num_minutes()
            ));
            issues_detected.push(Issue {
                kind: IssueKind::PotentialLoop,
                subject: result.action_type.clone(),
                count: recent,
            });
        }

        Evaluation {
            success_rate,
            efficiency: (success_rate * 1.2).min(1.0),
            issues_detected,
            recommendations,
            timestamp: now,
        }
    }

    fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let successes = self.window.iter().filter(|r| r.success).count();
        successes as f64 / self.window.len() as f64
    }

    pub fn summary(&self) -> MonitorSummary {
        let mut common_errors: Vec<ErrorCount> = self
            .error_patterns
            .iter()
            .map(|(signature, count)| ErrorCount {
                signature: signature.clone(),
                count: *count,
            })
            .collect();
        common_errors.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        common_errors.truncate(5);

        MonitorSummary {
            total_actions: self.window.len(),
            success_rate: self.success_rate(),
            common_errors,
        }
    }

    /// Clear every counter; operator-triggered recovery only
    pub fn reset(&mut self) {
        self.window.clear();
        self.error_patterns.clear();
        self.loop_detection.clear();
        info!("Meta-cognition monitor reset");
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Timestamps currently held for an action type
    pub fn tracked_timestamps(&self, action_type: &str) -> usize {
        self.loop_detection.get(action_type).map_or(0, VecDeque::len)
    }
}

impl Default for MetaCognitionMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

/// `action_type:first 50 chars of the error`
fn error_signature(result: &ExecutionResult) -> String {
    let error: String = result
        .error
        .as_deref()
        .unwrap_or("unknown error")
        .chars()
        .take(SIGNATURE_ERROR_CHARS)
        .collect();
    format!("{}:{error}", result.action_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionOutput;

    fn result(action_type: &str, success: bool, error: Option<&str>) -> ExecutionResult {
        ExecutionResult {
            action_type: action_type.to_string(),
            action: "act".to_string(),
            timestamp: Utc::now(),
            success,
            output: ExecutionOutput::Empty,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_single_success() {
        let mut monitor = MetaCognitionMonitor::default();
        let eval = monitor.evaluate(&result("think", true, None));
        assert_eq!(eval.success_rate, 1.0);
        assert_eq!(eval.efficiency, 1.0);
        assert!(eval.issues_detected.is_empty());
    }

    #[test]
    fn test_efficiency_is_capped_proxy() {
        let mut monitor = MetaCognitionMonitor::default();
        monitor.evaluate(&result("think", true, None));
        let eval = monitor.evaluate(&result("think", false, Some("x")));
        assert!((eval.success_rate - 0.5).abs() < 1e-9);
        assert!((eval.efficiency - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_error_reported_on_fourth_failure() {
        let mut monitor = MetaCognitionMonitor::default();
        for _ in 0..3 {
            let eval = monitor.evaluate(&result("tool_call", false, Some("connection refused")));
            assert!(!eval.has_issue(IssueKind::RepeatedError));
        }

        let eval = monitor.evaluate(&result("tool_call", false, Some("connection refused")));
        let issue = eval
            .issues_detected
            .iter()
            .find(|i| i.kind == IssueKind::RepeatedError)
            .unwrap();
        assert_eq!(issue.count, 4);
        assert_eq!(issue.subject, "tool_call:connection refused");
        assert_eq!(eval.recommendations.len(), 1);
    }

    #[test]
    fn test_distinct_signatures_counted_separately() {
        let mut monitor = MetaCognitionMonitor::default();
        for i in 0..4 {
            let msg = format!("error {i}");
            let eval = monitor.evaluate(&result("tool_call", false, Some(&msg)));
            assert!(!eval.has_issue(IssueKind::RepeatedError));
        }
    }

    #[test]
    fn test_signature_truncates_long_errors() {
        let long = "e".repeat(200);
        let sig = error_signature(&result("tool_call", false, Some(&long)));
        assert_eq!(sig.len(), "tool_call:".len() + SIGNATURE_ERROR_CHARS);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut monitor = MetaCognitionMonitor::new(MonitorConfig {
            window_size: 5,
            ..MonitorConfig::default()
        });
        monitor.evaluate(&result("think", false, Some("first")));
        for _ in 0..5 {
            monitor.evaluate(&result("think", true, None));
        }
        assert_eq!(monitor.window_len(), 5);
        // The failure fell out of the window
        assert_eq!(monitor.summary().success_rate, 1.0);
    }

    #[test]
    fn test_potential_loop_detected() {
        let mut monitor = MetaCognitionMonitor::default();
        let now = Utc::now();
        for i in 0..10 {
            let eval = monitor.evaluate_at(&result("think", true, None), now + Duration::seconds(i));
            assert!(!eval.has_issue(IssueKind::PotentialLoop));
        }
        let eval = monitor.evaluate_at(&result("think", true, None), now + Duration::seconds(10));
        let issue = eval
            .issues_detected
            .iter()
            .find(|i| i.kind == IssueKind::PotentialLoop)
            .unwrap();
        assert_eq!(issue.count, 11);
        assert_eq!(issue.subject, "think");
    }

    #[test]
    fn test_old_timestamps_evicted_on_write() {
        let mut monitor = MetaCognitionMonitor::default();
        let start = Utc::now();
        for i in 0..10 {
            monitor.evaluate_at(&result("think", true, None), start + Duration::seconds(i));
        }
        let later = start + Duration::minutes(10);
        let eval = monitor.evaluate_at(&result("think", true, None), later);
        assert!(!eval.has_issue(IssueKind::PotentialLoop));
        assert_eq!(monitor.tracked_timestamps("think"), 1);
    }

    #[test]
    fn test_summary_top_errors_descending() {
        let mut monitor = MetaCognitionMonitor::default();
        for (error, times) in [("a", 1), ("b", 3), ("c", 2), ("d", 1), ("e", 1), ("f", 5)] {
            for _ in 0..times {
                monitor.evaluate(&result("tool_call", false, Some(error)));
            }
        }
        let summary = monitor.summary();
        assert_eq!(summary.common_errors.len(), 5);
        assert_eq!(summary.common_errors[0].signature, "tool_call:f");
        assert_eq!(summary.common_errors[0].count, 5);
        assert_eq!(summary.common_errors[1].count, 3);
        assert_eq!(summary.total_actions, 13);
        assert_eq!(summary.success_rate, 0.0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut monitor = MetaCognitionMonitor::default();
        for _ in 0..5 {
            monitor.evaluate(&result("tool_call", false, Some("boom")));
        }
        monitor.reset();
        assert_eq!(monitor.window_len(), 0);
        assert_eq!(monitor.tracked_timestamps("tool_call"), 0);
        assert!(monitor.summary().common_errors.is_empty());

        let eval = monitor.evaluate(&result("tool_call", false, Some("boom")));
        assert!(!eval.has_issue(IssueKind::RepeatedError));
    }
}
