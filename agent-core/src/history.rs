//! Action History: records every executed action with its outcome
//!
//! Bounded in memory; the most recent entries feed the planner's
//! memory context and per-action success rates.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

use crate::executor::ExecutionResult;

/// A recorded action
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub id: String,
    pub goal_id: Option<String>,
    pub action_type: String,
    pub action: String,
    pub success: bool,
    pub summary: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActionRecord {
    pub fn from_result(goal_id: Option<&str>, result: &ExecutionResult) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal_id: goal_id.map(str::to_string),
            action_type: result.action_type.clone(),
            action: result.action.clone(),
            success: result.success,
            summary: result.output.summary(),
            error: result.error.clone(),
            timestamp: result.timestamp,
        }
    }

    /// One-line rendering used as planner memory context
    pub fn render(&self) -> String {
        let outcome = if self.success { "ok" } else { "failed" };
        match &self.error {
            Some(error) => format!("{}:{} [{outcome}] {error}", self.action_type, self.action),
            None => format!(
                "{}:{} [{outcome}] {}",
                self.action_type, self.action, self.summary
            ),
        }
    }
}

/// Bounded, most-recent-last log of executed actions
pub struct ActionHistory {
    records: VecDeque<ActionRecord>,
    max_entries: usize,
}

impl ActionHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            records: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Append a record, evicting the oldest beyond capacity
    pub fn record(&mut self, record: ActionRecord) {
        self.records.push_back(record);
        while self.records.len() > self.max_entries {
            self.records.pop_front();
        }
    }

    /// Most recent records, newest first
    pub fn recent(&self, count: usize) -> Vec<&ActionRecord> {
        self.records.iter().rev().take(count).collect()
    }

    /// Most recent `count` records rendered oldest-first for the planner
    pub fn memory_context(&self, count: usize) -> Vec<String> {
        let mut lines: Vec<String> = self.recent(count).iter().map(|r| r.render()).collect();
        lines.reverse();
        lines
    }

    /// Success rate for one action type; 0.0 when nothing was recorded
    pub fn success_rate(&self, action_type: &str) -> f64 {
        let relevant: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.action_type == action_type)
            .collect();

        if relevant.is_empty() {
            return 0.0;
        }

        let successes = relevant.iter().filter(|r| r.success).count();
        successes as f64 / relevant.len() as f64
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
