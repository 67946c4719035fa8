//! Policy gate: decides whether an action may run before it is attempted
//!
//! `RulePolicy` matches tool names against deny and confirm lists. Patterns
//! are exact names or `namespace.*`; a lone `*` matches everything.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// What the policy gate sees about a pending action
#[derive(Debug, Clone, Serialize)]
pub struct ActionContext {
    pub agent_id: String,
    pub action_type: String,
    pub action: String,
    pub parameters: Map<String, Value>,
}

/// Verdict of a policy check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub requires_confirmation: bool,
    pub reason: Option<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            requires_confirmation: false,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            requires_confirmation: false,
            reason: Some(reason.into()),
        }
    }

    pub fn confirm(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            requires_confirmation: true,
            reason: Some(reason.into()),
        }
    }

    /// Whether an unattended executor may proceed
    pub fn permits_unattended(&self) -> bool {
        self.allowed && !self.requires_confirmation
    }
}

/// Optional gate consulted before execution
#[async_trait]
pub trait PolicyCheck: Send + Sync {
    async fn check(&self, context: &ActionContext) -> PolicyDecision;
}

/// Pattern-based policy built from configuration
#[derive(Debug, Clone, Default)]
pub struct RulePolicy {
    deny: Vec<String>,
    confirm: Vec<String>,
}

impl RulePolicy {
    pub fn new(deny: Vec<String>, confirm: Vec<String>) -> Self {
        Self { deny, confirm }
    }

    fn first_match<'a>(patterns: &'a [String], action: &str) -> Option<&'a str> {
        patterns
            .iter()
            .find(|p| pattern_matches(p, action))
            .map(String::as_str)
    }
}

#[async_trait]
impl PolicyCheck for RulePolicy {
    async fn check(&self, context: &ActionContext) -> PolicyDecision {
        if let Some(pattern) = Self::first_match(&self.deny, &context.action) {
            warn!(
                "Policy denied {} for agent {} (rule '{pattern}')",
                context.action, context.agent_id
            );
            return PolicyDecision::deny(format!("'{}' is denied by rule '{pattern}'", context.action));
        }
        if let Some(pattern) = Self::first_match(&self.confirm, &context.action) {
            debug!("Policy requires confirmation for {}", context.action);
            return PolicyDecision::confirm(format!(
                "'{}' requires confirmation (rule '{pattern}')",
                context.action
            ));
        }
        PolicyDecision::allow()
    }
}

fn pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix(".*") {
        Some(namespace) => name
            .strip_prefix(namespace)
            .map_or(false, |rest| rest.starts_with('.')),
        None => pattern == name,
    }
}
