//! cogshell configuration loading and parsing

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cognitive_loop::LoopConfig;
use crate::goal_engine::NewGoal;
use crate::metacognition::MonitorConfig;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/cogshell/config.toml";

/// Upper bound for `monitor.loop_lookback_secs` (one day)
pub const MAX_LOOP_LOOKBACK_SECS: i64 = 86_400;

/// Root configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct CogshellConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub cognitive_loop: CognitiveLoopConfig,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub management: ManagementConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Seed goals, created at startup when the goal store is empty
    #[serde(default)]
    pub goals: Vec<NewGoal>,
}

#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_id")]
    pub id: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "json" or "compact"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CognitiveLoopConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_memory_context")]
    pub memory_context_size: usize,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for CognitiveLoopConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            memory_context_size: default_memory_context(),
            history_size: default_history_size(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default = "default_loop_threshold")]
    pub loop_threshold: usize,
    #[serde(default = "default_loop_lookback")]
    pub loop_lookback_secs: i64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            error_threshold: default_error_threshold(),
            loop_threshold: default_loop_threshold(),
            loop_lookback_secs: default_loop_lookback(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_agent_rps")]
    pub agent_rps: f64,
    #[serde(default = "default_tool_rps")]
    pub tool_rps: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            agent_rps: default_agent_rps(),
            tool_rps: default_tool_rps(),
        }
    }
}

/// Which planning strategy the composition root wires in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerKind {
    #[default]
    RuleBased,
    Delegated,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub kind: PlannerKind,
}

#[derive(Debug, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_max_sub_agents")]
    pub max_sub_agents: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            max_sub_agents: default_max_sub_agents(),
        }
    }
}

/// No `db_path` means goals and history live in memory only
#[derive(Debug, Default, Deserialize)]
pub struct PersistenceConfig {
    pub db_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManagementConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub confirm: Vec<String>,
}

// Default value functions
fn default_agent_id() -> String { "cogshell".into() }
fn default_log_level() -> String { "info".into() }
fn default_log_format() -> String { "compact".into() }
fn default_tick_interval() -> u64 { 1000 }
fn default_memory_context() -> usize { 10 }
fn default_history_size() -> usize { 1000 }
fn default_window_size() -> usize { 100 }
fn default_error_threshold() -> u32 { 3 }
fn default_loop_threshold() -> usize { 10 }
fn default_loop_lookback() -> i64 { 300 }
fn default_agent_rps() -> f64 { 10.0 }
fn default_tool_rps() -> f64 { 50.0 }
fn default_max_sub_agents() -> usize { 5 }
fn default_true() -> bool { true }
fn default_bind() -> String { "127.0.0.1:9100".into() }

impl CogshellConfig {
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            tick_interval: Duration::from_millis(self.cognitive_loop.tick_interval_ms.max(1)),
            memory_context_size: self.cognitive_loop.memory_context_size,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            window_size: self.monitor.window_size.max(1),
            error_threshold: self.monitor.error_threshold,
            loop_threshold: self.monitor.loop_threshold,
            loop_lookback: chrono::Duration::seconds(
                self.monitor.loop_lookback_secs.clamp(1, MAX_LOOP_LOOKBACK_SECS),
            ),
        }
    }

    /// Reject values that would disable or break the monitor
    pub fn validate(&self) -> Result<()> {
        let lookback = self.monitor.loop_lookback_secs;
        if !(1..=MAX_LOOP_LOOKBACK_SECS).contains(&lookback) {
            bail!(
                "monitor.loop_lookback_secs must be between 1 and {MAX_LOOP_LOOKBACK_SECS}, \
                 got {lookback}"
            );
        }
        Ok(())
    }
}

/// Config path: first CLI argument, else `COGSHELL_CONFIG`, else the default
pub fn config_path() -> String {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("COGSHELL_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

/// Load configuration; a missing file yields defaults
pub fn load_config(config_path: &str) -> Result<CogshellConfig> {
    if Path::new(config_path).exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config from {config_path}"))?;
        let config: CogshellConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {config_path}"))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {config_path}"))?;
        Ok(config)
    } else {
        tracing::warn!("Config file not found at {config_path}, using defaults");
        Ok(CogshellConfig::default())
    }
}
