//! Token-bucket rate limiting for tool calls
//!
//! One limiter is built by the composition root and shared by every executor,
//! including sub-agent executors. Buckets live in a `DashMap`, so the
//! refill-check-consume step holds the shard lock and cannot lose updates.

use dashmap::DashMap;
use std::time::Instant;
use tracing::debug;

/// Token bucket for rate limiting
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    fn has_token(&mut self) -> bool {
        self.refill();
        self.tokens >= 1.0
    }
}

/// Rate limiter with per-agent and per-tool buckets
#[derive(Debug)]
pub struct RateLimiter {
    agent_buckets: DashMap<String, TokenBucket>,
    tool_buckets: DashMap<String, TokenBucket>,
    agent_max_rps: f64,
    tool_max_rps: f64,
}

impl RateLimiter {
    /// Buckets hold twice the per-second rate as burst capacity
    pub fn new(agent_max_rps: f64, tool_max_rps: f64) -> Self {
        Self {
            agent_buckets: DashMap::new(),
            tool_buckets: DashMap::new(),
            agent_max_rps: agent_max_rps.max(0.0),
            tool_max_rps: tool_max_rps.max(0.0),
        }
    }

    /// Check and consume one token from both the agent's and the tool's bucket.
    /// Nothing is consumed unless both have a token.
    pub fn check(&self, agent_id: &str, tool_name: &str) -> bool {
        let mut agent = self
            .agent_buckets
            .entry(agent_id.to_string())
            .or_insert_with(|| TokenBucket::new(self.agent_max_rps * 2.0, self.agent_max_rps));
        let mut tool = self
            .tool_buckets
            .entry(tool_name.to_string())
            .or_insert_with(|| TokenBucket::new(self.tool_max_rps * 2.0, self.tool_max_rps));

        if agent.has_token() && tool.has_token() {
            agent.tokens -= 1.0;
            tool.tokens -= 1.0;
            true
        } else {
            debug!("Rate limit hit: agent={agent_id} tool={tool_name}");
            false
        }
    }
}
