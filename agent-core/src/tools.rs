//! Tool Registry: the tool-execution capability
//!
//! Stores tool definitions with their handlers and runs them with a per-tool
//! timeout. The executor only sees the `ToolExecutor` trait.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Response envelope of a tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResponse {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Invokes tools by name. Must be safe to call from several sub-agents at once.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn call(&self, tool_name: &str, parameters: &Map<String, Value>) -> Result<ToolResponse>;
}

/// A tool handler function
pub type ToolHandler = Arc<dyn Fn(&Map<String, Value>) -> Result<Value> + Send + Sync>;

/// Definition of a registered tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub namespace: String,
    pub description: String,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// In-memory tool registry
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in `system.*` tools
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            make_tool("system.echo", "Return the call parameters unchanged", 1000),
            |params| Ok(Value::Object(params.clone())),
        );
        registry.register(
            make_tool("system.time", "Current UTC time", 1000),
            |_| {
                let now = chrono::Utc::now();
                Ok(serde_json::json!({
                    "utc": now.to_rfc3339(),
                    "unix": now.timestamp(),
                }))
            },
        );
        registry
    }

    /// Register a tool, replacing any previous tool of the same name
    pub fn register<F>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        info!(
            "Registered tool: {} (ns: {})",
            definition.name, definition.namespace
        );
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler: Arc::new(handler),
            },
        );
    }

    /// Get a tool definition by name
    pub fn get_tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|t| &t.definition)
    }

    /// List tools, optionally filtered by namespace
    pub fn list_tools(&self, namespace: &str) -> Vec<&ToolDefinition> {
        let mut tools: Vec<&ToolDefinition> = self
            .tools
            .values()
            .map(|t| &t.definition)
            .filter(|d| namespace.is_empty() || d.namespace == namespace)
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn call(&self, tool_name: &str, parameters: &Map<String, Value>) -> Result<ToolResponse> {
        let Some(tool) = self.tools.get(tool_name) else {
            warn!("Unknown tool requested: {tool_name}");
            return Ok(ToolResponse::failed(format!("Unknown tool: {tool_name}")));
        };

        let handler = tool.handler.clone();
        let params = parameters.clone();
        let timeout = tool.definition.timeout;
        debug!("Calling tool {tool_name} (timeout {}ms)", timeout.as_millis());

        let task = tokio::task::spawn_blocking(move || handler(&params));
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(value))) => Ok(ToolResponse::ok(value)),
            Ok(Ok(Err(e))) => Ok(ToolResponse::failed(e.to_string())),
            Ok(Err(join_err)) => Ok(ToolResponse::failed(format!(
                "Tool {tool_name} panicked: {join_err}"
            ))),
            Err(_) => Ok(ToolResponse::failed(format!(
                "Tool {tool_name} timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

/// Helper to create a ToolDefinition; the namespace is the name's first segment
pub fn make_tool(name: &str, description: &str, timeout_ms: u64) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        namespace: name.split('.').next().unwrap_or(name).to_string(),
        description: description.to_string(),
        timeout: Duration::from_millis(timeout_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_register_and_get_tool() {
        let mut reg = ToolRegistry::new();
        reg.register(make_tool("fs.read", "Read a file", 5000), |_| Ok(Value::Null));

        let tool = reg.get_tool("fs.read").unwrap();
        assert_eq!(tool.name, "fs.read");
        assert_eq!(tool.namespace, "fs");
        assert_eq!(tool.timeout, Duration::from_secs(5));
        assert!(reg.get_tool("nonexistent").is_none());
    }

    #[test]
    fn test_list_tools_by_namespace() {
        let mut reg = ToolRegistry::with_builtins();
        reg.register(make_tool("net.ping", "Ping", 1000), |_| Ok(Value::Null));

        assert_eq!(reg.list_tools("").len(), 3);
        let system = reg.list_tools("system");
        assert_eq!(system.len(), 2);
        assert_eq!(system[0].name, "system.echo");
        assert!(reg.list_tools("nonexistent").is_empty());
    }

    #[tokio::test]
    async fn test_echo_builtin() {
        let reg = ToolRegistry::with_builtins();
        let response = reg
            .call("system.echo", &params(serde_json::json!({"msg": "hi"})))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.result.unwrap()["msg"], "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_a_failed_response() {
        let reg = ToolRegistry::new();
        let response = reg.call("nope", &Map::new()).await.unwrap();
        assert!(!response.success);
        assert!(response.error.unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_handler_error_is_a_failed_response() {
        let mut reg = ToolRegistry::new();
        reg.register(make_tool("disk.check", "Fails", 1000), |_| {
            anyhow::bail!("disk unreadable")
        });
        let response = reg.call("disk.check", &Map::new()).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("disk unreadable"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut reg = ToolRegistry::new();
        reg.register(make_tool("slow.op", "Sleeps", 20), |_| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Value::Null)
        });
        let response = reg.call("slow.op", &Map::new()).await.unwrap();
        assert!(!response.success);
        assert!(response.error.unwrap().contains("timed out"));
    }
}
