//! Tool trait: the abstraction over retrieval capabilities.
//!
//! Tools are what let the tool-selection loop gather evidence:
//! keyword/semantic search, structured metadata listing, dereferencing ids.
//! Each one returns an ordered list of [`RetrievedRecord`]s or an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::error::ToolError;
use crate::provider::ToolDefinition;
use crate::record::RetrievedRecord;

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id when there is one)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// Per-turn information every tool receives alongside its arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContext {
    /// Identity the search collaborator scopes results to (usually an email)
    pub principal: String,

    /// Record ids already gathered this turn; tools pass them as exclusions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_ids: Vec<String>,

    /// Result limit when the arguments don't name one
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

fn default_limit() -> usize {
    10
}

impl ToolContext {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            excluded_ids: Vec::new(),
            default_limit: default_limit(),
        }
    }

    pub fn with_excluded_ids(mut self, ids: Vec<String>) -> Self {
        self.excluded_ids = ids;
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new("")
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// Short human-readable summary of what was found
    pub output: String,

    /// Retrieved evidence, in the order the collaborator ranked it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<RetrievedRecord>,
}

impl ToolResult {
    /// A successful result summarizing `records`.
    pub fn found(call_id: impl Into<String>, records: Vec<RetrievedRecord>) -> Self {
        let output = match records.len() {
            0 => "No matching records".to_string(),
            1 => "Found 1 record".to_string(),
            n => format!("Found {n} records"),
        };
        Self {
            call_id: call_id.into(),
            success: true,
            output,
            records,
        }
    }
}

/// The core Tool trait.
///
/// Each retrieval capability (search, get_items, fetch_documents) implements
/// this trait. Tools are registered in the ToolRegistry and made available to
/// the tool-selection loop, which never depends on how many there are.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "search", "get_items").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// The tool-selection loop uses this to:
/// 1. Get tool definitions to send to the model
/// 2. Look up and execute tools when a plan names them
///
/// Tools are kept in name order so definitions render identically every turn.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool call.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolResult, ToolError> {
        let tool = self.tools.get(&call.name).ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let mut result = tool.execute(call.arguments.clone(), ctx).await?;
        result.call_id = call.id.clone();
        Ok(result)
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
            ctx: &ToolContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            let text = arguments["text"].as_str().unwrap_or("").to_string();
            Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: format!("{}: {text}", ctx.principal),
                records: Vec::new(),
            })
        }
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str { self.0 }
        fn description(&self) -> &str { "" }
        fn parameters_schema(&self) -> serde_json::Value { serde_json::json!({}) }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            Ok(ToolResult::found("", Vec::new()))
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_definitions_are_name_ordered() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(NamedTool("search")));
        registry.register(Box::new(NamedTool("fetch_documents")));
        registry.register(Box::new(NamedTool("get_items")));
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["fetch_documents", "get_items", "search"]);
    }

    #[tokio::test]
    async fn registry_execute_tool_stamps_call_id() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let call = ToolCall {
            id: "call_1".into(),
            name: "echo".into(),
            arguments: serde_json::json!({"text": "hello world"}),
        };
        let ctx = ToolContext::new("ana@example.com");
        let result = registry.execute(&call, &ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.call_id, "call_1");
        assert_eq!(result.output, "ana@example.com: hello world");
    }

    #[tokio::test]
    async fn registry_execute_missing_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall {
            id: "call_1".into(),
            name: "nonexistent".into(),
            arguments: serde_json::json!({}),
        };
        let err = registry.execute(&call, &ToolContext::default()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn found_summarizes_count() {
        assert_eq!(ToolResult::found("c", Vec::new()).output, "No matching records");
    }
}
