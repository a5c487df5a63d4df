//! Tool registry and dispatch with schema-gated invocation.

pub mod subagent;

use crate::error::{Result, ToolError};
use async_trait::async_trait;
use futures::FutureExt as _;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// A schema-described callable exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// JSON Schema for the tool's argument object. Arguments are always a
    /// JSON object at the top level.
    fn schema(&self) -> serde_json::Value;

    /// Invoke the tool. Only called with arguments that passed validation.
    async fn call(&self, args: serde_json::Value) -> Result<ToolResult>;
}

/// Descriptor handed to the model's function-calling surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub json_schema: serde_json::Value,
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolResult {
    /// String rendering handed back to the model.
    pub data: String,
    /// Observability metadata; never shown to the model.
    pub metadata: HashMap<String, String>,
}

impl ToolResult {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: jsonschema::Validator,
}

/// Validates tool calls against declared schemas and dispatches them.
#[derive(Default)]
pub struct ToolDispatcher {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its schema. Names are unique.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool(name).into());
        }

        let schema = tool.schema();
        let validator =
            jsonschema::validator_for(&schema).map_err(|error| ToolError::InvalidSchema {
                tool: name.clone(),
                reason: error.to_string(),
            })?;

        tracing::debug!(tool = %name, "tool registered");
        self.tools.insert(name, RegisteredTool { tool, validator });
        Ok(())
    }

    /// Tool descriptors for model consumption, sorted by name.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|registered| ToolDefinition {
                name: registered.tool.name().to_string(),
                description: registered.tool.description().to_string(),
                json_schema: registered.tool.schema(),
            })
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Validate `raw_args` against the named tool's schema and invoke it.
    ///
    /// Unknown names and rejected arguments return without side effects —
    /// the tool is never called. A panicking tool is caught here and the
    /// dispatcher stays usable.
    #[tracing::instrument(skip(self, raw_args))]
    pub async fn handle_tool_call(&self, name: &str, raw_args: &str) -> Result<ToolResult> {
        let registered = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let args: serde_json::Value =
            serde_json::from_str(raw_args).map_err(|error| ToolError::SchemaValidation {
                tool: name.to_string(),
                details: format!("arguments are not valid JSON: {error}"),
            })?;

        let violations: Vec<String> = registered
            .validator
            .iter_errors(&args)
            .map(|error| error.to_string())
            .collect();
        if !violations.is_empty() {
            return Err(ToolError::SchemaValidation {
                tool: name.to_string(),
                details: violations.join("; "),
            }
            .into());
        }

        match AssertUnwindSafe(registered.tool.call(args)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(ToolError::Panic {
                tool: name.to_string(),
                message: crate::lane::panic_message(payload.as_ref()),
            }
            .into()),
        }
    }
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}
