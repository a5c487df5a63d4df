//! Sub-agent tool: an isolated one-shot secondary generation.

use crate::error::Result;
use crate::llm::Provider;
use crate::tools::{Tool, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct SubAgentArgs {
    role: String,
    task: String,
}

/// Spawns an isolated secondary generation with its own system framing.
///
/// No memory injection, no history, no context manager — the sub-agent sees
/// only the role and the task.
pub struct SubAgentTool {
    provider: Arc<dyn Provider>,
}

impl SubAgentTool {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        "subagent"
    }

    fn description(&self) -> &str {
        "Run an isolated sub-agent with a given role on a single task and return its output."
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "role": {
                    "type": "string",
                    "description": "System role the sub-agent assumes, e.g. 'terse code reviewer'.",
                },
                "task": {
                    "type": "string",
                    "description": "The single task the sub-agent performs.",
                },
            },
            "required": ["role", "task"],
        })
    }

    #[tracing::instrument(skip(self, args))]
    async fn call(&self, args: serde_json::Value) -> Result<ToolResult> {
        let args: SubAgentArgs =
            serde_json::from_value(args).map_err(|error| anyhow::anyhow!(error))?;

        let prompt = format!(
            "[System]\n{}\n[End System]\n\n[Task]\n{}\n[End Task]",
            args.role, args.task
        );

        tracing::info!(role = %args.role, "spawning sub-agent");
        let output = self
            .provider
            .generate(&CancellationToken::new(), &prompt)
            .await?;

        Ok(ToolResult::new(output).with_metadata("role", args.role))
    }
}

impl std::fmt::Debug for SubAgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubAgentTool")
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoProvider;
    use crate::tools::ToolDispatcher;

    #[tokio::test]
    async fn builds_the_isolation_prompt() {
        let tool = SubAgentTool::new(Arc::new(EchoProvider));
        let result = tool
            .call(serde_json::json!({ "role": "grumpy librarian", "task": "sort the shelf" }))
            .await
            .unwrap();

        assert_eq!(
            result.data,
            "[System]\ngrumpy librarian\n[End System]\n\n[Task]\nsort the shelf\n[End Task]"
        );
        assert_eq!(result.metadata.get("role").unwrap(), "grumpy librarian");
    }

    #[tokio::test]
    async fn dispatcher_enforces_required_fields() {
        let mut dispatcher = ToolDispatcher::new();
        dispatcher
            .register(Arc::new(SubAgentTool::new(Arc::new(EchoProvider))))
            .unwrap();

        let error = dispatcher
            .handle_tool_call("subagent", r#"{"role": "helper"}"#)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("schema validation"));

        let result = dispatcher
            .handle_tool_call("subagent", r#"{"role": "helper", "task": "count to three"}"#)
            .await
            .unwrap();
        assert!(result.data.contains("[Task]\ncount to three\n[End Task]"));
    }
}
