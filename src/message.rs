//! Messages and content blocks.
//!
//! A message keeps the upstream wire payload verbatim in `raw_content` and a
//! parsed [`ContentBlock`] list alongside it. Persistence only writes the raw
//! payload, so block shapes this build does not understand still round-trip
//! without loss.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// One parsed content block. Closed sum type; unknown upstream shapes are
/// skipped during parsing but survive in the message's raw payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        tool_use_id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
    },
    Image {
        media_reference: String,
    },
}

/// Tool result content is either a plain string or a structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Structured(serde_json::Value),
}

/// An immutable conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MessageRecord", into = "MessageRecord")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    /// Verbatim upstream payload, retained for lossless round-trips.
    pub raw_content: serde_json::Value,
    /// Blocks parsed from `raw_content`. Derived, never persisted directly.
    pub blocks: Vec<ContentBlock>,
}

/// Persisted shape: one of these per history line.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageRecord {
    id: String,
    role: Role,
    timestamp: DateTime<Utc>,
    raw_content: serde_json::Value,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        let blocks = parse_blocks(&record.raw_content);
        Self {
            id: record.id,
            role: record.role,
            timestamp: record.timestamp,
            raw_content: record.raw_content,
            blocks,
        }
    }
}

impl From<Message> for MessageRecord {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            timestamp: message.timestamp,
            raw_content: message.raw_content,
        }
    }
}

impl Message {
    /// Build a message from a raw upstream payload.
    pub fn from_raw(role: Role, raw_content: serde_json::Value) -> Self {
        let blocks = parse_blocks(&raw_content);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            timestamp: Utc::now(),
            raw_content,
            blocks,
        }
    }

    /// Build a plain text message.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::from_raw(role, serde_json::json!([{ "type": "text", "text": text }]))
    }

    /// Build a tool-use message.
    pub fn tool_use(
        tool_use_id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::from_raw(
            Role::Assistant,
            serde_json::json!([{
                "type": "tool_use",
                "tool_use_id": tool_use_id.into(),
                "name": name.into(),
                "input": input,
            }]),
        )
    }

    /// Build a tool-result message.
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::from_raw(
            Role::Tool,
            serde_json::json!([{
                "type": "tool_result",
                "tool_use_id": tool_use_id.into(),
                "content": content.into(),
            }]),
        )
    }

    /// Canonical textual form of this message, one line per block.
    ///
    /// Text blocks render as their text, tool use as
    /// `[tool_use: NAME(INPUT_JSON)]`, tool results as their string content,
    /// and images as the `[image]` sentinel.
    pub fn canonical_text(&self) -> String {
        let rendered: Vec<String> = self
            .blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.clone(),
                ContentBlock::ToolUse { name, input, .. } => {
                    format!("[tool_use: {name}({input})]")
                }
                ContentBlock::ToolResult { content, .. } => match content {
                    ToolResultContent::Text(text) => text.clone(),
                    ToolResultContent::Structured(value) => value.to_string(),
                },
                ContentBlock::Image { .. } => "[image]".to_string(),
            })
            .collect();
        rendered.join("\n")
    }
}

/// Parse content blocks out of a raw payload.
///
/// Accepts either a bare JSON string (one text block) or an array of tagged
/// block objects. Entries that fail to decode are skipped; the raw payload
/// still carries them.
pub fn parse_blocks(raw: &serde_json::Value) -> Vec<ContentBlock> {
    match raw {
        serde_json::Value::String(text) => vec![ContentBlock::Text { text: text.clone() }],
        serde_json::Value::Array(entries) => entries
            .iter()
            .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}
