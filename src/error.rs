//! Top-level error types for Switchboard.

use std::fmt;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Work was cancelled before it completed. Never retried, never aggregated.
    #[error("operation cancelled")]
    Cancelled,

    /// A deadline elapsed before work completed. Treated like cancellation.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Lane(#[from] LaneError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error is a cancellation or deadline kind.
    ///
    /// Cancellation errors short-circuit provider failover and are never
    /// retried by the retry wrapper.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

/// Lane queue errors.
#[derive(Debug, thiserror::Error)]
pub enum LaneError {
    #[error("lane id must not be empty")]
    EmptyLaneId,

    #[error("lane worker panicked: {0}")]
    Panic(String),

    #[error("lane queue closed")]
    Closed,
}

/// Channel routing errors.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("channel id must not be empty")]
    EmptyChannelId,

    #[error("channel {id} not found")]
    ChannelNotFound { id: String },
}

/// LLM provider and prompt-assembly errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider request failed: {0}")]
    ProviderRequest(String),

    #[error("provider returned an empty completion")]
    EmptyCompletion,

    #[error("missing API key for provider: {0}")]
    MissingProviderKey(String),

    #[error("unknown provider kind: {0}")]
    UnknownProviderKind(String),

    #[error("unknown tokenizer encoding: {0}")]
    UnknownEncoding(String),

    #[error("no providers configured")]
    NoProviders,

    #[error("{0}")]
    AllProvidersFailed(ProviderFailures),
}

/// The full set of underlying errors from an exhausted failover chain.
///
/// Every provider's error is carried, not just the last one, so post-mortem
/// diagnosis can see the whole chain.
#[derive(Debug)]
pub struct ProviderFailures(pub Vec<Error>);

impl fmt::Display for ProviderFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} providers failed: ", self.0.len())?;
        for (index, error) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

/// Scheduler and cron engine errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("job id must not be empty")]
    EmptyJobId,

    #[error("job cron expression must not be empty")]
    EmptyCron,

    #[error("job prompt must not be empty")]
    EmptyPrompt,

    #[error("job {0} is already registered")]
    DuplicateJob(String),

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },
}

/// Tool registry and dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool {0} is already registered")]
    DuplicateTool(String),

    #[error("invalid schema for tool {tool}: {reason}")]
    InvalidSchema { tool: String, reason: String },

    #[error("arguments for tool {tool} failed schema validation: {details}")]
    SchemaValidation { tool: String, details: String },

    #[error("tool {tool} panicked: {message}")]
    Panic { tool: String, message: String },
}

/// History and memory persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to append to {path}: {source}")]
    Append {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to encode message {id}: {source}")]
    Encode {
        id: String,
        source: serde_json::Error,
    },
}
