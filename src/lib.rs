//! Switchboard: a local-first agent runtime.
//!
//! Prompts arrive from channel adapters, are serialized per channel on a
//! [`lane::LaneQueue`], and run through the [`brain::Brain`], which enriches
//! them with long-term memory and windowed history before walking an ordered
//! provider chain. A cron [`scheduler::Scheduler`] injects synthetic system
//! events through the same brain, and a schema-validating
//! [`tools::ToolDispatcher`] fronts the model's function-calling surface.

pub mod brain;
pub mod config;
pub mod context;
pub mod error;
pub mod history;
pub mod lane;
pub mod llm;
pub mod memory;
pub mod message;
pub mod router;
pub mod scheduler;
pub mod tokenizer;
pub mod tools;

pub use error::{Error, Result};

pub use brain::Brain;
pub use context::ContextManager;
pub use history::{HistoryFactory, HistoryStore, JsonlHistoryStore};
pub use lane::LaneQueue;
pub use memory::MemoryStore;
pub use message::{ContentBlock, Message, Role};
pub use router::{Router, Session, SessionStatus};
pub use scheduler::{Job, Scheduler};
pub use tokenizer::Tokenizer;
pub use tools::{Tool, ToolDispatcher, ToolResult};
