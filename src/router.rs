//! Channel routing: maps channel ids to channels and runs prompts through
//! the brain under each channel's serial lane.

use crate::brain::Brain;
use crate::error::{Result, RouterError};
use crate::history::{HistoryFactory, HistoryStore};
use crate::lane::LaneQueue;
use crate::message::{Message, Role};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// How many trailing history messages are offered to the brain per turn.
const DEFAULT_CONTEXT_TAIL: usize = 50;

/// Processing state of a channel's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Processing,
    Error,
}

/// Per-channel session state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Session {
    pub id: String,
    pub channel_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    fn new(channel_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel_id.to_string(),
            status: SessionStatus::Idle,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A named conversation stream with its own session and history.
pub struct Channel {
    pub id: String,
    session: RwLock<Session>,
    history: Option<Arc<dyn HistoryStore>>,
}

impl Channel {
    fn new(id: &str, history: Option<Arc<dyn HistoryStore>>) -> Self {
        Self {
            id: id.to_string(),
            session: RwLock::new(Session::new(id)),
            history,
        }
    }

    pub fn history(&self) -> Option<&Arc<dyn HistoryStore>> {
        self.history.as_ref()
    }

    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    async fn set_status(&self, status: SessionStatus) {
        let mut session = self.session.write().await;
        session.status = status;
        session.updated_at = Utc::now();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a channel.
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    pub id: String,
    pub session: Session,
}

type ReadMissHook = Arc<dyn Fn() + Send + Sync>;

/// Routes prompts to channels, creating channels lazily on first use.
pub struct Router {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    lanes: LaneQueue,
    brain: Arc<Brain>,
    history_factory: Option<HistoryFactory>,
    system_prompt: String,
    context_tail: usize,
    /// Test seam: runs between the read-side miss and the write-side
    /// re-check of channel creation, to force the lost-race path.
    after_read_miss: Option<ReadMissHook>,
}

/// Constructor-injected builder for [`Router`].
pub struct RouterBuilder {
    brain: Arc<Brain>,
    history_factory: Option<HistoryFactory>,
    system_prompt: String,
    context_tail: usize,
    after_read_miss: Option<ReadMissHook>,
}

impl RouterBuilder {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self {
            brain,
            history_factory: None,
            system_prompt: String::new(),
            context_tail: DEFAULT_CONTEXT_TAIL,
            after_read_miss: None,
        }
    }

    pub fn history_factory(mut self, factory: HistoryFactory) -> Self {
        self.history_factory = Some(factory);
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn context_tail(mut self, context_tail: usize) -> Self {
        self.context_tail = context_tail;
        self
    }

    pub fn after_read_miss(mut self, hook: ReadMissHook) -> Self {
        self.after_read_miss = Some(hook);
        self
    }

    pub fn build(self) -> Router {
        Router {
            channels: RwLock::new(HashMap::new()),
            lanes: LaneQueue::new(),
            brain: self.brain,
            history_factory: self.history_factory,
            system_prompt: self.system_prompt,
            context_tail: self.context_tail,
            after_read_miss: self.after_read_miss,
        }
    }
}

impl Router {
    pub fn builder(brain: Arc<Brain>) -> RouterBuilder {
        RouterBuilder::new(brain)
    }

    /// Route a prompt to a channel and return the assistant's reply.
    ///
    /// Per channel, the sequence is fixed: user message persisted, brain
    /// called, assistant message persisted on success, reply returned.
    /// Concurrent routes on the same channel are serialized FIFO; history
    /// persistence is best-effort and never turns into a caller-visible
    /// failure.
    #[tracing::instrument(skip(self, cancel, prompt))]
    pub async fn route(
        &self,
        cancel: &CancellationToken,
        channel_id: &str,
        prompt: &str,
    ) -> Result<String> {
        if channel_id.is_empty() {
            return Err(RouterError::EmptyChannelId.into());
        }

        let channel = self.ensure_channel(channel_id).await;
        let brain = self.brain.clone();
        let system_prompt = self.system_prompt.clone();
        let context_tail = self.context_tail;
        let work_cancel = cancel.clone();
        let prompt = prompt.to_string();

        self.lanes
            .run(cancel, channel_id, async move {
                channel.set_status(SessionStatus::Processing).await;

                let user_message = Message::text(Role::User, prompt.clone());
                if let Some(history) = channel.history()
                    && let Err(error) = history.append(&user_message).await
                {
                    tracing::warn!(
                        channel_id = %channel.id,
                        %error,
                        "failed to persist user message, continuing"
                    );
                }

                let result = match channel.history() {
                    Some(history) => {
                        let mut tail = match history.load_tail(context_tail).await {
                            Ok(tail) => tail,
                            Err(error) => {
                                tracing::warn!(
                                    channel_id = %channel.id,
                                    %error,
                                    "failed to load history tail, generating without it"
                                );
                                Vec::new()
                            }
                        };
                        // The append may have failed; the prompt must still
                        // reach the brain exactly once.
                        if tail.last().map(|message| message.id.as_str())
                            != Some(user_message.id.as_str())
                        {
                            tail.push(user_message.clone());
                        }
                        brain
                            .generate_with_context(&work_cancel, &tail, &system_prompt)
                            .await
                    }
                    None => brain.generate(&work_cancel, &prompt).await,
                };

                match result {
                    Ok(reply) => {
                        if let Some(history) = channel.history() {
                            let assistant_message = Message::text(Role::Assistant, reply.clone());
                            if let Err(error) = history.append(&assistant_message).await {
                                tracing::warn!(
                                    channel_id = %channel.id,
                                    %error,
                                    "failed to persist assistant message, reply still returned"
                                );
                            }
                        }
                        channel.set_status(SessionStatus::Idle).await;
                        Ok(reply)
                    }
                    Err(error) => {
                        channel.set_status(SessionStatus::Error).await;
                        Err(error)
                    }
                }
            })
            .await
    }

    /// Known channel ids, sorted.
    pub async fn active_channels(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Snapshot of a known channel.
    pub async fn get_channel(&self, channel_id: &str) -> Result<ChannelSnapshot> {
        let channels = self.channels.read().await;
        let channel = channels
            .get(channel_id)
            .ok_or_else(|| RouterError::ChannelNotFound {
                id: channel_id.to_string(),
            })?;
        Ok(ChannelSnapshot {
            id: channel.id.clone(),
            session: channel.session().await,
        })
    }

    /// Get or lazily create a channel. Double-checked: read-side fast path,
    /// then re-check under the write lock so a lost creation race reuses the
    /// winner's channel.
    async fn ensure_channel(&self, channel_id: &str) -> Arc<Channel> {
        if let Some(channel) = self.channels.read().await.get(channel_id) {
            return channel.clone();
        }

        if let Some(hook) = &self.after_read_miss {
            hook();
        }

        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get(channel_id) {
            return channel.clone();
        }

        let history = self
            .history_factory
            .as_ref()
            .map(|factory| factory(channel_id));
        let channel = Arc::new(Channel::new(channel_id, history));
        channels.insert(channel_id.to_string(), channel.clone());
        tracing::info!(channel_id, "channel created");
        channel
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").finish_non_exhaustive()
    }
}
