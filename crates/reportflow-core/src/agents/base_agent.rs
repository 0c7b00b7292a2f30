//! Base agent runtime: mailbox loop, handler dispatch and lifecycle

use crate::agents::{Agent, AgentState, Mailbox, Message, MessageType, Metadata, SendMode};
use async_trait::async_trait;
use futures::FutureExt;
use reportflow_common::{MONITOR_ID, MailboxConfig, ReportflowError, Result};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Trait for sending messages (implemented by the mailbox registry)
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, message: Message, mode: SendMode) -> Result<()>;
}

/// Handler invoked for one message type.
///
/// Handlers may emit follow-up messages and drive the agent's state through
/// the `BaseAgent` they are given. Returning `Err` marks the agent `Error`
/// and sends an ERROR message back to the original sender.
#[async_trait]
pub trait MessageHandler<B: Send + Sync + 'static>: Send + Sync {
    async fn handle(&self, agent: &mut BaseAgent<B>, message: Message) -> anyhow::Result<()>;
}

/// What a single turn of the message loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No message arrived before the timeout
    Idle,

    /// The handler for this type completed
    Handled(MessageType),

    /// No handler registered; the message was logged and discarded
    Unroutable(MessageType),

    /// The handler failed; an ERROR was sent back to the sender
    Failed(MessageType),
}

/// Runtime settings shared by every agent
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Deadline for sends that block under backpressure
    pub send_timeout: Duration,

    /// Idle wake-up used by `run` to observe shutdown
    pub poll_interval: Duration,

    /// Identity that receives STATUS messages
    pub monitor_id: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        AgentSettings::from(&MailboxConfig::default())
    }
}

impl From<&MailboxConfig> for AgentSettings {
    fn from(config: &MailboxConfig) -> Self {
        Self {
            send_timeout: config.send_timeout(),
            poll_interval: config.poll_interval(),
            monitor_id: MONITOR_ID.to_string(),
        }
    }
}

/// A base implementation of an Agent.
///
/// Owns one mailbox, one lifecycle state and one dispatch table. `B` is the
/// agent's own behaviour (a pipeline stage, the orchestrator, the monitor)
/// and is only reachable through its handlers.
pub struct BaseAgent<B> {
    /// Identity used for routing
    id: String,

    /// Role or type of this agent (e.g., "research", "orchestrator")
    role: String,

    state: AgentState,

    mailbox: Arc<Mailbox>,

    /// Message sender (injected by the registry owner)
    sender: Arc<dyn MessageSender>,

    handlers: HashMap<MessageType, Arc<dyn MessageHandler<B>>>,

    behavior: B,

    settings: AgentSettings,
}

impl<B: Send + Sync + 'static> BaseAgent<B> {
    /// Create a new base agent around its mailbox
    pub fn new(
        id: impl Into<String>,
        role: impl Into<String>,
        mailbox: Arc<Mailbox>,
        sender: Arc<dyn MessageSender>,
        behavior: B,
        settings: AgentSettings,
    ) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            state: AgentState::Idle,
            mailbox,
            sender,
            handlers: HashMap::new(),
            behavior,
            settings,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    pub fn behavior_mut(&mut self) -> &mut B {
        &mut self.behavior
    }

    /// Associate a handler with a message type, replacing any previous one
    pub fn register_handler(&mut self, message_type: MessageType, handler: Arc<dyn MessageHandler<B>>) {
        if self.handlers.insert(message_type, handler).is_some() {
            debug!("Agent {} replaced its {} handler", self.id, message_type);
        }
    }

    pub fn has_handler(&self, message_type: MessageType) -> bool {
        self.handlers.contains_key(&message_type)
    }

    /// Build a message from this agent and enqueue it at `receiver`.
    ///
    /// Blocks under backpressure up to the configured send timeout. Returns
    /// the id of the sent message.
    pub async fn send_message(
        &self,
        receiver: &str,
        message_type: MessageType,
        content: Value,
        metadata: Option<Metadata>,
    ) -> Result<String> {
        let mode = SendMode::blocking(self.settings.send_timeout);
        self.send_message_with_mode(receiver, message_type, content, metadata, mode)
            .await
    }

    /// Same as `send_message` with an explicit backpressure mode
    pub async fn send_message_with_mode(
        &self,
        receiver: &str,
        message_type: MessageType,
        content: Value,
        metadata: Option<Metadata>,
        mode: SendMode,
    ) -> Result<String> {
        let message = Message::new(message_type, &self.id, receiver, content)
            .with_metadata_map(metadata.unwrap_or_default());
        let id = message.id().to_string();
        self.deliver_with_mode(message, mode).await?;
        Ok(id)
    }

    /// Reply to `original` with the same correlation metadata
    pub async fn reply_to(
        &self,
        original: &Message,
        message_type: MessageType,
        content: Value,
    ) -> Result<()> {
        let reply = original.reply_from(&self.id, message_type, content);
        self.deliver(reply).await
    }

    /// Enqueue an already built message, blocking up to the send timeout
    pub async fn deliver(&self, message: Message) -> Result<()> {
        self.deliver_with_mode(message, SendMode::blocking(self.settings.send_timeout))
            .await
    }

    /// Enqueue an already built message with an explicit backpressure mode
    pub async fn deliver_with_mode(&self, message: Message, mode: SendMode) -> Result<()> {
        self.sender.send_message(message, mode).await
    }

    /// Wait for the next message in this agent's own mailbox
    pub async fn receive_message(&self, timeout: Option<Duration>) -> Option<Message> {
        self.mailbox.receive(timeout).await
    }

    /// Move to `new_state` and announce it to the monitor.
    ///
    /// Re-entering the current state is a no-op. The STATUS message is sent
    /// without blocking; a failed delivery is logged and otherwise ignored.
    pub async fn update_state(&mut self, new_state: AgentState) -> Result<()> {
        if self.state == new_state {
            return Ok(());
        }

        if !self.state.can_transition_to(new_state) {
            warn!(
                "Agent {} rejected transition {} -> {}",
                self.id, self.state, new_state
            );
            return Err(ReportflowError::InvalidStateTransition {
                agent: self.id.clone(),
                from: self.state.to_string(),
                to: new_state.to_string(),
            });
        }

        let old_state = std::mem::replace(&mut self.state, new_state);
        info!("Agent {} state changed from {} to {}", self.id, old_state, new_state);
        self.publish_status(old_state, new_state).await;
        Ok(())
    }

    /// Enter `Running` for a new task attempt.
    ///
    /// Settled agents pass through `Idle` first; a `Waiting` agent is recalled
    /// directly. An agent already running stays as it is.
    pub async fn begin_attempt(&mut self) -> Result<()> {
        match self.state {
            AgentState::Running => Ok(()),
            AgentState::Idle | AgentState::Waiting => self.update_state(AgentState::Running).await,
            settled => {
                debug_assert!(settled.is_settled());
                self.update_state(AgentState::Idle).await?;
                self.update_state(AgentState::Running).await
            }
        }
    }

    /// Dequeue one message and dispatch it to its handler
    pub async fn run_once(&mut self, timeout: Option<Duration>) -> DispatchOutcome {
        match self.mailbox.receive(timeout).await {
            Some(message) => self.dispatch(message).await,
            None => DispatchOutcome::Idle,
        }
    }

    /// Dispatch a message to the handler registered for its type
    pub async fn dispatch(&mut self, message: Message) -> DispatchOutcome {
        let message_type = message.message_type();

        let Some(handler) = self.handlers.get(&message_type).cloned() else {
            let err = ReportflowError::UnroutableMessage {
                agent: self.id.clone(),
                message_type: message_type.to_string(),
            };
            warn!("{}; discarding {} from {}", err, message.id(), message.sender());
            return DispatchOutcome::Unroutable(message_type);
        };

        debug!(
            "Agent {} handling {} {} from {}",
            self.id,
            message_type,
            message.id(),
            message.sender()
        );

        let original = message.clone();
        let outcome = AssertUnwindSafe(handler.handle(self, message))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => DispatchOutcome::Handled(message_type),
            Ok(Err(e)) => {
                self.report_failure(&original, format!("{:#}", e)).await;
                DispatchOutcome::Failed(message_type)
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                self.report_failure(&original, reason).await;
                DispatchOutcome::Failed(message_type)
            }
        }
    }

    /// Process messages until `shutdown` flips to true
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) {
        info!("Agent {} ({}) started", self.id, self.role);
        let poll = self.settings.poll_interval;

        while !*shutdown.borrow() {
            self.run_once(Some(poll)).await;
        }

        info!(
            "Agent {} stopped with {} unprocessed messages",
            self.id,
            self.mailbox.len()
        );
    }

    /// Drop queued messages and return to `Idle`
    pub async fn cleanup(&mut self) {
        info!("Cleaning up agent {}", self.id);
        let dropped = self.mailbox.clear();
        if dropped > 0 {
            debug!("Agent {} discarded {} queued messages", self.id, dropped);
        }

        if self.state == AgentState::Running {
            // an abandoned attempt ends as a failure
            let _ = self.update_state(AgentState::Error).await;
        }
        let _ = self.update_state(AgentState::Idle).await;
    }

    async fn report_failure(&mut self, original: &Message, reason: String) {
        let failure = ReportflowError::HandlerExecution {
            agent: self.id.clone(),
            message_type: original.message_type().to_string(),
            reason: reason.clone(),
        };
        error!("{}", failure);

        if self.state.can_transition_to(AgentState::Error) {
            let _ = self.update_state(AgentState::Error).await;
        }

        // Never answer ERROR or STATUS with ERROR; two failing peers would ping-pong.
        if matches!(
            original.message_type(),
            MessageType::Error | MessageType::Status
        ) {
            return;
        }

        let content = json!({
            "error": failure.to_string(),
            "reason": reason,
            "agent": self.id,
            "role": self.role,
            "message_type": original.message_type(),
            "task": original.content(),
        });
        if let Err(e) = self.reply_to(original, MessageType::Error, content).await {
            error!(
                "Agent {} could not report failure to {}: {}",
                self.id,
                original.sender(),
                e
            );
        }
    }

    async fn publish_status(&self, old_state: AgentState, new_state: AgentState) {
        if self.id == self.settings.monitor_id {
            return;
        }

        let status = Message::status(&self.id, &self.settings.monitor_id, new_state, old_state);
        if let Err(e) = self
            .deliver_with_mode(status, SendMode::NonBlocking)
            .await
        {
            warn!("Agent {} failed to publish status {}: {}", self.id, new_state, e);
        }
    }
}

#[async_trait]
impl<B: Send + Sync + 'static> Agent for BaseAgent<B> {
    fn agent_id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> &str {
        &self.role
    }

    fn state(&self) -> AgentState {
        self.state
    }

    async fn send_message(
        &self,
        receiver: &str,
        message_type: MessageType,
        content: Value,
        metadata: Option<Metadata>,
    ) -> Result<String> {
        BaseAgent::send_message(self, receiver, message_type, content, metadata).await
    }

    async fn send_message_with_mode(
        &self,
        receiver: &str,
        message_type: MessageType,
        content: Value,
        metadata: Option<Metadata>,
        mode: SendMode,
    ) -> Result<String> {
        BaseAgent::send_message_with_mode(self, receiver, message_type, content, metadata, mode).await
    }

    async fn receive_message(&self, timeout: Option<Duration>) -> Option<Message> {
        BaseAgent::receive_message(self, timeout).await
    }

    async fn update_state(&mut self, new_state: AgentState) -> Result<()> {
        BaseAgent::update_state(self, new_state).await
    }

    async fn run_once(&mut self, timeout: Option<Duration>) -> DispatchOutcome {
        BaseAgent::run_once(self, timeout).await
    }

    async fn run(&mut self, shutdown: watch::Receiver<bool>) {
        BaseAgent::run(self, shutdown).await
    }

    async fn cleanup(&mut self) {
        BaseAgent::cleanup(self).await
    }
}
