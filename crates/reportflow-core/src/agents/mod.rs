//! Agent system for reportflow
//!
//! Every participant in a pipeline (stages, the orchestrator, the monitor) is a
//! `BaseAgent` with its own mailbox, driven by handlers registered per
//! message type.

use async_trait::async_trait;
use reportflow_common::Result;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;

pub mod base_agent;
pub mod builtin;
pub mod communication;
pub mod mailbox;
pub mod monitor;
pub mod registry;
pub mod stage;
pub mod state;

pub use base_agent::{AgentSettings, BaseAgent, DispatchOutcome, MessageHandler, MessageSender};
pub use builtin::{AnalysisStage, ResearchStage, ReviewStage, WritingStage};
pub use communication::{Message, MessageType, Metadata};
pub use mailbox::{Mailbox, SendMode};
pub use monitor::{AgentStatus, Monitor, MonitorHandle, StateChange, StatusHandler};
pub use registry::MailboxRegistry;
pub use stage::{Stage, StageTaskHandler};
pub use state::AgentState;

/// Core trait that all agents must implement
#[async_trait]
pub trait Agent: Send {
    /// Get the agent's unique identifier
    fn agent_id(&self) -> &str;

    /// Get the agent's role
    fn role(&self) -> &str;

    /// Current lifecycle state
    fn state(&self) -> AgentState;

    /// Send a message to another agent, returning the message id
    async fn send_message(
        &self,
        receiver: &str,
        message_type: MessageType,
        content: Value,
        metadata: Option<Metadata>,
    ) -> Result<String>;

    /// Send with an explicit backpressure mode instead of the send timeout
    async fn send_message_with_mode(
        &self,
        receiver: &str,
        message_type: MessageType,
        content: Value,
        metadata: Option<Metadata>,
        mode: SendMode,
    ) -> Result<String>;

    /// Receive the next message from this agent's mailbox
    async fn receive_message(&self, timeout: Option<Duration>) -> Option<Message>;

    /// Change lifecycle state and notify the monitor
    async fn update_state(&mut self, new_state: AgentState) -> Result<()>;

    /// Process at most one message
    async fn run_once(&mut self, timeout: Option<Duration>) -> DispatchOutcome;

    /// Process messages until shutdown is signalled
    async fn run(&mut self, shutdown: watch::Receiver<bool>);

    /// Drop pending work and return to idle
    async fn cleanup(&mut self);
}
