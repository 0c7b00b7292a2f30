//! Reportflow Core - agent messaging and pipeline scheduling
//!
//! This crate provides:
//! - Messages, bounded mailboxes and the routing registry
//! - The agent runtime with per-type handler dispatch and lifecycle states
//! - Pipeline stages and the orchestrator that schedules them
//! - The status monitor and the `ReportSystem` that wires everything together

pub mod agents;
pub mod orchestrator;
pub mod system;

// Re-export key types for convenience
pub use agents::{
    Agent, AgentState, AgentStatus, BaseAgent, Mailbox, MailboxRegistry, Message, MessageHandler,
    MessageSender, MessageType, MonitorHandle, SendMode, Stage,
};
pub use orchestrator::{JobStatus, Orchestrator, PipelineJob, ReportRequest};
pub use system::{ReportSystem, ReportSystemBuilder};
