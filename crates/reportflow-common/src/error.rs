//! Reportflow Common Error Types
//!
//! Centralized error handling for mailbox, routing and scheduling failures

use std::fmt;

/// Main error type for reportflow operations
#[derive(Debug)]
pub enum ReportflowError {
    /// Non-blocking send into a mailbox that is at capacity
    QueueFull { agent: String, capacity: usize },
    /// Blocking send or receive exceeded its deadline
    Timeout {
        operation: &'static str,
        agent: String,
        waited_ms: u64,
    },
    /// A handler failed while processing a message
    HandlerExecution {
        agent: String,
        message_type: String,
        reason: String,
    },
    /// Feedback or error retry bound exhausted for a job stage
    MaxRetriesExceeded {
        job_id: String,
        stage: String,
        retries: u32,
    },
    /// No handler registered for a message type
    UnroutableMessage { agent: String, message_type: String },
    /// No mailbox registered for the receiver identity
    UnknownRecipient(String),
    /// Transition not permitted by the agent lifecycle
    InvalidStateTransition {
        agent: String,
        from: String,
        to: String,
    },
    /// Malformed job submission or control request
    InvalidRequest(String),
    /// Configuration errors
    Config(String),
    /// IO-related errors
    Io(std::io::Error),
    /// Serialization/deserialization errors
    Serde(serde_json::Error),
    /// Generic error with message
    Generic(String),
}

impl fmt::Display for ReportflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportflowError::QueueFull { agent, capacity } => {
                write!(f, "Mailbox of {} is full (capacity {})", agent, capacity)
            }
            ReportflowError::Timeout {
                operation,
                agent,
                waited_ms,
            } => write!(
                f,
                "{} on mailbox of {} timed out after {}ms",
                operation, agent, waited_ms
            ),
            ReportflowError::HandlerExecution {
                agent,
                message_type,
                reason,
            } => write!(
                f,
                "Agent {} failed handling {} message: {}",
                agent, message_type, reason
            ),
            ReportflowError::MaxRetriesExceeded {
                job_id,
                stage,
                retries,
            } => write!(
                f,
                "Job {} exceeded max retries at stage {} after {} retries",
                job_id, stage, retries
            ),
            ReportflowError::UnroutableMessage {
                agent,
                message_type,
            } => write!(
                f,
                "Agent {} has no handler for {} messages",
                agent, message_type
            ),
            ReportflowError::UnknownRecipient(agent) => {
                write!(f, "No mailbox registered for {}", agent)
            }
            ReportflowError::InvalidStateTransition { agent, from, to } => {
                write!(f, "Agent {} cannot move from {} to {}", agent, from, to)
            }
            ReportflowError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ReportflowError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ReportflowError::Io(err) => write!(f, "IO error: {}", err),
            ReportflowError::Serde(err) => write!(f, "Serialization error: {}", err),
            ReportflowError::Generic(msg) => write!(f, "Reportflow error: {}", msg),
        }
    }
}

impl std::error::Error for ReportflowError {}

impl ReportflowError {
    /// Whether the caller can reasonably retry the failed operation
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ReportflowError::QueueFull { .. } | ReportflowError::Timeout { .. }
        )
    }
}

/// Convenience result type for reportflow operations
pub type Result<T> = std::result::Result<T, ReportflowError>;

impl From<std::io::Error> for ReportflowError {
    fn from(err: std::io::Error) -> Self {
        ReportflowError::Io(err)
    }
}

impl From<serde_json::Error> for ReportflowError {
    fn from(err: serde_json::Error) -> Self {
        ReportflowError::Serde(err)
    }
}

impl From<toml::de::Error> for ReportflowError {
    fn from(err: toml::de::Error) -> Self {
        ReportflowError::Config(err.to_string())
    }
}

impl From<anyhow::Error> for ReportflowError {
    fn from(err: anyhow::Error) -> Self {
        ReportflowError::Generic(err.to_string())
    }
}
