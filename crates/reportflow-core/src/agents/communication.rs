//! Communication primitives for agent messaging

use chrono::{DateTime, Utc};
use reportflow_common::{generate_id, metadata_keys};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::agents::AgentState;

/// Correlation data attached to a message (job id, stage, attempt, provenance)
pub type Metadata = HashMap<String, Value>;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Types of messages that can be sent between agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Work assigned to a stage
    Task,

    /// Successful outcome of a task
    Result,

    /// Failed outcome of a task
    Error,

    /// Lifecycle update addressed to the monitor
    Status,

    /// Job submission or job control request
    Request,

    /// Answer to a request, including terminal job outcomes
    Response,
}

impl MessageType {
    pub const ALL: [MessageType; 6] = [
        MessageType::Task,
        MessageType::Result,
        MessageType::Error,
        MessageType::Status,
        MessageType::Request,
        MessageType::Response,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Task => "TASK",
            MessageType::Result => "RESULT",
            MessageType::Error => "ERROR",
            MessageType::Status => "STATUS",
            MessageType::Request => "REQUEST",
            MessageType::Response => "RESPONSE",
        }
    }

    /// RESULT and ERROR end the processing of a TASK
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageType::Result | MessageType::Error)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message sent between agents.
///
/// Messages are immutable once built: fields are only readable through
/// accessors, and corrections are expressed as new messages. The `content`
/// payload is opaque to routing; the handler for each `MessageType` owns its
/// interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: String,

    #[serde(rename = "type")]
    message_type: MessageType,

    sender: String,

    receiver: String,

    content: Value,

    timestamp: DateTime<Utc>,

    /// Process-wide construction order, used as the ordering tie-break
    sequence: u64,

    #[serde(default)]
    metadata: Metadata,
}

impl Message {
    /// Create a new message with a fresh id and the current timestamp
    pub fn new(
        message_type: MessageType,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            id: generate_id(),
            message_type,
            sender: sender.into(),
            receiver: receiver.into(),
            content,
            timestamp: Utc::now(),
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            metadata: Metadata::new(),
        }
    }

    /// Create a new task message
    pub fn task(sender: impl Into<String>, receiver: impl Into<String>, task: Value) -> Self {
        Self::new(MessageType::Task, sender, receiver, task)
    }

    /// Create a new result message
    pub fn result(sender: impl Into<String>, receiver: impl Into<String>, result: Value) -> Self {
        Self::new(MessageType::Result, sender, receiver, result)
    }

    /// Create a new error message
    pub fn error(sender: impl Into<String>, receiver: impl Into<String>, error: Value) -> Self {
        Self::new(MessageType::Error, sender, receiver, error)
    }

    /// Create a status message announcing a state change
    pub fn status(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        state: AgentState,
        previous: AgentState,
    ) -> Self {
        Self::new(
            MessageType::Status,
            sender,
            receiver,
            serde_json::json!({
                "state": state,
                "previous": previous,
            }),
        )
    }

    /// Create a new request message
    pub fn request(sender: impl Into<String>, receiver: impl Into<String>, request: Value) -> Self {
        Self::new(MessageType::Request, sender, receiver, request)
    }

    /// Create a new response message
    pub fn response(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        response: Value,
    ) -> Self {
        Self::new(MessageType::Response, sender, receiver, response)
    }

    /// Attach a metadata entry while the message is being built
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach several metadata entries while the message is being built
    pub fn with_metadata_map(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Build a reply addressed to this message's sender.
    ///
    /// The reply carries the same job correlation metadata and records the
    /// id of the message it answers.
    pub fn reply(&self, message_type: MessageType, content: Value) -> Message {
        let mut reply = Message::new(message_type, &self.receiver, &self.sender, content);
        for key in [
            metadata_keys::JOB_ID,
            metadata_keys::STAGE,
            metadata_keys::ATTEMPT,
        ] {
            if let Some(value) = self.metadata.get(key) {
                reply.metadata.insert(key.to_string(), value.clone());
            }
        }
        reply.with_metadata(metadata_keys::IN_REPLY_TO, self.id.clone())
    }

    /// Same as `reply`, but sent from an explicit identity
    pub fn reply_from(
        &self,
        sender: impl Into<String>,
        message_type: MessageType,
        content: Value,
    ) -> Message {
        let mut reply = self.reply(message_type, content);
        reply.sender = sender.into();
        reply
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn into_content(self) -> Value {
        self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Job correlation id, if the message belongs to a pipeline job
    pub fn job_id(&self) -> Option<&str> {
        self.metadata_str(metadata_keys::JOB_ID)
    }

    /// Pipeline stage the message was dispatched for
    pub fn stage(&self) -> Option<&str> {
        self.metadata_str(metadata_keys::STAGE)
    }

    /// Dispatch counter of the job at the time the task was sent
    pub fn attempt(&self) -> Option<u64> {
        self.metadata
            .get(metadata_keys::ATTEMPT)
            .and_then(Value::as_u64)
    }
}
