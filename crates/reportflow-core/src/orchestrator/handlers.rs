//! Message handlers that run the orchestrator inside a `BaseAgent`

use crate::agents::{AgentState, BaseAgent, Message, MessageHandler, MessageType};
use crate::orchestrator::Orchestrator;
use async_trait::async_trait;
use reportflow_common::ReportflowError;
use serde_json::json;
use std::collections::VecDeque;
use tracing::{debug, error};

/// Job submission sent as a TASK
pub struct SubmitHandler;

/// Job control: `action` is `submit` (default), `status` or `cancel`
pub struct RequestHandler;

/// Stage RESULT
pub struct ResultHandler;

/// Stage ERROR
pub struct ErrorHandler;

#[async_trait]
impl MessageHandler<Orchestrator> for SubmitHandler {
    async fn handle(&self, agent: &mut BaseAgent<Orchestrator>, message: Message) -> anyhow::Result<()> {
        let out = agent.behavior_mut().submit(&message);
        deliver_all(agent, out).await;
        settle(agent).await
    }
}

#[async_trait]
impl MessageHandler<Orchestrator> for RequestHandler {
    async fn handle(&self, agent: &mut BaseAgent<Orchestrator>, message: Message) -> anyhow::Result<()> {
        let action = message.content()["action"]
            .as_str()
            .unwrap_or("submit")
            .to_ascii_lowercase();
        debug!("Orchestrator request {} ({})", message.id(), action);

        let out = match action.as_str() {
            "submit" => agent.behavior_mut().submit(&message),
            "status" => agent.behavior().status_of(&message),
            "cancel" => agent.behavior_mut().cancel(&message),
            other => {
                let err = ReportflowError::InvalidRequest(format!("unknown action: {}", other));
                vec![message.reply_from(
                    agent.agent_id(),
                    MessageType::Error,
                    json!({ "status": "REJECTED", "error": err.to_string() }),
                )]
            }
        };
        deliver_all(agent, out).await;
        settle(agent).await
    }
}

#[async_trait]
impl MessageHandler<Orchestrator> for ResultHandler {
    async fn handle(&self, agent: &mut BaseAgent<Orchestrator>, message: Message) -> anyhow::Result<()> {
        let out = agent.behavior_mut().on_result(&message);
        deliver_all(agent, out).await;
        settle(agent).await
    }
}

#[async_trait]
impl MessageHandler<Orchestrator> for ErrorHandler {
    async fn handle(&self, agent: &mut BaseAgent<Orchestrator>, message: Message) -> anyhow::Result<()> {
        let out = agent.behavior_mut().on_error(&message);
        deliver_all(agent, out).await;
        settle(agent).await
    }
}

/// Send scheduler output; an undeliverable TASK fails its job
async fn deliver_all(agent: &mut BaseAgent<Orchestrator>, messages: Vec<Message>) {
    let mut queue: VecDeque<Message> = messages.into();

    while let Some(message) = queue.pop_front() {
        let is_task = message.message_type() == MessageType::Task;
        let undelivered = message.clone();

        if let Err(e) = agent.deliver(message).await {
            if is_task {
                queue.extend(agent.behavior_mut().on_dispatch_failure(&undelivered, &e));
            } else {
                error!(
                    "Orchestrator could not deliver {} to {}: {}",
                    undelivered.message_type(),
                    undelivered.receiver(),
                    e
                );
            }
        }
    }
}

/// Running while any job is live, Completed once all have finished
async fn settle(agent: &mut BaseAgent<Orchestrator>) -> anyhow::Result<()> {
    if agent.behavior().active_jobs() > 0 {
        agent.begin_attempt().await?;
    } else if agent.state() == AgentState::Running {
        agent.update_state(AgentState::Completed).await?;
    }
    Ok(())
}
