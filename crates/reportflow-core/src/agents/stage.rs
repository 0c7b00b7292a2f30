//! Stage contract: the domain logic a pipeline agent runs for each TASK

use crate::agents::{AgentState, BaseAgent, Message, MessageHandler, MessageType};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// One step of a report pipeline.
///
/// A stage receives the orchestrator's TASK content and produces the RESULT
/// content. The runtime around it handles lifecycle, correlation and
/// failure reporting.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// Stage name as used in the pipeline configuration
    fn name(&self) -> &str;

    /// Reject task content that lacks what this stage needs
    fn validate(&self, _task: &Value) -> anyhow::Result<()> {
        Ok(())
    }

    /// Run the stage on one task
    async fn execute(&mut self, task: &Value) -> anyhow::Result<Value>;

    /// Whether the stage parks in `Waiting` after a result, ready to be recalled with feedback
    fn awaits_feedback(&self) -> bool {
        false
    }
}

#[async_trait]
impl Stage for Box<dyn Stage> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn validate(&self, task: &Value) -> anyhow::Result<()> {
        (**self).validate(task)
    }

    async fn execute(&mut self, task: &Value) -> anyhow::Result<Value> {
        (**self).execute(task).await
    }

    fn awaits_feedback(&self) -> bool {
        (**self).awaits_feedback()
    }
}

/// TASK handler shared by every stage agent
pub struct StageTaskHandler;

#[async_trait]
impl<S: Stage> MessageHandler<S> for StageTaskHandler {
    async fn handle(&self, agent: &mut BaseAgent<S>, message: Message) -> anyhow::Result<()> {
        agent.begin_attempt().await?;

        let stage = agent.behavior().name().to_string();
        agent
            .behavior()
            .validate(message.content())
            .with_context(|| format!("{} rejected task {}", stage, message.id()))?;

        let output = agent.behavior_mut().execute(message.content()).await?;
        debug!(
            "Stage {} finished job {}",
            stage,
            message.job_id().unwrap_or("-")
        );

        agent
            .reply_to(&message, MessageType::Result, output)
            .await
            .context("failed to deliver stage result")?;
        agent.update_state(AgentState::Completed).await?;

        if agent.behavior().awaits_feedback() {
            agent.update_state(AgentState::Waiting).await?;
        }
        Ok(())
    }
}

/// Require `pointer` (a JSON pointer) to resolve to a non-null value
pub(crate) fn require(task: &Value, pointer: &str, what: &str) -> anyhow::Result<()> {
    match task.pointer(pointer) {
        Some(Value::Null) | None => anyhow::bail!("missing {}", what),
        Some(_) => Ok(()),
    }
}
