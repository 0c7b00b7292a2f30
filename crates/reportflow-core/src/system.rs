//! Wiring: one mailbox and one tokio task per agent, plus a client endpoint

use crate::agents::{
    Agent, AgentSettings, AnalysisStage, BaseAgent, Mailbox, MailboxRegistry, Message,
    MessageSender, MessageType, Monitor, MonitorHandle, ResearchStage, ReviewStage, SendMode,
    Stage, StageTaskHandler, StatusHandler, WritingStage,
};
use crate::orchestrator::{
    ErrorHandler, Orchestrator, ReportRequest, RequestHandler, ResultHandler, SubmitHandler,
};
use futures::future::join_all;
use reportflow_common::{
    CLIENT_ID, MONITOR_ID, ORCHESTRATOR_ID, PipelineConfig, ReportflowError, Result,
    generate_timestamped_id, metadata_keys, reply_kinds,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Collects the stages of a system before it is launched
pub struct ReportSystemBuilder {
    config: PipelineConfig,
    stages: Vec<Box<dyn Stage>>,
}

impl ReportSystemBuilder {
    /// Add a stage; its agent identity comes from `pipeline.stage_agents`
    pub fn stage<S: Stage>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Add the placeholder research, analysis, writing and review stages
    pub fn with_builtin_stages(self) -> Self {
        self.stage(ResearchStage)
            .stage(AnalysisStage)
            .stage(WritingStage::default())
            .stage(ReviewStage::default())
    }

    /// Register every mailbox and start every agent loop
    pub async fn launch(self) -> Result<ReportSystem> {
        let ReportSystemBuilder { config, stages } = self;
        config.validate()?;

        for required in config.pipeline.all_stages() {
            if !stages.iter().any(|s| s.name() == required) {
                return Err(ReportflowError::Config(format!(
                    "no stage registered for {}",
                    required
                )));
            }
        }

        let registry = MailboxRegistry::new();
        let sender: Arc<dyn MessageSender> = Arc::new(registry.clone());
        let settings = AgentSettings::from(&config.mailbox);
        let capacity = config.mailbox.capacity;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let monitor = Monitor::new(config.monitor.history_limit);
        let monitor_handle = monitor.handle();
        let mut monitor_agent = BaseAgent::new(
            MONITOR_ID,
            "monitor",
            registry.register(MONITOR_ID, capacity).await?,
            sender.clone(),
            monitor,
            settings.clone(),
        );
        monitor_agent.register_handler(MessageType::Status, Arc::new(StatusHandler));
        tasks.push(spawn_agent(monitor_agent, shutdown_rx.clone()));

        let orchestrator = Orchestrator::new(
            ORCHESTRATOR_ID,
            config.pipeline.clone(),
            config.retry.clone(),
        )
        .with_finished_job_limit(config.retention.max_finished_jobs);
        let mut orchestrator_agent = BaseAgent::new(
            ORCHESTRATOR_ID,
            "orchestrator",
            registry.register(ORCHESTRATOR_ID, capacity).await?,
            sender.clone(),
            orchestrator,
            settings.clone(),
        );
        orchestrator_agent.register_handler(MessageType::Task, Arc::new(SubmitHandler));
        orchestrator_agent.register_handler(MessageType::Request, Arc::new(RequestHandler));
        orchestrator_agent.register_handler(MessageType::Result, Arc::new(ResultHandler));
        orchestrator_agent.register_handler(MessageType::Error, Arc::new(ErrorHandler));
        tasks.push(spawn_agent(orchestrator_agent, shutdown_rx.clone()));

        for stage in stages {
            let role = stage.name().to_string();
            let identity = config.pipeline.agent_for(&role).to_string();
            let mailbox = registry.register(&identity, capacity).await?;

            let mut agent = BaseAgent::new(
                identity,
                role,
                mailbox,
                sender.clone(),
                stage,
                settings.clone(),
            );
            agent.register_handler(MessageType::Task, Arc::new(StageTaskHandler));
            tasks.push(spawn_agent(agent, shutdown_rx.clone()));
        }

        let client = registry.register(CLIENT_ID, capacity).await?;
        info!(
            "Report system started with agents {:?}",
            registry.identities().await
        );

        Ok(ReportSystem {
            registry,
            client,
            monitor: monitor_handle,
            settings,
            shutdown: shutdown_tx,
            tasks,
            outcomes: Mutex::new(UnclaimedOutcomes::new(
                config.retention.max_unclaimed_outcomes,
            )),
        })
    }
}

fn spawn_agent<A: Agent + 'static>(mut agent: A, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        agent.run(shutdown).await;
        agent.cleanup().await;
    })
}

/// A running pipeline: submit requests, wait for outcomes, observe agents
pub struct ReportSystem {
    registry: MailboxRegistry,
    client: Arc<Mailbox>,
    monitor: MonitorHandle,
    settings: AgentSettings,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    /// Terminal outcomes received while waiting for a different job
    outcomes: Mutex<UnclaimedOutcomes>,
}

impl ReportSystem {
    pub fn builder(config: PipelineConfig) -> ReportSystemBuilder {
        ReportSystemBuilder {
            config,
            stages: Vec::new(),
        }
    }

    pub fn monitor(&self) -> &MonitorHandle {
        &self.monitor
    }

    pub fn registry(&self) -> &MailboxRegistry {
        &self.registry
    }

    /// Submit a report request, returning its job id
    pub async fn submit(&self, request: &ReportRequest) -> Result<String> {
        let job_id = generate_timestamped_id(Some("job"));
        let mut content = request.to_content();
        content["action"] = json!("submit");

        let message = Message::request(CLIENT_ID, ORCHESTRATOR_ID, content)
            .with_metadata(metadata_keys::JOB_ID, job_id.clone());
        self.registry
            .send_message(message, SendMode::blocking(self.settings.send_timeout))
            .await?;

        info!(
            "Submitted job {} ({} report on {})",
            job_id, request.report_type, request.target
        );
        Ok(job_id)
    }

    /// Ask the orchestrator to stop advancing a job
    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        let message = Message::request(
            CLIENT_ID,
            ORCHESTRATOR_ID,
            json!({ "action": "cancel", "job_id": job_id }),
        );
        self.registry
            .send_message(message, SendMode::blocking(self.settings.send_timeout))
            .await
    }

    /// Wait for the terminal RESPONSE or ERROR of one job.
    ///
    /// Outcomes of other jobs that arrive meanwhile are kept for their own
    /// `wait_for` call, up to `retention.max_unclaimed_outcomes`.
    pub async fn wait_for(&self, job_id: &str, timeout: Duration) -> Result<Message> {
        if let Some(outcome) = self.take_outcome(job_id) {
            return Ok(outcome);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(message) = self.client.receive(Some(remaining)).await else {
                return Err(ReportflowError::Timeout {
                    operation: "wait_for",
                    agent: CLIENT_ID.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                });
            };

            if !is_outcome(&message) {
                debug!(
                    "Client ignoring {} {} from {}",
                    message.message_type(),
                    message.id(),
                    message.sender()
                );
                continue;
            }

            let Some(outcome_job) = message.job_id().map(str::to_string) else {
                warn!("Client received outcome {} without job id", message.id());
                continue;
            };
            if outcome_job == job_id {
                return Ok(message);
            }
            self.outcomes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .stash(outcome_job, message);
        }
    }

    /// Signal every agent loop to stop and wait for them to exit
    pub async fn shutdown(self) {
        info!("Shutting down report system");
        let _ = self.shutdown.send(true);
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!("Agent task ended abnormally: {}", e);
            }
        }
    }

    fn take_outcome(&self, job_id: &str) -> Option<Message> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take(job_id)
    }
}

/// Outcomes waiting to be claimed, evicting the oldest past the limit
struct UnclaimedOutcomes {
    by_job: HashMap<String, Message>,
    order: VecDeque<String>,
    limit: usize,
}

impl UnclaimedOutcomes {
    fn new(limit: usize) -> Self {
        Self {
            by_job: HashMap::new(),
            order: VecDeque::new(),
            limit,
        }
    }

    fn stash(&mut self, job_id: String, message: Message) {
        if self.by_job.insert(job_id.clone(), message).is_none() {
            self.order.push_back(job_id);
        }

        while self.by_job.len() > self.limit {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.by_job.remove(&oldest).is_some() {
                warn!("Dropping unclaimed outcome of job {}", oldest);
            }
        }
    }

    fn take(&mut self, job_id: &str) -> Option<Message> {
        let message = self.by_job.remove(job_id)?;
        self.order.retain(|id| id != job_id);
        Some(message)
    }
}

/// Terminal job outcome as opposed to a status snapshot or cancel acknowledgement
fn is_outcome(message: &Message) -> bool {
    match message.message_type() {
        MessageType::Error => true,
        MessageType::Response => message.content()["kind"] == reply_kinds::OUTCOME,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentState;

    fn response(job_id: &str, kind: &str, status: &str) -> Message {
        Message::response(
            ORCHESTRATOR_ID,
            CLIENT_ID,
            json!({ "job_id": job_id, "kind": kind, "status": status }),
        )
        .with_metadata(metadata_keys::JOB_ID, job_id)
    }

    #[test]
    fn test_only_outcomes_end_a_wait() {
        assert!(is_outcome(&response("job-1", reply_kinds::OUTCOME, "DONE")));
        assert!(is_outcome(&response("job-1", reply_kinds::OUTCOME, "CANCELLED")));
        assert!(!is_outcome(&response("job-1", reply_kinds::SNAPSHOT, "DONE")));
        assert!(!is_outcome(&response("job-1", reply_kinds::SNAPSHOT, "FAILED")));
        assert!(!is_outcome(&response("job-1", reply_kinds::CANCEL_ACK, "CANCELLED")));

        let failed = Message::error(ORCHESTRATOR_ID, CLIENT_ID, json!({ "status": "FAILED" }));
        assert!(is_outcome(&failed));
        let status = Message::status("research", CLIENT_ID, AgentState::Running, AgentState::Idle);
        assert!(!is_outcome(&status));
    }

    #[test]
    fn test_unclaimed_outcomes_are_bounded() {
        let mut outcomes = UnclaimedOutcomes::new(2);
        for job_id in ["job-1", "job-2", "job-3"] {
            outcomes.stash(job_id.to_string(), response(job_id, reply_kinds::OUTCOME, "DONE"));
        }

        assert!(outcomes.take("job-1").is_none());
        assert_eq!(outcomes.take("job-2").unwrap().job_id(), Some("job-2"));
        assert!(outcomes.take("job-2").is_none());

        outcomes.stash("job-4".to_string(), response("job-4", reply_kinds::OUTCOME, "FAILED"));
        outcomes.stash("job-5".to_string(), response("job-5", reply_kinds::OUTCOME, "DONE"));
        assert!(outcomes.take("job-3").is_none());
        assert!(outcomes.take("job-4").is_some());
        assert!(outcomes.take("job-5").is_some());
    }
}
