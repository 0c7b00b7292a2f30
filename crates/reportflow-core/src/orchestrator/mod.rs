//! Orchestrator: turns report requests into sequential stage dispatches
//!
//! All scheduling decisions live in [`Orchestrator`], which consumes inbound
//! messages and returns the messages to send. The agent wiring in
//! [`handlers`] delivers them.

pub mod handlers;
pub mod job;

pub use handlers::{ErrorHandler, RequestHandler, ResultHandler, SubmitHandler};
pub use job::{JobStatus, PipelineJob, ReportRequest};

use crate::agents::{Message, MessageType};
use reportflow_common::{
    DEFAULT_MAX_FINISHED_JOBS, ReportflowError, RetryConfig, StagePipelineConfig,
    generate_timestamped_id, metadata_keys, reply_kinds,
};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Why a job ended in `FAILED`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCondition {
    /// Feedback or error retry bound exhausted
    MaxRetriesExceeded,
    /// The TASK could not be delivered to the stage agent
    DispatchFailed,
}

impl FailureCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCondition::MaxRetriesExceeded => "MaxRetriesExceeded",
            FailureCondition::DispatchFailed => "DispatchFailed",
        }
    }
}

/// Per-job scheduling state and policy
#[derive(Debug)]
pub struct Orchestrator {
    id: String,
    pipeline: StagePipelineConfig,
    retry: RetryConfig,
    jobs: HashMap<String, PipelineJob>,
    /// Ids of terminal jobs, oldest first
    finished: VecDeque<String>,
    finished_limit: usize,
}

impl Orchestrator {
    pub fn new(id: impl Into<String>, pipeline: StagePipelineConfig, retry: RetryConfig) -> Self {
        Self {
            id: id.into(),
            pipeline,
            retry,
            jobs: HashMap::new(),
            finished: VecDeque::new(),
            finished_limit: DEFAULT_MAX_FINISHED_JOBS,
        }
    }

    /// Number of finished jobs kept for status queries
    pub fn with_finished_job_limit(mut self, limit: usize) -> Self {
        self.finished_limit = limit;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn job(&self, job_id: &str) -> Option<&PipelineJob> {
        self.jobs.get(job_id)
    }

    /// Jobs that have not reached a terminal status
    pub fn active_jobs(&self) -> usize {
        self.jobs
            .values()
            .filter(|job| !job.status.is_terminal())
            .count()
    }

    /// Accept a report request and dispatch its first stage
    pub fn submit(&mut self, message: &Message) -> Vec<Message> {
        let request = match ReportRequest::from_content(message.content()) {
            Ok(request) => request,
            Err(e) => return vec![self.reject(message, None, &e)],
        };

        let job_id = message
            .job_id()
            .map(str::to_string)
            .unwrap_or_else(|| generate_timestamped_id(Some("job")));
        if self.jobs.contains_key(&job_id) {
            let err = ReportflowError::InvalidRequest(format!("job {} already exists", job_id));
            return vec![self.reject(message, Some(&job_id), &err)];
        }

        let stages = match self.pipeline.stages_for(request.report_type) {
            Some(stages) if !stages.is_empty() => stages.to_vec(),
            _ => {
                let err = ReportflowError::InvalidRequest(format!(
                    "no pipeline configured for {} reports",
                    request.report_type
                ));
                return vec![self.reject(message, Some(&job_id), &err)];
            }
        };
        self.forget_finished();

        let mut job = PipelineJob::new(
            &job_id,
            request,
            message.sender(),
            message.id(),
            stages,
        );
        info!(
            "Created job {} ({} report on {}) with stages {:?}",
            job_id, job.request.report_type, job.request.target, job.stages
        );

        let task = dispatch(&self.id, &self.pipeline, &mut job);
        self.jobs.insert(job_id, job);
        vec![task]
    }

    /// Fold a stage RESULT into its job and decide what runs next
    pub fn on_result(&mut self, message: &Message) -> Vec<Message> {
        let Some(job) = correlate(&mut self.jobs, &self.pipeline, message) else {
            return Vec::new();
        };

        let stage = job.current_stage().unwrap_or_default().to_string();
        let content = message.content().clone();
        job.consecutive_errors = 0;
        job.touch();

        let is_review = stage == self.pipeline.review_stage;
        let rejected = is_review && content.get("approved") == Some(&Value::Bool(false));
        job.results.insert(stage.clone(), content.clone());

        if rejected {
            let target = self.pipeline.feedback_target.clone();
            let retries = job.feedback_retries(&target);

            if retries >= self.retry.max_feedback_retries {
                let err = ReportflowError::MaxRetriesExceeded {
                    job_id: job.job_id.clone(),
                    stage: target.clone(),
                    retries,
                };
                job.last_error = Some(content);
                return vec![fail(
                    &self.id,
                    &mut self.finished,
                    job,
                    &target,
                    err.to_string(),
                    FailureCondition::MaxRetriesExceeded,
                )];
            }

            let Some(index) = job.stages.iter().position(|s| *s == target) else {
                let reason = format!("feedback target {} is not part of the pipeline", target);
                return vec![fail(
                    &self.id,
                    &mut self.finished,
                    job,
                    &stage,
                    reason,
                    FailureCondition::DispatchFailed,
                )];
            };

            job.feedback_retries.insert(target.clone(), retries + 1);
            job.feedback
                .push(content.get("feedback").cloned().unwrap_or(content));
            job.current = index;
            info!(
                "Job {} review rejected, returning to {} (feedback retry {}/{})",
                job.job_id,
                target,
                retries + 1,
                self.retry.max_feedback_retries
            );
            return vec![dispatch(&self.id, &self.pipeline, job)];
        }

        if is_review || job.current + 1 >= job.stages.len() {
            return vec![complete(&self.id, &self.pipeline, &mut self.finished, job)];
        }

        job.current += 1;
        vec![dispatch(&self.id, &self.pipeline, job)]
    }

    /// Retry a failed stage once, then fail the job
    pub fn on_error(&mut self, message: &Message) -> Vec<Message> {
        let Some(job) = correlate(&mut self.jobs, &self.pipeline, message) else {
            return Vec::new();
        };

        let stage = job.current_stage().unwrap_or_default().to_string();
        job.consecutive_errors += 1;
        job.last_error = Some(message.content().clone());
        job.touch();

        if job.consecutive_errors > self.retry.max_error_retries {
            let reason = message.content()["error"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| message.content().to_string());
            return vec![fail(
                &self.id,
                &mut self.finished,
                job,
                &stage,
                reason,
                FailureCondition::MaxRetriesExceeded,
            )];
        }

        warn!(
            "Job {} stage {} failed, retrying ({}/{})",
            job.job_id, stage, job.consecutive_errors, self.retry.max_error_retries
        );
        vec![redispatch(&self.id, &self.pipeline, job)]
    }

    /// Stop advancing a job; late stage messages for it are discarded
    pub fn cancel(&mut self, message: &Message) -> Vec<Message> {
        let Some(job_id) = requested_job_id(message) else {
            let err = ReportflowError::InvalidRequest("cancel requires a job_id".to_string());
            return vec![self.reject(message, None, &err)];
        };
        let Some(job) = self.jobs.get_mut(&job_id) else {
            let err = ReportflowError::InvalidRequest(format!("unknown job {}", job_id));
            return vec![self.reject(message, Some(&job_id), &err)];
        };

        if job.status.is_terminal() {
            debug!("Job {} already {}, cancel ignored", job_id, job.status);
            return vec![snapshot_reply(&self.id, message, job)];
        }

        finish(&mut self.finished, job, JobStatus::Cancelled);
        info!("Job {} cancelled by {}", job_id, message.sender());

        let content = json!({
            "job_id": job_id,
            "kind": reply_kinds::OUTCOME,
            "status": JobStatus::Cancelled,
            "stage": job.current_stage(),
        });
        let mut out = vec![
            Message::response(&self.id, &job.requester, content.clone())
                .with_metadata(metadata_keys::JOB_ID, job_id.clone())
                .with_metadata(metadata_keys::IN_REPLY_TO, job.request_message_id.clone()),
        ];
        if message.sender() != job.requester {
            let mut ack = content;
            ack["kind"] = json!(reply_kinds::CANCEL_ACK);
            out.push(
                message
                    .reply_from(&self.id, MessageType::Response, ack)
                    .with_metadata(metadata_keys::JOB_ID, job_id),
            );
        }
        out
    }

    /// Answer a job status query
    pub fn status_of(&self, message: &Message) -> Vec<Message> {
        let Some(job_id) = requested_job_id(message) else {
            let err = ReportflowError::InvalidRequest("status requires a job_id".to_string());
            return vec![self.reject(message, None, &err)];
        };

        match self.jobs.get(&job_id) {
            Some(job) => vec![snapshot_reply(&self.id, message, job)],
            None => {
                let err = ReportflowError::InvalidRequest(format!("unknown job {}", job_id));
                vec![self.reject(message, Some(&job_id), &err)]
            }
        }
    }

    /// A TASK built by this orchestrator could not be delivered
    pub fn on_dispatch_failure(&mut self, task: &Message, error: &ReportflowError) -> Vec<Message> {
        let Some(job) = task.job_id().and_then(|id| self.jobs.get_mut(id)) else {
            return Vec::new();
        };
        if job.status.is_terminal() || task.attempt() != Some(job.dispatches) {
            return Vec::new();
        }

        let stage = task
            .stage()
            .map(str::to_string)
            .or_else(|| job.current_stage().map(str::to_string))
            .unwrap_or_default();
        job.last_error = Some(json!({ "error": error.to_string() }));
        vec![fail(
            &self.id,
            &mut self.finished,
            job,
            &stage,
            format!("could not dispatch to {}: {}", task.receiver(), error),
            FailureCondition::DispatchFailed,
        )]
    }

    /// ERROR reply to a request that never became a job
    fn reject(&self, message: &Message, job_id: Option<&str>, error: &ReportflowError) -> Message {
        warn!("Rejecting request {} from {}: {}", message.id(), message.sender(), error);
        let reply = message.reply_from(
            &self.id,
            MessageType::Error,
            json!({
                "status": "REJECTED",
                "job_id": job_id,
                "error": error.to_string(),
            }),
        );
        match job_id {
            Some(job_id) => reply.with_metadata(metadata_keys::JOB_ID, job_id),
            None => reply,
        }
    }

    /// Drop the oldest finished jobs beyond the retention limit
    fn forget_finished(&mut self) {
        while self.finished.len() > self.finished_limit {
            let Some(job_id) = self.finished.pop_front() else {
                break;
            };
            if self.jobs.remove(&job_id).is_some() {
                debug!("Forgetting finished job {}", job_id);
            }
        }
    }
}

/// Status view of a job; never a terminal outcome even when the job has finished
fn snapshot_reply(id: &str, message: &Message, job: &PipelineJob) -> Message {
    let mut content = job.snapshot();
    content["kind"] = json!(reply_kinds::SNAPSHOT);
    message
        .reply_from(id, MessageType::Response, content)
        .with_metadata(metadata_keys::JOB_ID, job.job_id.clone())
}

fn finish(finished: &mut VecDeque<String>, job: &mut PipelineJob, status: JobStatus) {
    job.status = status;
    job.touch();
    finished.push_back(job.job_id.clone());
}

fn requested_job_id(message: &Message) -> Option<String> {
    message.content()["job_id"]
        .as_str()
        .or_else(|| message.job_id())
        .map(str::to_string)
}

/// Find the live job a stage reply belongs to.
///
/// Replies for unknown or finished jobs, for a stage that is no longer
/// current, from an agent that does not own the stage, or answering a
/// superseded attempt are discarded.
fn correlate<'a>(
    jobs: &'a mut HashMap<String, PipelineJob>,
    pipeline: &StagePipelineConfig,
    message: &Message,
) -> Option<&'a mut PipelineJob> {
    let Some(job_id) = message.job_id() else {
        warn!(
            "Discarding {} from {} without job id",
            message.message_type(),
            message.sender()
        );
        return None;
    };
    let Some(job) = jobs.get_mut(job_id) else {
        warn!("Discarding {} for unknown job {}", message.message_type(), job_id);
        return None;
    };

    if job.status.is_terminal() {
        debug!(
            "Discarding {} from {} for {} job {}",
            message.message_type(),
            message.sender(),
            job.status,
            job_id
        );
        return None;
    }

    let current = job.current_stage().unwrap_or_default();
    let fresh = message.stage() == Some(current)
        && message.sender() == pipeline.agent_for(current)
        && message.attempt() == Some(job.dispatches);
    if !fresh {
        debug!(
            "Discarding stale {} from {} for job {} (stage {:?}, attempt {:?}; expected {} #{})",
            message.message_type(),
            message.sender(),
            job_id,
            message.stage(),
            message.attempt(),
            current,
            job.dispatches
        );
        return None;
    }

    Some(job)
}

/// Build the TASK for the job's current stage
fn dispatch(id: &str, pipeline: &StagePipelineConfig, job: &mut PipelineJob) -> Message {
    let content = job.task_content();
    job.last_task = Some(content.clone());
    send_task(id, pipeline, job, content)
}

/// Resend the previous TASK content as a new attempt
fn redispatch(id: &str, pipeline: &StagePipelineConfig, job: &mut PipelineJob) -> Message {
    let content = match &job.last_task {
        Some(content) => content.clone(),
        None => job.task_content(),
    };
    send_task(id, pipeline, job, content)
}

fn send_task(
    id: &str,
    pipeline: &StagePipelineConfig,
    job: &mut PipelineJob,
    content: Value,
) -> Message {
    let stage = job.current_stage().unwrap_or_default().to_string();
    job.dispatches += 1;
    job.status = JobStatus::InProgress;
    job.touch();

    let receiver = pipeline.agent_for(&stage);
    info!(
        "Job {} dispatching {} to {} (attempt {})",
        job.job_id, stage, receiver, job.dispatches
    );

    Message::task(id, receiver, content)
        .with_metadata(metadata_keys::JOB_ID, job.job_id.clone())
        .with_metadata(metadata_keys::STAGE, stage)
        .with_metadata(metadata_keys::ATTEMPT, job.dispatches)
}

fn complete(
    id: &str,
    pipeline: &StagePipelineConfig,
    finished: &mut VecDeque<String>,
    job: &mut PipelineJob,
) -> Message {
    finish(finished, job, JobStatus::Done);

    let report = job
        .results
        .get(&pipeline.feedback_target)
        .or_else(|| job.stages.last().and_then(|s| job.results.get(s)))
        .cloned();
    info!(
        "Job {} done after {} dispatches ({} feedback retries)",
        job.job_id,
        job.dispatches,
        job.total_feedback_retries()
    );

    Message::response(
        id,
        &job.requester,
        json!({
            "job_id": job.job_id,
            "kind": reply_kinds::OUTCOME,
            "status": JobStatus::Done,
            "report": report,
            "review": job.results.get(&pipeline.review_stage),
            "feedback_retries": job.total_feedback_retries(),
            "stages": job.stages,
        }),
    )
    .with_metadata(metadata_keys::JOB_ID, job.job_id.clone())
    .with_metadata(metadata_keys::IN_REPLY_TO, job.request_message_id.clone())
}

fn fail(
    id: &str,
    finished: &mut VecDeque<String>,
    job: &mut PipelineJob,
    stage: &str,
    reason: String,
    condition: FailureCondition,
) -> Message {
    finish(finished, job, JobStatus::Failed);

    let retries = match condition {
        FailureCondition::DispatchFailed => 0,
        FailureCondition::MaxRetriesExceeded if job.consecutive_errors > 0 => {
            job.consecutive_errors.saturating_sub(1)
        }
        FailureCondition::MaxRetriesExceeded => job.feedback_retries(stage),
    };
    warn!(
        "Job {} failed at stage {} ({}): {}",
        job.job_id,
        stage,
        condition.as_str(),
        reason
    );

    Message::error(
        id,
        &job.requester,
        json!({
            "job_id": job.job_id,
            "kind": reply_kinds::OUTCOME,
            "status": JobStatus::Failed,
            "stage": stage,
            "reason": reason,
            "condition": condition.as_str(),
            "retries": retries,
            "error": job.last_error,
        }),
    )
    .with_metadata(metadata_keys::JOB_ID, job.job_id.clone())
    .with_metadata(metadata_keys::IN_REPLY_TO, job.request_message_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reportflow_common::{PipelineConfig, ReportType};

    fn orchestrator(max_feedback_retries: u32) -> Orchestrator {
        let config = PipelineConfig::default();
        let retry = RetryConfig {
            max_feedback_retries,
            max_error_retries: 1,
        };
        Orchestrator::new("orchestrator", config.pipeline, retry)
    }

    fn submit(orch: &mut Orchestrator, job_id: &str, report_type: &str) -> Message {
        let request = Message::task(
            "client",
            "orchestrator",
            json!({"report_type": report_type, "target": "AAPL"}),
        )
        .with_metadata(metadata_keys::JOB_ID, job_id);
        let mut out = orch.submit(&request);
        assert_eq!(out.len(), 1);
        out.remove(0)
    }

    fn answer(task: &Message, content: Value) -> Message {
        task.reply(MessageType::Result, content)
    }

    fn single(mut out: Vec<Message>) -> Message {
        assert_eq!(out.len(), 1, "{:?}", out);
        out.remove(0)
    }

    #[test]
    fn test_happy_path_dispatches_each_stage_once() {
        let mut orch = orchestrator(3);
        let mut task = submit(&mut orch, "job-1", "company");

        for stage in ["research", "analysis", "writing", "review"] {
            assert_eq!(task.message_type(), MessageType::Task);
            assert_eq!(task.receiver(), stage);
            assert_eq!(task.stage(), Some(stage));
            let verdict = if stage == "review" {
                json!({"approved": true})
            } else {
                json!({ "from": stage })
            };
            task = single(orch.on_result(&answer(&task, verdict)));
        }

        assert_eq!(task.message_type(), MessageType::Response);
        assert_eq!(task.receiver(), "client");
        assert_eq!(task.content()["status"], "DONE");
        assert_eq!(task.content()["report"], json!({"from": "writing"}));
        assert_eq!(orch.job("job-1").unwrap().status(), JobStatus::Done);
        assert_eq!(orch.job("job-1").unwrap().dispatches(), 4);
        assert_eq!(orch.active_jobs(), 0);
    }

    #[test]
    fn test_rejection_loop_is_bounded() {
        let mut orch = orchestrator(3);
        let mut task = submit(&mut orch, "job-1", "macro");
        task = single(orch.on_result(&answer(&task, json!({"r": 1}))));

        let mut writing_dispatches = 0;
        let outcome = loop {
            assert_eq!(task.stage(), Some("writing"));
            writing_dispatches += 1;
            let review = single(orch.on_result(&answer(&task, json!({"draft": writing_dispatches}))));
            let next = single(orch.on_result(&answer(
                &review,
                json!({"approved": false, "feedback": format!("fix #{}", writing_dispatches)}),
            )));
            if next.message_type() != MessageType::Task {
                break next;
            }
            assert_eq!(
                next.content()["feedback"].as_array().unwrap().len(),
                writing_dispatches
            );
            assert_eq!(next.content()["previous"]["draft"], writing_dispatches);
            task = next;
        };

        assert_eq!(writing_dispatches, 4);
        assert_eq!(outcome.message_type(), MessageType::Error);
        assert_eq!(outcome.content()["status"], "FAILED");
        assert_eq!(outcome.content()["condition"], "MaxRetriesExceeded");
        assert_eq!(outcome.content()["stage"], "writing");
        assert_eq!(outcome.content()["retries"], 3);
    }

    #[test]
    fn test_error_retried_once_then_fails() {
        let mut orch = orchestrator(3);
        let task = submit(&mut orch, "job-1", "macro");

        let retry = single(orch.on_error(&task.reply(MessageType::Error, json!({"error": "boom"}))));
        assert_eq!(retry.stage(), Some("research"));
        assert_eq!(retry.content(), task.content());
        assert_eq!(retry.attempt(), Some(2));

        let failed = single(orch.on_error(&retry.reply(MessageType::Error, json!({"error": "boom again"}))));
        assert_eq!(failed.message_type(), MessageType::Error);
        assert_eq!(failed.receiver(), "client");
        assert_eq!(failed.content()["stage"], "research");
        assert_eq!(failed.content()["reason"], "boom again");
        assert_eq!(failed.content()["retries"], 1);
        assert_eq!(failed.content()["error"]["error"], "boom again");
    }

    #[test]
    fn test_error_then_success_continues() {
        let mut orch = orchestrator(3);
        let task = submit(&mut orch, "job-1", "macro");
        let retry = single(orch.on_error(&task.reply(MessageType::Error, json!({"error": "flaky"}))));
        let next = single(orch.on_result(&answer(&retry, json!({"ok": true}))));
        assert_eq!(next.stage(), Some("writing"));
        assert_eq!(orch.job("job-1").unwrap().status(), JobStatus::InProgress);
    }

    #[test]
    fn test_stale_and_foreign_replies_are_discarded() {
        let mut orch = orchestrator(3);
        let task_a = submit(&mut orch, "job-a", "company");
        let task_b = submit(&mut orch, "job-b", "company");

        // superseded attempt
        let retry = single(orch.on_error(&task_a.reply(MessageType::Error, json!({"error": "x"}))));
        assert!(orch.on_result(&answer(&task_a, json!({}))).is_empty());

        // wrong sender for the stage
        let forged = Message::result("analysis", "orchestrator", json!({}))
            .with_metadata_map(retry.metadata().clone());
        assert!(orch.on_result(&forged).is_empty());

        // unknown job
        let lost = Message::result("research", "orchestrator", json!({}))
            .with_metadata(metadata_keys::JOB_ID, "job-z");
        assert!(orch.on_result(&lost).is_empty());

        let next_b = single(orch.on_result(&answer(&task_b, json!({"b": true}))));
        assert_eq!(next_b.job_id(), Some("job-b"));
        assert_eq!(next_b.content()["context"]["research"], json!({"b": true}));
        assert!(orch.job("job-a").unwrap().result_of("research").is_none());
    }

    #[test]
    fn test_cancel_discards_late_results() {
        let mut orch = orchestrator(3);
        let task = submit(&mut orch, "job-1", "company");

        let cancel = Message::request("client", "orchestrator", json!({"action": "cancel", "job_id": "job-1"}));
        let notice = single(orch.cancel(&cancel));
        assert_eq!(notice.message_type(), MessageType::Response);
        assert_eq!(notice.content()["status"], "CANCELLED");

        assert!(orch.on_result(&answer(&task, json!({}))).is_empty());
        assert_eq!(orch.job("job-1").unwrap().status(), JobStatus::Cancelled);
    }

    #[test]
    fn test_invalid_and_duplicate_submissions_rejected() {
        let mut orch = orchestrator(3);
        let bad = Message::task("client", "orchestrator", json!({"report_type": "company"}));
        let reply = single(orch.submit(&bad));
        assert_eq!(reply.message_type(), MessageType::Error);
        assert_eq!(reply.content()["status"], "REJECTED");

        submit(&mut orch, "job-1", "company");
        let dup = Message::task("client", "orchestrator", json!({"report_type": "macro", "target": "x"}))
            .with_metadata(metadata_keys::JOB_ID, "job-1");
        let reply = single(orch.submit(&dup));
        assert_eq!(reply.message_type(), MessageType::Error);
    }

    #[test]
    fn test_status_query_and_dispatch_failure() {
        let mut orch = orchestrator(3);
        let task = submit(&mut orch, "job-1", "industry");

        let query = Message::request("client", "orchestrator", json!({"action": "status", "job_id": "job-1"}));
        let snapshot = single(orch.status_of(&query));
        assert_eq!(snapshot.content()["kind"], "snapshot");
        assert_eq!(snapshot.content()["status"], "IN_PROGRESS");
        assert_eq!(snapshot.content()["current_stage"], "research");

        let failure = single(orch.on_dispatch_failure(
            &task,
            &ReportflowError::UnknownRecipient("research".to_string()),
        ));
        assert_eq!(failure.content()["condition"], "DispatchFailed");
        assert_eq!(orch.job("job-1").unwrap().status(), JobStatus::Failed);
    }

    fn cancel_from(sender: &str, job_id: &str) -> Message {
        Message::request(sender, "orchestrator", json!({"action": "cancel", "job_id": job_id}))
    }

    #[test]
    fn test_empty_stage_sequence_rejected() {
        let mut pipeline = PipelineConfig::default().pipeline;
        pipeline.stages.insert("macro".to_string(), Vec::new());
        let mut orch = Orchestrator::new("orchestrator", pipeline, RetryConfig::default());

        let request = Message::task("client", "orchestrator", json!({"report_type": "macro", "target": "rates"}))
            .with_metadata(metadata_keys::JOB_ID, "job-1");
        let reply = single(orch.submit(&request));
        assert_eq!(reply.message_type(), MessageType::Error);
        assert_eq!(reply.content()["status"], "REJECTED");
        assert!(orch.job("job-1").is_none());
    }

    #[test]
    fn test_replies_are_marked_by_kind() {
        let mut orch = orchestrator(3);
        let task = submit(&mut orch, "job-1", "company");

        // a third party cancelling gets an acknowledgement, the requester gets the outcome
        let out = orch.cancel(&cancel_from("operator", "job-1"));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].receiver(), "client");
        assert_eq!(out[0].content()["kind"], "outcome");
        assert_eq!(out[1].receiver(), "operator");
        assert_eq!(out[1].content()["kind"], "cancel_ack");
        assert_eq!(out[1].content()["status"], "CANCELLED");

        // cancelling a finished job only reports where it stands
        let late = single(orch.cancel(&cancel_from("client", "job-1")));
        assert_eq!(late.content()["kind"], "snapshot");
        assert_eq!(late.content()["status"], "CANCELLED");
        assert!(orch.on_result(&answer(&task, json!({}))).is_empty());

        let query = Message::request("client", "orchestrator", json!({"action": "status", "job_id": "job-1"}));
        let snapshot = single(orch.status_of(&query));
        assert_eq!(snapshot.content()["kind"], "snapshot");
        assert_eq!(snapshot.job_id(), Some("job-1"));

        let mut task = submit(&mut orch, "job-2", "macro");
        for verdict in [json!({}), json!({}), json!({"approved": true})] {
            task = single(orch.on_result(&answer(&task, verdict)));
        }
        assert_eq!(task.content()["kind"], "outcome");
        assert_eq!(task.content()["status"], "DONE");
    }

    #[test]
    fn test_finished_jobs_are_forgotten_beyond_limit() {
        let mut orch = orchestrator(3).with_finished_job_limit(1);
        for job_id in ["job-1", "job-2"] {
            submit(&mut orch, job_id, "company");
            orch.cancel(&cancel_from("client", job_id));
        }
        assert!(orch.job("job-1").is_some());

        submit(&mut orch, "job-3", "industry");
        assert!(orch.job("job-1").is_none());
        assert_eq!(orch.job("job-2").unwrap().status(), JobStatus::Cancelled);

        let live = orch.job("job-3").unwrap();
        assert_eq!(live.request().report_type, ReportType::Industry);
        assert_eq!(live.request().target, "AAPL");
        assert_eq!(live.requester(), "client");
        assert_eq!(orch.active_jobs(), 1);

        let query = Message::request("client", "orchestrator", json!({"action": "status", "job_id": "job-1"}));
        let reply = single(orch.status_of(&query));
        assert_eq!(reply.content()["status"], "REJECTED");
    }
}
