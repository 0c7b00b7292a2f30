use async_trait::async_trait;
use reportflow_common::{PipelineConfig, ReportType};
use reportflow_core::agents::{AnalysisStage, ResearchStage, ReviewStage, WritingStage};
use reportflow_core::{AgentState, MessageType, ReportRequest, ReportSystem, Stage};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

type TaskLog = Arc<Mutex<Vec<(String, Value)>>>;

/// Records every task a stage executes
struct Recorded<S> {
    inner: S,
    log: TaskLog,
}

fn recorded<S: Stage>(inner: S, log: &TaskLog) -> Recorded<S> {
    Recorded {
        inner,
        log: log.clone(),
    }
}

#[async_trait]
impl<S: Stage> Stage for Recorded<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn validate(&self, task: &Value) -> anyhow::Result<()> {
        self.inner.validate(task)
    }

    async fn execute(&mut self, task: &Value) -> anyhow::Result<Value> {
        self.log
            .lock()
            .unwrap()
            .push((self.inner.name().to_string(), task.clone()));
        self.inner.execute(task).await
    }

    fn awaits_feedback(&self) -> bool {
        self.inner.awaits_feedback()
    }
}

struct RejectingReview;

#[async_trait]
impl Stage for RejectingReview {
    fn name(&self) -> &str {
        "review"
    }

    async fn execute(&mut self, _task: &Value) -> anyhow::Result<Value> {
        Ok(json!({ "approved": false, "feedback": "needs more detail" }))
    }
}

/// Writing stage that fails its first `failures` tasks
struct FlakyWriter {
    failures: u32,
    inner: WritingStage,
}

#[async_trait]
impl Stage for FlakyWriter {
    fn name(&self) -> &str {
        "writing"
    }

    async fn execute(&mut self, task: &Value) -> anyhow::Result<Value> {
        if self.failures > 0 {
            self.failures -= 1;
            anyhow::bail!("language model unavailable");
        }
        self.inner.execute(task).await
    }

    fn awaits_feedback(&self) -> bool {
        true
    }
}

/// Research stage that takes a while
struct SlowResearch;

#[async_trait]
impl Stage for SlowResearch {
    fn name(&self) -> &str {
        "research"
    }

    async fn execute(&mut self, task: &Value) -> anyhow::Result<Value> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        ResearchStage.execute(task).await
    }
}

fn config(max_feedback_retries: u32) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry.max_feedback_retries = max_feedback_retries;
    config.mailbox.poll_interval_ms = 10;
    config
}

fn tasks_for(log: &TaskLog, stage: &str) -> Vec<Value> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(s, _)| s == stage)
        .map(|(_, task)| task.clone())
        .collect()
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_company_report_runs_every_stage_once() {
    let log = TaskLog::default();
    let system = ReportSystem::builder(config(3))
        .stage(recorded(ResearchStage, &log))
        .stage(recorded(AnalysisStage, &log))
        .stage(recorded(WritingStage::default(), &log))
        .stage(recorded(ReviewStage::default(), &log))
        .launch()
        .await
        .unwrap();

    let job_id = system
        .submit(&ReportRequest::new(ReportType::Company, "AAPL"))
        .await
        .unwrap();
    let outcome = system.wait_for(&job_id, WAIT).await.unwrap();

    assert_eq!(outcome.message_type(), MessageType::Response);
    assert_eq!(outcome.job_id(), Some(job_id.as_str()));
    assert_eq!(outcome.content()["status"], "DONE");
    assert_eq!(outcome.content()["report"]["title"], "AAPL company report");
    assert_eq!(outcome.content()["review"]["approved"], true);

    let stages: Vec<String> = log.lock().unwrap().iter().map(|(s, _)| s.clone()).collect();
    assert_eq!(stages, vec!["research", "analysis", "writing", "review"]);

    assert_eq!(
        system.registry().identities().await,
        vec!["analysis", "client", "monitor", "orchestrator", "research", "review", "writing"]
    );

    let monitor = system.monitor().clone();
    assert!(eventually(|| monitor.state_of("writing") == Some(AgentState::Waiting)).await);
    assert!(eventually(|| monitor.state_of("orchestrator") == Some(AgentState::Completed)).await);
    assert!(eventually(|| monitor.state_of("review") == Some(AgentState::Completed)).await);
    assert!(monitor.history("research").len() >= 2);

    // nothing else gets dispatched after the response
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(log.lock().unwrap().len(), 4);

    system.shutdown().await;
}

#[tokio::test]
async fn test_rejecting_review_fails_after_retry_bound() {
    let log = TaskLog::default();
    let system = ReportSystem::builder(config(3))
        .stage(ResearchStage)
        .stage(AnalysisStage)
        .stage(recorded(WritingStage::default(), &log))
        .stage(RejectingReview)
        .launch()
        .await
        .unwrap();

    let job_id = system
        .submit(&ReportRequest::new(ReportType::Company, "AAPL"))
        .await
        .unwrap();
    let outcome = system.wait_for(&job_id, WAIT).await.unwrap();

    assert_eq!(outcome.message_type(), MessageType::Error);
    assert_eq!(outcome.content()["status"], "FAILED");
    assert_eq!(outcome.content()["condition"], "MaxRetriesExceeded");
    assert_eq!(outcome.content()["stage"], "writing");
    assert_eq!(outcome.content()["retries"], 3);

    // first draft plus three re-dispatches, each carrying all feedback so far
    let writing = tasks_for(&log, "writing");
    assert_eq!(writing.len(), 4);
    for (round, task) in writing.iter().enumerate() {
        assert_eq!(task["feedback"].as_array().unwrap().len(), round);
    }
    assert_eq!(writing[3]["feedback"][2], "needs more detail");
    assert!(writing[3]["previous"]["sections"].is_array());

    system.shutdown().await;
}

#[tokio::test]
async fn test_failing_writer_is_retried_once_then_job_fails() {
    let log = TaskLog::default();
    let writer = FlakyWriter {
        failures: u32::MAX,
        inner: WritingStage::default(),
    };
    let system = ReportSystem::builder(config(3))
        .stage(ResearchStage)
        .stage(AnalysisStage)
        .stage(recorded(writer, &log))
        .stage(ReviewStage::default())
        .launch()
        .await
        .unwrap();

    let job_id = system
        .submit(&ReportRequest::new(ReportType::Industry, "semiconductors"))
        .await
        .unwrap();
    let outcome = system.wait_for(&job_id, WAIT).await.unwrap();

    assert_eq!(outcome.message_type(), MessageType::Error);
    assert_eq!(outcome.content()["status"], "FAILED");
    assert_eq!(outcome.content()["stage"], "writing");
    assert_eq!(outcome.content()["retries"], 1);
    assert!(
        outcome.content()["reason"]
            .as_str()
            .unwrap()
            .contains("language model unavailable")
    );
    assert_eq!(outcome.content()["error"]["task"]["target"], "semiconductors");

    let writing = tasks_for(&log, "writing");
    assert_eq!(writing.len(), 2);
    assert_eq!(writing[0], writing[1]);

    let monitor = system.monitor().clone();
    assert!(eventually(|| monitor.state_of("writing") == Some(AgentState::Error)).await);

    system.shutdown().await;
}

#[tokio::test]
async fn test_single_writer_error_recovers() {
    let writer = FlakyWriter {
        failures: 1,
        inner: WritingStage::default(),
    };
    let system = ReportSystem::builder(config(3))
        .stage(ResearchStage)
        .stage(AnalysisStage)
        .stage(writer)
        .stage(ReviewStage::default())
        .launch()
        .await
        .unwrap();

    let job_id = system
        .submit(&ReportRequest::new(ReportType::Company, "MSFT"))
        .await
        .unwrap();
    let outcome = system.wait_for(&job_id, WAIT).await.unwrap();

    assert_eq!(outcome.message_type(), MessageType::Response);
    assert_eq!(outcome.content()["status"], "DONE");

    system.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_jobs_keep_separate_results() {
    let log = TaskLog::default();
    let system = ReportSystem::builder(config(3))
        .stage(recorded(ResearchStage, &log))
        .stage(recorded(AnalysisStage, &log))
        .stage(recorded(WritingStage::default(), &log))
        .stage(recorded(ReviewStage::default(), &log))
        .launch()
        .await
        .unwrap();

    let company = system
        .submit(&ReportRequest::new(ReportType::Company, "AAPL"))
        .await
        .unwrap();
    let macro_job = system
        .submit(&ReportRequest::new(ReportType::Macro, "rates").with_timeframe("1m"))
        .await
        .unwrap();

    // wait in the reverse order of submission
    let macro_outcome = system.wait_for(&macro_job, WAIT).await.unwrap();
    let company_outcome = system.wait_for(&company, WAIT).await.unwrap();

    assert_eq!(company_outcome.content()["status"], "DONE");
    assert_eq!(company_outcome.content()["report"]["title"], "AAPL company report");
    assert_eq!(macro_outcome.content()["status"], "DONE");
    assert_eq!(macro_outcome.content()["report"]["title"], "rates macro report");

    for task in tasks_for(&log, "writing") {
        let research = &task["context"]["research"];
        assert_eq!(research["target"], task["target"]);
        if task["report_type"] == "macro" {
            assert!(task["context"]["analysis"].is_null());
        }
    }
    assert_eq!(tasks_for(&log, "analysis").len(), 1);
    assert_eq!(tasks_for(&log, "review").len(), 2);

    system.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_job_stops_advancing() {
    let log = TaskLog::default();
    let system = ReportSystem::builder(config(3))
        .stage(SlowResearch)
        .stage(recorded(AnalysisStage, &log))
        .stage(WritingStage::default())
        .stage(ReviewStage::default())
        .launch()
        .await
        .unwrap();

    let job_id = system
        .submit(&ReportRequest::new(ReportType::Company, "AAPL"))
        .await
        .unwrap();
    system.cancel(&job_id).await.unwrap();

    let outcome = system.wait_for(&job_id, WAIT).await.unwrap();
    assert_eq!(outcome.message_type(), MessageType::Response);
    assert_eq!(outcome.content()["status"], "CANCELLED");

    // the in-flight research result arrives and is ignored
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(tasks_for(&log, "analysis").is_empty());

    system.shutdown().await;
}

#[tokio::test]
async fn test_launch_requires_every_configured_stage() {
    let result = ReportSystem::builder(config(3))
        .stage(ResearchStage)
        .stage(WritingStage::default())
        .launch()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cancel_after_completion_is_not_an_outcome() {
    let system = ReportSystem::builder(config(3))
        .with_builtin_stages()
        .launch()
        .await
        .unwrap();

    let first = system
        .submit(&ReportRequest::new(ReportType::Macro, "rates"))
        .await
        .unwrap();
    let outcome = system.wait_for(&first, WAIT).await.unwrap();
    assert_eq!(outcome.content()["status"], "DONE");
    assert_eq!(outcome.content()["kind"], "outcome");

    // the late cancel is answered with a DONE snapshot that must not be taken for an outcome
    system.cancel(&first).await.unwrap();
    let second = system
        .submit(&ReportRequest::new(ReportType::Company, "MSFT"))
        .await
        .unwrap();
    let outcome = system.wait_for(&second, WAIT).await.unwrap();
    assert_eq!(outcome.job_id(), Some(second.as_str()));
    assert_eq!(outcome.content()["status"], "DONE");

    assert!(system.wait_for(&first, Duration::from_millis(100)).await.is_err());

    system.shutdown().await;
}
