//! Report requests and the per-job pipeline state the orchestrator keeps

use chrono::{DateTime, Utc};
use reportflow_common::{DEFAULT_TIMEFRAME, ReportType, ReportflowError, Result, now};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

/// Overall status of a pipeline job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// A terminal job never advances again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What an external caller asks the orchestrator to produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub report_type: ReportType,
    pub target: String,
    pub timeframe: String,
}

impl ReportRequest {
    pub fn new(report_type: ReportType, target: impl Into<String>) -> Self {
        Self {
            report_type,
            target: target.into(),
            timeframe: DEFAULT_TIMEFRAME.to_string(),
        }
    }

    pub fn with_timeframe(mut self, timeframe: impl Into<String>) -> Self {
        self.timeframe = timeframe.into();
        self
    }

    /// Parse a submission payload.
    ///
    /// Accepts `report_type` (or `type`), `target` and an optional
    /// `timeframe`; any other fields are ignored.
    pub fn from_content(content: &Value) -> Result<Self> {
        let report_type = content
            .get("report_type")
            .or_else(|| content.get("type"))
            .and_then(Value::as_str)
            .ok_or_else(|| ReportflowError::InvalidRequest("missing report_type".to_string()))?
            .parse::<ReportType>()?;

        let target = content
            .get("target")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ReportflowError::InvalidRequest("missing target".to_string()))?;

        let timeframe = content
            .get("timeframe")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TIMEFRAME);

        Ok(Self::new(report_type, target).with_timeframe(timeframe))
    }

    pub fn to_content(&self) -> Value {
        json!({
            "report_type": self.report_type,
            "target": self.target,
            "timeframe": self.timeframe,
        })
    }
}

/// One report-generation request as tracked by the orchestrator
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub(crate) job_id: String,
    pub(crate) request: ReportRequest,
    /// Identity that receives the terminal outcome
    pub(crate) requester: String,
    /// Id of the submission message, echoed as `in_reply_to`
    pub(crate) request_message_id: String,
    pub(crate) stages: Vec<String>,
    pub(crate) current: usize,
    /// Stage name -> last RESULT content
    pub(crate) results: HashMap<String, Value>,
    /// Stage name -> re-dispatches caused by review rejections
    pub(crate) feedback_retries: HashMap<String, u32>,
    /// ERRORs received in a row for the current stage
    pub(crate) consecutive_errors: u32,
    /// Review feedback accumulated across rejections, oldest first
    pub(crate) feedback: Vec<Value>,
    pub(crate) last_error: Option<Value>,
    /// Content of the most recent TASK, reused for error retries
    pub(crate) last_task: Option<Value>,
    /// Number of TASKs sent for this job; the newest one is the only live attempt
    pub(crate) dispatches: u64,
    pub(crate) status: JobStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl PipelineJob {
    pub fn new(
        job_id: impl Into<String>,
        request: ReportRequest,
        requester: impl Into<String>,
        request_message_id: impl Into<String>,
        stages: Vec<String>,
    ) -> Self {
        let created_at = now();
        Self {
            job_id: job_id.into(),
            request,
            requester: requester.into(),
            request_message_id: request_message_id.into(),
            stages,
            current: 0,
            results: HashMap::new(),
            feedback_retries: HashMap::new(),
            consecutive_errors: 0,
            feedback: Vec::new(),
            last_error: None,
            last_task: None,
            dispatches: 0,
            status: JobStatus::Pending,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn request(&self) -> &ReportRequest {
        &self.request
    }

    pub fn requester(&self) -> &str {
        &self.requester
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn current_stage(&self) -> Option<&str> {
        self.stages.get(self.current).map(String::as_str)
    }

    pub fn result_of(&self, stage: &str) -> Option<&Value> {
        self.results.get(stage)
    }

    pub fn feedback_retries(&self, stage: &str) -> u32 {
        self.feedback_retries.get(stage).copied().unwrap_or_default()
    }

    pub fn total_feedback_retries(&self) -> u32 {
        self.feedback_retries.values().sum()
    }

    pub fn dispatches(&self) -> u64 {
        self.dispatches
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = now();
    }

    /// TASK content for the current stage: the request, every cached stage
    /// result, the accumulated review feedback and this stage's previous output
    pub fn task_content(&self) -> Value {
        let stage = self.current_stage().unwrap_or_default();
        let context: Map<String, Value> = self
            .results
            .iter()
            .map(|(stage, result)| (stage.clone(), result.clone()))
            .collect();

        json!({
            "job_id": self.job_id,
            "report_type": self.request.report_type,
            "target": self.request.target,
            "timeframe": self.request.timeframe,
            "stage": stage,
            "context": context,
            "feedback": self.feedback,
            "previous": self.results.get(stage),
        })
    }

    /// Status view returned for job status queries
    pub fn snapshot(&self) -> Value {
        json!({
            "job_id": self.job_id,
            "status": self.status,
            "request": self.request.to_content(),
            "stages": self.stages,
            "current_stage": self.current_stage(),
            "completed_stages": self.results.keys().collect::<Vec<_>>(),
            "feedback_retries": self.total_feedback_retries(),
            "dispatches": self.dispatches,
            "last_error": self.last_error,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parsing() {
        let request = ReportRequest::from_content(&json!({
            "report_type": "company",
            "target": " AAPL ",
        }))
        .unwrap();
        assert_eq!(request.report_type, ReportType::Company);
        assert_eq!(request.target, "AAPL");
        assert_eq!(request.timeframe, "1d");

        let request =
            ReportRequest::from_content(&json!({"type": "macro", "target": "rates", "timeframe": "1m"}))
                .unwrap();
        assert_eq!(request.report_type, ReportType::Macro);
        assert_eq!(request.timeframe, "1m");
    }

    #[test]
    fn test_request_rejections() {
        for content in [
            json!({"target": "AAPL"}),
            json!({"report_type": "crypto", "target": "BTC"}),
            json!({"report_type": "company", "target": "   "}),
            json!({"report_type": "company"}),
        ] {
            let err = ReportRequest::from_content(&content).unwrap_err();
            assert!(matches!(err, ReportflowError::InvalidRequest(_)), "{content}");
        }
    }

    #[test]
    fn test_task_content_carries_context() {
        let stages = vec!["research".to_string(), "writing".to_string()];
        let mut job = PipelineJob::new(
            "job-1",
            ReportRequest::new(ReportType::Macro, "rates"),
            "client",
            "msg-1",
            stages,
        );

        let first = job.task_content();
        assert_eq!(first["stage"], "research");
        assert_eq!(first["previous"], Value::Null);
        assert_eq!(first["context"], json!({}));

        job.results.insert("research".to_string(), json!({"datasets": []}));
        job.current = 1;
        job.feedback.push(json!("tighten summary"));
        let second = job.task_content();
        assert_eq!(second["stage"], "writing");
        assert_eq!(second["context"]["research"], json!({"datasets": []}));
        assert_eq!(second["feedback"], json!(["tighten summary"]));
        assert_eq!(job.status(), JobStatus::Pending);
    }
}
