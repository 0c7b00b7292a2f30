//! Configuration types and utilities for reportflow

use crate::constants::{self, stages, timeouts};
use crate::error::{ReportflowError, Result};
use crate::types::ReportType;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Base configuration that all components can use
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseConfig {
    pub log_level: String,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Mailbox sizing and timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Maximum queued messages per agent
    pub capacity: usize,
    /// Deadline for blocking sends under backpressure
    pub send_timeout_ms: u64,
    /// How long an idle agent loop waits before re-checking for shutdown
    pub poll_interval_ms: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            capacity: constants::DEFAULT_MAILBOX_CAPACITY,
            send_timeout_ms: timeouts::DEFAULT_SEND_TIMEOUT_MS,
            poll_interval_ms: timeouts::DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl MailboxConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Retry policy for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Re-dispatches allowed after review rejections, per job
    pub max_feedback_retries: u32,
    /// Local retries allowed after consecutive stage errors
    pub max_error_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_feedback_retries: constants::DEFAULT_MAX_FEEDBACK_RETRIES,
            max_error_retries: constants::DEFAULT_MAX_ERROR_RETRIES,
        }
    }
}

/// Stage orderings and stage ownership
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePipelineConfig {
    /// Report type name -> ordered stage names
    pub stages: BTreeMap<String, Vec<String>>,
    /// Stage name -> agent identity; stages not listed are owned by an agent of the same name
    pub stage_agents: BTreeMap<String, String>,
    /// Stage whose RESULT carries the approval verdict
    pub review_stage: String,
    /// Stage re-entered when the review rejects
    pub feedback_target: String,
}

impl Default for StagePipelineConfig {
    fn default() -> Self {
        let full: Vec<String> = [
            stages::RESEARCH,
            stages::ANALYSIS,
            stages::WRITING,
            stages::REVIEW,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let short: Vec<String> = [stages::RESEARCH, stages::WRITING, stages::REVIEW]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut map = BTreeMap::new();
        map.insert(ReportType::Company.to_string(), full.clone());
        map.insert(ReportType::Industry.to_string(), full);
        map.insert(ReportType::Macro.to_string(), short);

        Self {
            stages: map,
            stage_agents: BTreeMap::new(),
            review_stage: stages::REVIEW.to_string(),
            feedback_target: stages::WRITING.to_string(),
        }
    }
}

impl StagePipelineConfig {
    /// Ordered stages for a report type
    pub fn stages_for(&self, report_type: ReportType) -> Option<&[String]> {
        self.stages.get(report_type.as_str()).map(|s| s.as_slice())
    }

    /// Agent identity owning a stage
    pub fn agent_for<'a>(&'a self, stage: &'a str) -> &'a str {
        self.stage_agents
            .get(stage)
            .map(|s| s.as_str())
            .unwrap_or(stage)
    }

    /// Every stage name referenced by any report type, deduplicated in first-seen order
    pub fn all_stages(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for stage in self.stages.values().flatten() {
            if !seen.contains(stage) {
                seen.push(stage.clone());
            }
        }
        seen
    }
}

/// Monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub history_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            history_limit: constants::DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Bounds on bookkeeping for finished jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Finished jobs kept by the orchestrator; the oldest are forgotten first
    pub max_finished_jobs: usize,
    /// Outcomes a client stashes for jobs it is not currently waiting on
    pub max_unclaimed_outcomes: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_finished_jobs: constants::DEFAULT_MAX_FINISHED_JOBS,
            max_unclaimed_outcomes: constants::DEFAULT_MAX_UNCLAIMED_OUTCOMES,
        }
    }
}

/// Full configuration of the report pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub base: BaseConfig,
    pub mailbox: MailboxConfig,
    pub retry: RetryConfig,
    pub pipeline: StagePipelineConfig,
    pub monitor: MonitorConfig,
    pub retention: RetentionConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file, falling back to defaults when the file is absent
    pub fn load<P: AsRef<Path>>(config_path: P) -> anyhow::Result<Self> {
        let config_path = config_path.as_ref();

        if !config_path.exists() {
            tracing::debug!("No config at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        let config_str = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
        let config: Self = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", config_path))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, config_path: P) -> anyhow::Result<()> {
        let config_path = config_path.as_ref();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let config_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(config_path, config_str)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Check the invariants the scheduler relies on
    pub fn validate(&self) -> Result<()> {
        if self.mailbox.capacity == 0 {
            return Err(ReportflowError::Config(
                "mailbox capacity must be at least 1".to_string(),
            ));
        }

        for (report_type, sequence) in &self.pipeline.stages {
            report_type.parse::<ReportType>().map_err(|_| {
                ReportflowError::Config(format!("unknown report type: {}", report_type))
            })?;

            if sequence.is_empty() {
                return Err(ReportflowError::Config(format!(
                    "stage sequence for {} is empty",
                    report_type
                )));
            }

            let review = sequence
                .iter()
                .position(|s| *s == self.pipeline.review_stage);
            let target = sequence
                .iter()
                .position(|s| *s == self.pipeline.feedback_target);
            if let Some(review) = review {
                match target {
                    Some(target) if target < review => {}
                    _ => {
                        return Err(ReportflowError::Config(format!(
                            "feedback target {} must precede {} in the {} pipeline",
                            self.pipeline.feedback_target, self.pipeline.review_stage, report_type
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        for report_type in ReportType::ALL {
            assert!(config.pipeline.stages_for(report_type).is_some(), "{report_type}");
        }
        assert_eq!(
            config.pipeline.stages_for(ReportType::Company).unwrap(),
            &["research", "analysis", "writing", "review"]
        );
        assert_eq!(
            config.pipeline.stages_for(ReportType::Macro).unwrap(),
            &["research", "writing", "review"]
        );
        assert_eq!(config.pipeline.agent_for("writing"), "writing");
        assert_eq!(config.retry.max_feedback_retries, 3);
    }

    #[test]
    fn test_feedback_target_must_precede_review() {
        let mut config = PipelineConfig::default();
        config.pipeline.stages.insert(
            "company".to_string(),
            vec!["research".to_string(), "review".to_string(), "writing".to_string()],
        );
        assert!(matches!(config.validate(), Err(ReportflowError::Config(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = PipelineConfig::default();
        config.mailbox.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_file_and_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reportflow.toml");
        fs::write(
            &path,
            "[retry]\nmax_feedback_retries = 5\n\n[pipeline.stage_agents]\nwriting = \"writer-2\"\n",
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.retry.max_feedback_retries, 5);
        assert_eq!(config.retry.max_error_retries, 1);
        assert_eq!(config.pipeline.agent_for("writing"), "writer-2");
        assert_eq!(config.mailbox.capacity, 64);

        let saved = dir.path().join("nested").join("out.toml");
        config.save(&saved).unwrap();
        let reloaded = PipelineConfig::load(&saved).unwrap();
        assert_eq!(reloaded.retry.max_feedback_retries, 5);
    }

    #[test]
    fn test_empty_sections_fall_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reportflow.toml");
        fs::write(&path, "[base]\n\n[retention]\nmax_finished_jobs = 4\n").unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.base.log_level, "info");
        assert_eq!(config.retention.max_finished_jobs, 4);
        assert_eq!(config.retention.max_unclaimed_outcomes, 64);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.pipeline.review_stage, "review");
    }
}
