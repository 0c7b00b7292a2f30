//! Deterministic placeholder stages.
//!
//! Data collection, analysis and prose generation live outside this crate;
//! these stages produce structurally valid content so a pipeline can run end
//! to end without them.

use crate::agents::stage::{Stage, require};
use async_trait::async_trait;
use reportflow_common::{ReportType, stages};
use serde_json::{Value, json};

/// Section headings every draft carries
pub const DRAFT_SECTIONS: [&str; 3] = ["Summary", "Analysis", "Risks"];

fn report_type(task: &Value) -> anyhow::Result<ReportType> {
    let raw = task["report_type"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing report_type"))?;
    Ok(raw.parse()?)
}

fn text(task: &Value, key: &str) -> String {
    task[key].as_str().unwrap_or_default().to_string()
}

/// Collects the datasets a report type needs
#[derive(Debug, Default)]
pub struct ResearchStage;

impl ResearchStage {
    /// Dataset kinds gathered for each report type
    pub fn datasets_for(report_type: ReportType) -> &'static [&'static str] {
        match report_type {
            ReportType::Company => &["market", "financial", "news"],
            ReportType::Industry => &["market", "news"],
            ReportType::Macro => &["news"],
        }
    }
}

#[async_trait]
impl Stage for ResearchStage {
    fn name(&self) -> &str {
        stages::RESEARCH
    }

    fn validate(&self, task: &Value) -> anyhow::Result<()> {
        report_type(task)?;
        require(task, "/target", "target")
    }

    async fn execute(&mut self, task: &Value) -> anyhow::Result<Value> {
        let report_type = report_type(task)?;
        let target = text(task, "target");
        let timeframe = text(task, "timeframe");

        let datasets: Vec<Value> = Self::datasets_for(report_type)
            .iter()
            .map(|kind| match *kind {
                "market" => json!({
                    "type": "market",
                    "code": target,
                    "timeframe": timeframe,
                    "data": { "close": [], "volume": [] },
                }),
                "financial" => json!({
                    "type": "financial",
                    "company": target,
                    "period": timeframe,
                    "data": { "revenue": null, "net_income": null },
                }),
                _ => json!({
                    "type": "news",
                    "target": target,
                    "timeframe": timeframe,
                    "news": [],
                }),
            })
            .collect();

        Ok(json!({
            "report_type": report_type,
            "target": target,
            "datasets": datasets,
        }))
    }
}

/// Summarizes research datasets into findings
#[derive(Debug, Default)]
pub struct AnalysisStage;

#[async_trait]
impl Stage for AnalysisStage {
    fn name(&self) -> &str {
        stages::ANALYSIS
    }

    fn validate(&self, task: &Value) -> anyhow::Result<()> {
        require(task, "/context/research/datasets", "research results")
    }

    async fn execute(&mut self, task: &Value) -> anyhow::Result<Value> {
        let target = text(task, "target");
        let datasets = task
            .pointer("/context/research/datasets")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let findings: Vec<String> = datasets
            .iter()
            .filter_map(|d| d["type"].as_str())
            .map(|kind| format!("{} data reviewed for {}", kind, target))
            .collect();

        Ok(json!({
            "target": target,
            "dataset_count": datasets.len(),
            "findings": findings,
        }))
    }
}

/// Drafts the report; recalled with review feedback when the draft is rejected
#[derive(Debug, Default)]
pub struct WritingStage {
    drafts: u32,
}

#[async_trait]
impl Stage for WritingStage {
    fn name(&self) -> &str {
        stages::WRITING
    }

    fn validate(&self, task: &Value) -> anyhow::Result<()> {
        let context = &task["context"];
        if context[stages::ANALYSIS].is_null() && context[stages::RESEARCH].is_null() {
            anyhow::bail!("missing analysis results");
        }
        Ok(())
    }

    async fn execute(&mut self, task: &Value) -> anyhow::Result<Value> {
        self.drafts += 1;
        let target = text(task, "target");
        let report_type = text(task, "report_type");

        let findings: Vec<String> = task
            .pointer("/context/analysis/findings")
            .and_then(Value::as_array)
            .map(|f| {
                f.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let analysis = if findings.is_empty() {
            format!("Based on collected research for {}.", target)
        } else {
            findings.join("; ")
        };

        let mut sections = vec![
            json!({
                "heading": DRAFT_SECTIONS[0],
                "body": format!("{} report on {}.", report_type, target),
            }),
            json!({ "heading": DRAFT_SECTIONS[1], "body": analysis }),
            json!({
                "heading": DRAFT_SECTIONS[2],
                "body": "Figures are preliminary and unaudited.",
            }),
        ];

        let feedback: Vec<Value> = task["feedback"].as_array().cloned().unwrap_or_default();
        if !feedback.is_empty() {
            sections.push(json!({ "heading": "Revision notes", "body": feedback }));
        }

        Ok(json!({
            "title": format!("{} {} report", target, report_type),
            "sections": sections,
            "revision": feedback.len(),
            "draft": self.drafts,
        }))
    }

    fn awaits_feedback(&self) -> bool {
        true
    }
}

/// Approves drafts that contain every required section
#[derive(Debug)]
pub struct ReviewStage {
    required_sections: Vec<String>,
}

impl Default for ReviewStage {
    fn default() -> Self {
        Self::new(DRAFT_SECTIONS.iter().map(|s| s.to_string()).collect())
    }
}

impl ReviewStage {
    pub fn new(required_sections: Vec<String>) -> Self {
        Self { required_sections }
    }
}

#[async_trait]
impl Stage for ReviewStage {
    fn name(&self) -> &str {
        stages::REVIEW
    }

    fn validate(&self, task: &Value) -> anyhow::Result<()> {
        require(task, "/context/writing/sections", "writing draft")
    }

    async fn execute(&mut self, task: &Value) -> anyhow::Result<Value> {
        let headings: Vec<&str> = task
            .pointer("/context/writing/sections")
            .and_then(Value::as_array)
            .map(|s| s.iter().filter_map(|s| s["heading"].as_str()).collect())
            .unwrap_or_default();

        let missing: Vec<&str> = self
            .required_sections
            .iter()
            .map(String::as_str)
            .filter(|required| !headings.contains(required))
            .collect();

        if missing.is_empty() {
            Ok(json!({ "approved": true, "comments": "all required sections present" }))
        } else {
            Ok(json!({
                "approved": false,
                "feedback": format!("missing sections: {}", missing.join(", ")),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_research_datasets_follow_report_type() {
        let mut stage = ResearchStage;
        let task = json!({"report_type": "company", "target": "AAPL", "timeframe": "1d"});
        stage.validate(&task).unwrap();

        let out = stage.execute(&task).await.unwrap();
        let kinds: Vec<&str> = out["datasets"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["market", "financial", "news"]);

        assert!(stage.validate(&json!({"report_type": "macro"})).is_err());
        assert!(stage.validate(&json!({"report_type": "crypto", "target": "BTC"})).is_err());
    }

    #[tokio::test]
    async fn test_draft_passes_review() {
        let mut research = ResearchStage;
        let mut analysis = AnalysisStage;
        let mut writing = WritingStage::default();
        let mut review = ReviewStage::default();

        let mut task = json!({"report_type": "industry", "target": "semis", "timeframe": "1w"});
        let research_out = research.execute(&task).await.unwrap();
        task["context"] = json!({ "research": research_out });

        analysis.validate(&task).unwrap();
        let analysis_out = analysis.execute(&task).await.unwrap();
        assert_eq!(analysis_out["dataset_count"], 2);
        task["context"]["analysis"] = analysis_out;

        writing.validate(&task).unwrap();
        let draft = writing.execute(&task).await.unwrap();
        task["context"]["writing"] = draft;

        review.validate(&task).unwrap();
        let verdict = review.execute(&task).await.unwrap();
        assert_eq!(verdict["approved"], true);
    }

    #[tokio::test]
    async fn test_review_rejects_missing_sections() {
        let mut review = ReviewStage::new(vec!["Summary".to_string(), "Outlook".to_string()]);
        let task = json!({
            "context": { "writing": { "sections": [ { "heading": "Summary", "body": "" } ] } }
        });

        let verdict = review.execute(&task).await.unwrap();
        assert_eq!(verdict["approved"], false);
        assert_eq!(verdict["feedback"], "missing sections: Outlook");
    }

    #[tokio::test]
    async fn test_writing_includes_feedback() {
        let mut writing = WritingStage::default();
        let task = json!({
            "report_type": "macro",
            "target": "rates",
            "context": { "research": { "datasets": [] } },
            "feedback": ["add outlook"],
        });

        writing.validate(&task).unwrap();
        let draft = writing.execute(&task).await.unwrap();
        assert_eq!(draft["revision"], 1);
        assert_eq!(draft["sections"][3]["heading"], "Revision notes");
        assert!(writing.awaits_feedback());
    }
}
