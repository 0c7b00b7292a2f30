//! Common types used across reportflow components

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ReportflowError;

/// Kind of research report a job produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Company,
    Industry,
    Macro,
}

impl ReportType {
    pub const ALL: [ReportType; 3] = [ReportType::Company, ReportType::Industry, ReportType::Macro];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Company => "company",
            ReportType::Industry => "industry",
            ReportType::Macro => "macro",
        }
    }
}

impl std::fmt::Display for ReportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = ReportflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "company" => Ok(ReportType::Company),
            "industry" => Ok(ReportType::Industry),
            "macro" => Ok(ReportType::Macro),
            other => Err(ReportflowError::InvalidRequest(format!(
                "unsupported report type: {}",
                other
            ))),
        }
    }
}
