use reportflow_common::ReportflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Represents the lifecycle states an agent can be in.
///
/// Within one task attempt the path is `Idle -> Running -> {Completed | Error}`;
/// a new attempt goes back through `Idle`. Recallable stages park in
/// `Waiting` and are resumed straight into `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    /// The agent has no task in progress.
    Idle,

    /// The agent is processing a task.
    Running,

    /// The last task attempt succeeded.
    Completed,

    /// The last task attempt failed.
    Error,

    /// The agent is blocked until feedback recalls it.
    Waiting,
}

impl AgentState {
    pub const ALL: [AgentState; 5] = [
        AgentState::Idle,
        AgentState::Running,
        AgentState::Completed,
        AgentState::Error,
        AgentState::Waiting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "IDLE",
            AgentState::Running => "RUNNING",
            AgentState::Completed => "COMPLETED",
            AgentState::Error => "ERROR",
            AgentState::Waiting => "WAITING",
        }
    }

    /// Whether the lifecycle permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: AgentState) -> bool {
        use AgentState::*;

        match (self, next) {
            (Idle, Running) => true,
            (Running, Completed) | (Running, Error) => true,
            (Completed, Idle) | (Error, Idle) | (Waiting, Idle) => true,
            (Waiting, Running) => true,
            (Waiting, Waiting) => false,
            (_, Waiting) => true,
            _ => false,
        }
    }

    /// Whether a task attempt has ended in this state
    pub fn is_settled(&self) -> bool {
        matches!(self, AgentState::Completed | AgentState::Error)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AgentState {
    type Err = ReportflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ReportflowError::Generic(format!("unknown agent state: {}", s)))
    }
}
