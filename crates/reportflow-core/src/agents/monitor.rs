//! Passive observer of agent lifecycle STATUS messages

use crate::agents::{AgentState, BaseAgent, Message, MessageHandler};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Last-known state of one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    pub state: AgentState,
    pub previous: Option<AgentState>,
    pub updated_at: DateTime<Utc>,
    /// Sequence of the STATUS message this was taken from
    pub sequence: u64,
}

/// One entry of an agent's state history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub from: Option<AgentState>,
    pub to: AgentState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MonitorView {
    latest: HashMap<String, AgentStatus>,
    history: HashMap<String, VecDeque<StateChange>>,
}

/// Read-only access to what the monitor has observed.
///
/// Cloning is cheap; every clone sees the same view.
#[derive(Debug, Clone, Default)]
pub struct MonitorHandle {
    view: Arc<RwLock<MonitorView>>,
}

impl MonitorHandle {
    /// Last-known state of every agent that has reported, ordered by identity
    pub fn snapshot(&self) -> BTreeMap<String, AgentStatus> {
        self.read()
            .latest
            .iter()
            .map(|(agent, status)| (agent.clone(), status.clone()))
            .collect()
    }

    pub fn state_of(&self, agent: &str) -> Option<AgentState> {
        self.read().latest.get(agent).map(|status| status.state)
    }

    /// Recent transitions of one agent, oldest first
    pub fn history(&self, agent: &str) -> Vec<StateChange> {
        self.read()
            .history
            .get(agent)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self) -> RwLockReadGuard<'_, MonitorView> {
        self.view.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MonitorView> {
        self.view.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Monitor behaviour: folds STATUS messages into the shared view
#[derive(Debug)]
pub struct Monitor {
    handle: MonitorHandle,
    history_limit: usize,
}

impl Monitor {
    pub fn new(history_limit: usize) -> Self {
        Self {
            handle: MonitorHandle::default(),
            history_limit: history_limit.max(1),
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    /// Apply one STATUS message. Returns false when it was stale or malformed.
    pub fn record(&self, message: &Message) -> bool {
        let content = message.content();
        let Some(state) = content["state"]
            .as_str()
            .and_then(|s| s.parse::<AgentState>().ok())
        else {
            warn!(
                "Ignoring malformed status {} from {}",
                message.id(),
                message.sender()
            );
            return false;
        };
        let previous = content["previous"]
            .as_str()
            .and_then(|s| s.parse::<AgentState>().ok());

        let agent = message.sender();
        let mut view = self.handle.write();

        if let Some(current) = view.latest.get(agent) {
            if current.sequence > message.sequence() {
                debug!(
                    "Dropping out-of-order status {} from {} (have #{}, got #{})",
                    state,
                    agent,
                    current.sequence,
                    message.sequence()
                );
                return false;
            }
        }

        view.latest.insert(
            agent.to_string(),
            AgentStatus {
                state,
                previous,
                updated_at: message.timestamp(),
                sequence: message.sequence(),
            },
        );

        let history = view.history.entry(agent.to_string()).or_default();
        history.push_back(StateChange {
            from: previous,
            to: state,
            at: message.timestamp(),
        });
        while history.len() > self.history_limit {
            history.pop_front();
        }
        true
    }
}

/// STATUS handler registered on the monitor agent
pub struct StatusHandler;

#[async_trait]
impl MessageHandler<Monitor> for StatusHandler {
    async fn handle(&self, agent: &mut BaseAgent<Monitor>, message: Message) -> anyhow::Result<()> {
        agent.behavior().record(&message);
        Ok(())
    }
}
