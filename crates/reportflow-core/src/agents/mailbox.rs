//! Bounded FIFO mailbox owned by a single agent identity

use reportflow_common::{ReportflowError, Result};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::agents::Message;

/// How a send behaves when the target mailbox is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Fail immediately with `QueueFull`
    NonBlocking,

    /// Wait for space; `None` waits indefinitely, otherwise fail with `Timeout`
    Blocking { timeout: Option<Duration> },
}

impl SendMode {
    pub fn blocking(timeout: Duration) -> Self {
        SendMode::Blocking {
            timeout: Some(timeout),
        }
    }
}

/// Bounded, ordered message queue.
///
/// Messages leave in enqueue order. The only way a queued message disappears
/// without being received is `clear`.
#[derive(Debug)]
pub struct Mailbox {
    owner: String,
    capacity: usize,
    queue: Mutex<VecDeque<Message>>,
    not_empty: Notify,
    not_full: Notify,
}

impl Mailbox {
    pub fn new(owner: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            owner: owner.into(),
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Enqueue a message according to `mode`
    pub async fn send(&self, message: Message, mode: SendMode) -> Result<()> {
        let timeout = match mode {
            SendMode::NonBlocking => return self.try_send(message),
            SendMode::Blocking { timeout } => timeout,
        };

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut pending = message;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.push(pending) {
                Ok(()) => return Ok(()),
                Err(returned) => pending = returned,
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        debug!("Send to {} timed out, dropping {}", self.owner, pending.id());
                        return Err(ReportflowError::Timeout {
                            operation: "send",
                            agent: self.owner.clone(),
                            waited_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
                        });
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Enqueue without waiting; a full mailbox is left untouched
    pub fn try_send(&self, message: Message) -> Result<()> {
        self.push(message).map_err(|_| ReportflowError::QueueFull {
            agent: self.owner.clone(),
            capacity: self.capacity,
        })
    }

    /// Dequeue the oldest message, waiting up to `timeout` for one to arrive.
    ///
    /// `None` timeout waits indefinitely. Returns `None` when nothing arrived
    /// in time.
    pub async fn receive(&self, timeout: Option<Duration>) -> Option<Message> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.pop() {
                return Some(message);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.pop();
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Dequeue the oldest message if one is queued
    pub fn try_receive(&self) -> Option<Message> {
        self.pop()
    }

    /// Oldest message without removing it
    pub fn peek(&self) -> Option<Message> {
        self.lock().front().cloned()
    }

    /// Discard every queued message, returning how many were dropped
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut queue = self.lock();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        if dropped > 0 {
            debug!("Cleared {} messages from mailbox of {}", dropped, self.owner);
            self.not_full.notify_waiters();
        }
        dropped
    }

    fn push(&self, message: Message) -> std::result::Result<(), Message> {
        {
            let mut queue = self.lock();
            if queue.len() >= self.capacity {
                return Err(message);
            }
            queue.push_back(message);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    fn pop(&self) -> Option<Message> {
        let message = self.lock().pop_front();
        if message.is_some() {
            self.not_full.notify_one();
        }
        message
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
