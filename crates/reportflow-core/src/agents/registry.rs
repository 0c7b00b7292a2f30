//! Mailbox registry for routing messages between agents

use crate::agents::base_agent::MessageSender;
use crate::agents::{Mailbox, Message, SendMode};
use async_trait::async_trait;
use reportflow_common::{ReportflowError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Type alias for mailbox storage
type MailboxMap = Arc<RwLock<HashMap<String, Arc<Mailbox>>>>;

/// Directory of agent mailboxes.
///
/// Each identity's mailbox is created here once and handed to the owning
/// agent; everyone else can only enqueue into it through `send_message`.
/// Cloning the registry shares the same directory.
#[derive(Clone, Default)]
pub struct MailboxRegistry {
    mailboxes: MailboxMap,
}

impl MailboxRegistry {
    /// Create a new, empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the mailbox for a new identity
    pub async fn register(&self, identity: &str, capacity: usize) -> Result<Arc<Mailbox>> {
        debug!("Registering mailbox: {} (capacity {})", identity, capacity);

        let mut mailboxes = self.mailboxes.write().await;
        if mailboxes.contains_key(identity) {
            return Err(ReportflowError::Generic(format!(
                "Mailbox for {} already exists",
                identity
            )));
        }

        let mailbox = Arc::new(Mailbox::new(identity, capacity));
        mailboxes.insert(identity.to_string(), mailbox.clone());
        Ok(mailbox)
    }

    /// Remove an identity; messages still queued are dropped with the mailbox
    pub async fn unregister(&self, identity: &str) -> Result<()> {
        debug!("Unregistering mailbox: {}", identity);

        let mut mailboxes = self.mailboxes.write().await;
        mailboxes
            .remove(identity)
            .ok_or_else(|| ReportflowError::UnknownRecipient(identity.to_string()))?;
        Ok(())
    }

    /// Look up a registered mailbox
    pub async fn mailbox(&self, identity: &str) -> Option<Arc<Mailbox>> {
        let mailboxes = self.mailboxes.read().await;
        mailboxes.get(identity).cloned()
    }

    /// Check if an identity has a mailbox
    pub async fn contains(&self, identity: &str) -> bool {
        let mailboxes = self.mailboxes.read().await;
        mailboxes.contains_key(identity)
    }

    /// List all registered identities
    pub async fn identities(&self) -> Vec<String> {
        let mailboxes = self.mailboxes.read().await;
        let mut identities: Vec<String> = mailboxes.keys().cloned().collect();
        identities.sort();
        identities
    }
}

#[async_trait]
impl MessageSender for MailboxRegistry {
    async fn send_message(&self, message: Message, mode: SendMode) -> Result<()> {
        debug!(
            "Routing {} message from {} to {}",
            message.message_type(),
            message.sender(),
            message.receiver()
        );

        let mailboxes = self.mailboxes.read().await;
        let target = mailboxes
            .get(message.receiver())
            .ok_or_else(|| ReportflowError::UnknownRecipient(message.receiver().to_string()))?
            .clone();
        drop(mailboxes); // Release the read lock before a possibly blocking send

        target.send(message, mode).await
    }
}
