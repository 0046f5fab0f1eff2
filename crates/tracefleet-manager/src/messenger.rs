//! Agent messenger — addressed and broadcast delivery of control payloads.
//!
//! `AgentMessenger` is the transport seam: the manager hands it opaque
//! serialized envelopes and never learns how they travel. `ChannelMessenger`
//! is the in-process implementation, a registry of per-agent inboxes over
//! tokio channels, used by integration tests and single-process deployments.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use tracefleet_state::AgentId;

/// Errors surfaced by a messenger implementation.
#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("inbox closed for agent: {0}")]
    InboxClosed(AgentId),
}

/// Delivery of opaque control payloads to collection agents.
///
/// `send_to_agents` returns once every payload is enqueued; it does not wait
/// for agents to act. A failure mid-fan-out aborts the remaining sends and
/// surfaces verbatim.
#[async_trait]
pub trait AgentMessenger: Send + Sync {
    /// Deliver the payload to each of the addressed agents.
    async fn send_to_agents(&self, ids: &[AgentId], payload: Vec<u8>) -> Result<(), MessengerError>;

    /// Deliver the payload to every currently active agent.
    async fn broadcast(&self, payload: Vec<u8>) -> Result<(), MessengerError>;
}

/// In-process messenger backed by per-agent mpsc inboxes.
#[derive(Default)]
pub struct ChannelMessenger {
    inboxes: RwLock<HashMap<AgentId, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl ChannelMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent and return its inbox receiver. Registering an
    /// already-known agent replaces its inbox.
    pub fn register(&self, id: AgentId) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inboxes = self
            .inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        inboxes.insert(id, tx);
        debug!(agent = %id, "agent inbox registered");
        rx
    }

    /// Drop an agent's inbox; subsequent addressed sends to it fail.
    pub fn unregister(&self, id: AgentId) {
        let mut inboxes = self
            .inboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        inboxes.remove(&id);
        debug!(agent = %id, "agent inbox unregistered");
    }

    /// Ids of all currently registered agents.
    pub fn active_agents(&self) -> Vec<AgentId> {
        let inboxes = self
            .inboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        inboxes.keys().copied().collect()
    }
}

#[async_trait]
impl AgentMessenger for ChannelMessenger {
    async fn send_to_agents(&self, ids: &[AgentId], payload: Vec<u8>) -> Result<(), MessengerError> {
        let inboxes = self
            .inboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            let sender = inboxes.get(id).ok_or(MessengerError::UnknownAgent(*id))?;
            sender
                .send(payload.clone())
                .map_err(|_| MessengerError::InboxClosed(*id))?;
        }
        Ok(())
    }

    async fn broadcast(&self, payload: Vec<u8>) -> Result<(), MessengerError> {
        let inboxes = self
            .inboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for sender in inboxes.values() {
            // An agent that dropped its receiver is no longer active; skip it.
            let _ = sender.send(payload.clone());
        }
        Ok(())
    }
}
