//! Control message envelope — the wire format handed to the messenger.
//!
//! Envelopes are serialized to opaque bytes before leaving the manager;
//! agents decode them on the other side of the transport.

use serde::{Deserialize, Serialize};
use tracefleet_state::{TracepointDeployment, TracepointId};

/// A control message from the manager to one or more agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Install the carried deployment under the given tracepoint id.
    RegisterTracepoint {
        id: TracepointId,
        deployment: TracepointDeployment,
    },
    /// Tear down whatever the agent holds for the given tracepoint id.
    /// Agents that never registered it ignore the request.
    RemoveTracepoint { id: TracepointId },
}

impl ControlMessage {
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
