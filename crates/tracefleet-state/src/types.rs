//! Domain types for the tracefleet state store.
//!
//! These types represent the persisted state of tracepoint deployments and
//! the per-agent installation statuses reported back by collection agents.
//! All types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a tracepoint deployment.
pub type TracepointId = Uuid;

/// Unique identifier for a collection agent.
pub type AgentId = Uuid;

// ── Lifecycle ─────────────────────────────────────────────────────

/// Lifecycle state of a tracepoint, either expected (control plane intent)
/// or observed (reported by an agent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Running,
    Terminated,
    Failed,
}

// ── Program IR ────────────────────────────────────────────────────

/// Predicate kinds restricting which agents may install a program.
///
/// Unknown kinds deserialize as `NoCondition` and never filter anything,
/// so older managers tolerate selectors introduced by newer clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    MinKernel,
    MaxKernel,
    #[serde(other)]
    NoCondition,
}

/// A single selector: a kind plus its comparison value.
///
/// Kernel selectors carry a `"major.minor.patch"` version string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSelector {
    pub kind: SelectorKind,
    pub value: String,
}

/// One instrumentation program within a deployment.
///
/// The IR body is opaque to the control plane; it is compared structurally
/// and shipped to agents verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracepointProgram {
    pub name: String,
    /// Serialized program IR, compiled and validated elsewhere.
    pub ir: String,
    /// Agent predicates; an empty list matches every agent.
    #[serde(default)]
    pub selectors: Vec<ProgramSelector>,
}

/// Deployment options forwarded to agents untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// Target process selector understood by the agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// A named set of programs deployed together under one lease.
///
/// Program order is significant: two deployments are equivalent iff their
/// program lists are pairwise equal at the same index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracepointDeployment {
    pub name: String,
    /// Requested lease duration in seconds.
    pub ttl_secs: u64,
    #[serde(default)]
    pub deployment_spec: DeploymentSpec,
    pub programs: Vec<TracepointProgram>,
}

// ── Persisted records ─────────────────────────────────────────────

/// The persisted record binding a tracepoint id to its deployment and the
/// state the control plane expects agents to converge on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracepointRecord {
    pub id: TracepointId,
    pub name: String,
    pub deployment: TracepointDeployment,
    pub expected_state: LifecycleState,
}

/// Per-agent installation status, written by agents as they act on
/// register/remove requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTracepointStatus {
    pub tracepoint_id: TracepointId,
    pub agent_id: AgentId,
    pub state: LifecycleState,
    /// Optional human-readable detail (install error, probe site, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl AgentTracepointStatus {
    /// Composite key for the agent-status table: tracepoint id bytes
    /// followed by agent id bytes.
    pub fn table_key(&self) -> [u8; 32] {
        status_key(self.tracepoint_id, self.agent_id)
    }
}

/// Build the 32-byte composite status key for `(tracepoint, agent)`.
pub fn status_key(tracepoint_id: TracepointId, agent_id: AgentId) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(tracepoint_id.as_bytes());
    key[16..].copy_from_slice(agent_id.as_bytes());
    key
}
