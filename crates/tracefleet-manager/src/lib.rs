//! tracefleet-manager — tracepoint lifecycle management.
//!
//! The manager is the authoritative controller between user intent (deploy a
//! named set of instrumentation programs across the fleet) and the physical
//! install/remove of those programs on matching agents.
//!
//! # Architecture
//!
//! ```text
//! Caller
//!   └── TracepointManager
//!       ├── create_tracepoint() → persist record, lease, name binding
//!       ├── register_tracepoint() → selector eval → fan-out groups → send
//!       ├── update_agent_status() → detect full termination → delete record
//!       ├── remove_tracepoints() → drop leases (reaper finishes the job)
//!       └── TTL reaper (background)
//!           └── terminate expired → broadcast RemoveTracepoint
//!
//! Collaborators (capability traits, swappable in tests)
//!   ├── TracepointStore — durable deployment/status/lease state
//!   └── AgentMessenger — addressed + broadcast payload delivery
//! ```
//!
//! Removal is a distributed protocol: dropping a lease lets the reaper mark
//! the deployment terminated and broadcast a remove; the record itself is
//! deleted only once every agent has reported back terminated.

pub mod agent;
pub mod envelope;
pub mod error;
pub mod fanout;
pub mod manager;
pub mod messenger;
pub mod selector;

pub use agent::{Agent, HostInfo, KernelVersion};
pub use envelope::ControlMessage;
pub use error::{ManagerError, ManagerResult};
pub use fanout::{plan_register, FanoutGroup};
pub use manager::TracepointManager;
pub use messenger::{AgentMessenger, ChannelMessenger, MessengerError};
