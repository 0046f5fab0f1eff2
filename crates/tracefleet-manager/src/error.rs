//! Manager error types.

use thiserror::Error;
use tracefleet_state::{StateError, TracepointId};

use crate::messenger::MessengerError;

/// Result type alias for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors surfaced by the tracepoint lifecycle manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// An equivalent live deployment already exists under this name. Carries
    /// the existing id so the caller can refresh or observe it.
    #[error("tracepoint deployment already exists ({0})")]
    AlreadyExists(TracepointId),

    #[error("could not find tracepoint for given name: {0}")]
    NotFound(String),

    /// The name index returned a result of unexpected cardinality.
    #[error("could not fetch tracepoint")]
    NameLookup,

    /// The manager was closed and its collaborator references released.
    #[error("tracepoint manager is closed")]
    Closed,

    #[error("state store error: {0}")]
    Store(#[from] StateError),

    #[error("transport error: {0}")]
    Transport(#[from] MessengerError),

    #[error("envelope encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
