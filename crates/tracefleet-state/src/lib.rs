//! tracefleet-state — embedded tracepoint state store.
//!
//! Backed by [redb](https://docs.rs/redb), persists tracepoint deployment
//! records, the name index, per-agent installation statuses, and lease
//! expiries.
//!
//! # Architecture
//!
//! Domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Tracepoint and TTL tables key on raw 16-byte ids; agent statuses use a
//! `tracepoint_id ++ agent_id` composite key so a single table serves both
//! per-tracepoint scans and per-agent deletes.
//!
//! The store contract is the [`TracepointStore`] trait; [`RedbStore`] is
//! `Clone` + `Send` + `Sync` (backed by `Arc<Database>`) and can be shared
//! across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{now_millis, RedbStore, TracepointStore};
pub use types::*;
