//! redb table definitions for the tracefleet state store.
//!
//! Tracepoint and TTL tables key on the raw 16-byte id. Agent statuses use a
//! 32-byte composite key (tracepoint id ++ agent id) so one table serves both
//! per-tracepoint scans and per-agent deletes. The name index keys on the
//! deployment name string.

use redb::TableDefinition;

/// Tracepoint records keyed by the 16-byte tracepoint id.
pub const TRACEPOINTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tracepoints");

/// Name index: deployment name → 16-byte tracepoint id.
pub const NAMES: TableDefinition<&str, &[u8]> = TableDefinition::new("tracepoint_names");

/// Agent statuses keyed by `tracepoint_id ++ agent_id` (32 bytes).
pub const AGENT_STATUSES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("agent_statuses");

/// Lease expiries keyed by the 16-byte tracepoint id; value is the absolute
/// expiry as unix milliseconds.
pub const TTLS: TableDefinition<&[u8], u64> = TableDefinition::new("tracepoint_ttls");
