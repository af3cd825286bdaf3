//! redb table definitions for the outcome store.

use redb::TableDefinition;

/// Probe outcomes keyed by `(target_name, timestamp_ms)`, JSON-serialized.
pub const OUTCOMES: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("outcomes");
