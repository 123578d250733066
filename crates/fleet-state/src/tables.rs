//! redb table definitions.

use redb::TableDefinition;

/// Workload instances keyed by `{namespace}/{name}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Store-level counters (uid sequence).
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub const UID_SEQUENCE: &str = "uid_seq";
