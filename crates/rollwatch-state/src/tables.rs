//! redb table definitions for the rollwatch state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Environments (with their embedded deployments) keyed by `{name}`.
pub const ENVIRONMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("environments");

/// Cluster task records keyed by `{cluster}/{arn}`.
pub const TASKS: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");
