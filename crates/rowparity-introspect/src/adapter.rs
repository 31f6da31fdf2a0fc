use std::collections::BTreeMap;

use async_trait::async_trait;

use rowparity_core::{ObjectKind, Result, SnapshotToken};

/// Factory for sessions against one instance.
///
/// Every reconciliation job opens its own sessions through the connector, so
/// implementations must be shareable across tasks.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the engine identifier (e.g. `mysql`).
    fn engine(&self) -> &'static str;

    /// Redacted address used in logs.
    fn describe(&self) -> String;

    /// Open a new, exclusively owned session.
    async fn connect(&self) -> Result<Box<dyn Session>>;
}

/// One open connection, owned by exactly one job.
#[async_trait]
pub trait Session: Send {
    /// Pin every later read of this session to a historical read point.
    async fn pin_snapshot(&mut self, token: SnapshotToken) -> Result<()>;

    /// Schema names matching a LIKE pattern, ordered by name.
    async fn list_schemas(&mut self, pattern: &str) -> Result<Vec<String>>;

    /// Base tables of `schema`, ordered by name. Views are excluded.
    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>>;

    async fn begin(&mut self) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;

    /// Exact row counts of `tables` in one round-trip, as `(table, count)` pairs.
    async fn count_rows(&mut self, schema: &str, tables: &[String]) -> Result<Vec<(String, i64)>>;

    /// Row counts from table statistics, as `(table, count)` pairs.
    ///
    /// Tables without statistics may be missing from the result.
    async fn estimate_rows(
        &mut self,
        schema: &str,
        tables: &[String],
    ) -> Result<Vec<(String, i64)>>;

    /// Number of objects of `kind` per schema for the whole instance.
    async fn count_objects(&mut self, kind: ObjectKind) -> Result<BTreeMap<String, u64>>;

    /// Close the session. Further calls fail with a connection error.
    async fn close(&mut self) -> Result<()>;
}
