//! In-memory adapter used to test the reconciliation engine.
//!
//! Only built for tests and with the `testing` feature.
//!
//! A [`MemoryConnector`] serves a fixed [`MemoryInstance`], records every
//! statement its sessions issue and can be told to fail at chosen points.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use rowparity_core::{Error, ObjectKind, Result, SnapshotToken};

use crate::adapter::{Connector, Session};

#[derive(Debug, Clone)]
struct MemoryTable {
    rows: i64,
    statistics: Option<i64>,
}

#[derive(Debug, Clone, Default)]
struct MemorySchema {
    tables: BTreeMap<String, MemoryTable>,
    views: u64,
    indexes: u64,
}

/// Catalog and data of one in-memory instance.
#[derive(Debug, Clone)]
pub struct MemoryInstance {
    schemas: BTreeMap<String, MemorySchema>,
    index_catalog: bool,
}

impl Default for MemoryInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInstance {
    pub fn new() -> Self {
        Self {
            schemas: BTreeMap::new(),
            index_catalog: true,
        }
    }

    /// Add an empty schema.
    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schemas.entry(schema.to_string()).or_default();
        self
    }

    /// Add a base table holding `rows` rows. Its statistics match the count.
    pub fn with_table(mut self, schema: &str, table: &str, rows: i64) -> Self {
        self.schemas.entry(schema.to_string()).or_default().tables.insert(
            table.to_string(),
            MemoryTable {
                rows,
                statistics: Some(rows),
            },
        );
        self
    }

    /// Override the statistics row estimate of an existing table.
    pub fn with_statistics(mut self, schema: &str, table: &str, estimate: Option<i64>) -> Self {
        if let Some(entry) = self
            .schemas
            .get_mut(schema)
            .and_then(|schema| schema.tables.get_mut(table))
        {
            entry.statistics = estimate;
        }
        self
    }

    pub fn with_views(mut self, schema: &str, count: u64) -> Self {
        self.schemas.entry(schema.to_string()).or_default().views = count;
        self
    }

    pub fn with_indexes(mut self, schema: &str, count: u64) -> Self {
        self.schemas.entry(schema.to_string()).or_default().indexes = count;
        self
    }

    /// Behave like an engine without the extended index catalog.
    pub fn without_index_catalog(mut self) -> Self {
        self.index_catalog = false;
        self
    }
}

/// Point at which a memory session reports an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailPoint {
    Connect,
    PinSnapshot,
    ListSchemas,
    ListTables { schema: String },
    CountRows { schema: String },
    Commit,
    CountObjects(ObjectKind),
    Close,
}

/// Statement issued by a memory session, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryStatement {
    PinSnapshot(i64),
    ListSchemas(String),
    ListTables(String),
    Begin,
    Commit,
    Rollback,
    CountRows { schema: String, tables: Vec<String> },
    EstimateRows { schema: String, tables: Vec<String> },
    CountObjects(ObjectKind),
}

#[derive(Debug, Clone)]
struct MemoryData {
    current: MemoryInstance,
    snapshots: BTreeMap<i64, MemoryInstance>,
    failures: Vec<FailPoint>,
    latency: Duration,
}

impl MemoryData {
    fn fails(&self, point: &FailPoint) -> bool {
        self.failures.contains(point)
    }

    fn view(&self, pinned: Option<i64>) -> &MemoryInstance {
        pinned
            .and_then(|token| self.snapshots.get(&token))
            .unwrap_or(&self.current)
    }
}

#[derive(Debug, Default)]
struct MemoryShared {
    log: Mutex<Vec<(usize, MemoryStatement)>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryShared {
    fn record(&self, session: usize, statement: MemoryStatement) {
        let mut log = self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        log.push((session, statement));
    }
}

/// Connector over a [`MemoryInstance`].
///
/// Clones share the statement log and session gauges.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    data: Arc<MemoryData>,
    shared: Arc<MemoryShared>,
}

impl MemoryConnector {
    pub fn new(instance: MemoryInstance) -> Self {
        Self {
            data: Arc::new(MemoryData {
                current: instance,
                snapshots: BTreeMap::new(),
                failures: Vec::new(),
                latency: Duration::ZERO,
            }),
            shared: Arc::new(MemoryShared::default()),
        }
    }

    /// Serve `instance` to sessions pinned to `token`.
    pub fn with_snapshot(mut self, token: i64, instance: MemoryInstance) -> Self {
        Arc::make_mut(&mut self.data)
            .snapshots
            .insert(token, instance);
        self
    }

    pub fn fail_on(mut self, point: FailPoint) -> Self {
        Arc::make_mut(&mut self.data).failures.push(point);
        self
    }

    /// Delay applied to every connect and statement.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.data).latency = latency;
        self
    }

    /// Every statement issued so far, across sessions.
    pub fn statements(&self) -> Vec<MemoryStatement> {
        self.session_statements()
            .into_iter()
            .map(|(_, statement)| statement)
            .collect()
    }

    /// Statements tagged with the id of the session that issued them.
    pub fn session_statements(&self) -> Vec<(usize, MemoryStatement)> {
        self.shared
            .log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Exact-count batch queries issued against `schema`.
    pub fn count_queries(&self, schema: &str) -> Vec<Vec<String>> {
        self.statements()
            .into_iter()
            .filter_map(|statement| match statement {
                MemoryStatement::CountRows { schema: name, tables } if name == schema => {
                    Some(tables)
                }
                _ => None,
            })
            .collect()
    }

    pub fn sessions_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Highest number of sessions that were open at the same time.
    pub fn max_concurrent_sessions(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn engine(&self) -> &'static str {
        "memory"
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }

    async fn connect(&self) -> Result<Box<dyn Session>> {
        delay(self.data.latency).await;
        if self.data.fails(&FailPoint::Connect) {
            return Err(Error::Connection("memory instance refused connection".to_string()));
        }

        let id = self.shared.opened.fetch_add(1, Ordering::SeqCst);
        let active = self.shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(MemorySession {
            id,
            data: Arc::clone(&self.data),
            shared: Arc::clone(&self.shared),
            pinned: None,
            released: false,
        }))
    }
}

async fn delay(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

struct MemorySession {
    id: usize,
    data: Arc<MemoryData>,
    shared: Arc<MemoryShared>,
    pinned: Option<i64>,
    released: bool,
}

impl MemorySession {
    async fn issue(&self, statement: MemoryStatement) -> Result<()> {
        if self.released {
            return Err(Error::Connection("memory session is closed".to_string()));
        }
        delay(self.data.latency).await;
        self.shared.record(self.id, statement);
        Ok(())
    }

    fn check(&self, point: FailPoint) -> Result<()> {
        if self.data.fails(&point) {
            return Err(Error::Query(format!("injected failure at {point:?}")));
        }
        Ok(())
    }

    fn schema(&self, schema: &str) -> Option<&MemorySchema> {
        self.data.view(self.pinned).schemas.get(schema)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.shared.active.fetch_sub(1, Ordering::SeqCst);
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn pin_snapshot(&mut self, token: SnapshotToken) -> Result<()> {
        self.issue(MemoryStatement::PinSnapshot(token.value())).await?;
        self.check(FailPoint::PinSnapshot)?;
        self.pinned = Some(token.value());
        Ok(())
    }

    async fn list_schemas(&mut self, pattern: &str) -> Result<Vec<String>> {
        self.issue(MemoryStatement::ListSchemas(pattern.to_string()))
            .await?;
        if self.data.fails(&FailPoint::ListSchemas) {
            return Err(Error::Connection(format!(
                "listing schemas like '{pattern}': injected failure"
            )));
        }
        Ok(self
            .data
            .view(self.pinned)
            .schemas
            .keys()
            .filter(|name| like_match(pattern, name))
            .cloned()
            .collect())
    }

    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        self.issue(MemoryStatement::ListTables(schema.to_string()))
            .await?;
        self.check(FailPoint::ListTables {
            schema: schema.to_string(),
        })?;
        Ok(self
            .schema(schema)
            .map(|found| found.tables.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn begin(&mut self) -> Result<()> {
        self.issue(MemoryStatement::Begin).await
    }

    async fn commit(&mut self) -> Result<()> {
        self.issue(MemoryStatement::Commit).await?;
        self.check(FailPoint::Commit)
    }

    async fn rollback(&mut self) -> Result<()> {
        self.issue(MemoryStatement::Rollback).await
    }

    async fn count_rows(&mut self, schema: &str, tables: &[String]) -> Result<Vec<(String, i64)>> {
        self.issue(MemoryStatement::CountRows {
            schema: schema.to_string(),
            tables: tables.to_vec(),
        })
        .await?;
        self.check(FailPoint::CountRows {
            schema: schema.to_string(),
        })?;

        let found = self.schema(schema);
        tables
            .iter()
            .map(|table| {
                found
                    .and_then(|entries| entries.tables.get(table))
                    .map(|entry| (table.clone(), entry.rows))
                    .ok_or_else(|| {
                        Error::Query(format!("table '{schema}.{table}' doesn't exist"))
                    })
            })
            .collect()
    }

    async fn estimate_rows(
        &mut self,
        schema: &str,
        tables: &[String],
    ) -> Result<Vec<(String, i64)>> {
        self.issue(MemoryStatement::EstimateRows {
            schema: schema.to_string(),
            tables: tables.to_vec(),
        })
        .await?;

        let Some(found) = self.schema(schema) else {
            return Ok(Vec::new());
        };
        Ok(tables
            .iter()
            .filter_map(|table| {
                let estimate = found.tables.get(table)?.statistics?;
                Some((table.clone(), estimate))
            })
            .collect())
    }

    async fn count_objects(&mut self, kind: ObjectKind) -> Result<BTreeMap<String, u64>> {
        self.issue(MemoryStatement::CountObjects(kind)).await?;
        self.check(FailPoint::CountObjects(kind))?;

        let view = self.data.view(self.pinned);
        if kind == ObjectKind::Indexes && !view.index_catalog {
            return Err(Error::Query(
                "unknown table 'TIDB_INDEXES' in information_schema".to_string(),
            ));
        }

        Ok(view
            .schemas
            .iter()
            .filter_map(|(name, schema)| {
                let count = match kind {
                    ObjectKind::Tables => schema.tables.len() as u64,
                    ObjectKind::Indexes => schema.indexes,
                    ObjectKind::Views => schema.views,
                };
                (count > 0).then(|| (name.clone(), count))
            })
            .collect())
    }

    async fn close(&mut self) -> Result<()> {
        self.release();
        if self.data.fails(&FailPoint::Close) {
            return Err(Error::Connection("injected failure while closing".to_string()));
        }
        Ok(())
    }
}

/// SQL `LIKE` matching: `%` matches any sequence, `_` one character and `\`
/// escapes the next character.
pub(crate) fn like_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();
    like_from(&pattern, &value)
}

fn like_from(pattern: &[char], value: &[char]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some(('%', rest)) => (0..=value.len()).any(|skip| like_from(rest, &value[skip..])),
        Some(('_', rest)) => !value.is_empty() && like_from(rest, &value[1..]),
        Some(('\\', rest)) if !rest.is_empty() => {
            value.first() == Some(&rest[0]) && like_from(&rest[1..], &value[1..])
        }
        Some((ch, rest)) => value.first() == Some(ch) && like_from(rest, &value[1..]),
    }
}
