use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::Instrument;

use rowparity_core::{
    CountMode, Error, JobOutcome, JobStage, JobStatus, ReconcileConfig, Result, RowCountRecord,
    SnapshotToken, table_set,
};
use rowparity_introspect::{Connector, Session};

use crate::catalog::tables_on;
use crate::sessions::{close_session, open_session};

type CountMap = BTreeMap<String, i64>;

/// Shared, read-only inputs of every job of a run.
#[derive(Clone)]
pub struct JobContext {
    pub config: Arc<ReconcileConfig>,
    pub src: Arc<dyn Connector>,
    pub dst: Arc<dyn Connector>,
}

/// Row-count reconciliation of one schema.
///
/// The job owns its own pair of sessions and never shares mutable state with
/// other jobs. Every failure is folded into the returned [`JobOutcome`].
#[derive(Clone)]
pub struct ReconciliationJob {
    schema: String,
    ctx: JobContext,
}

impl ReconciliationJob {
    pub fn new(schema: impl Into<String>, ctx: JobContext) -> Self {
        Self {
            schema: schema.into(),
            ctx,
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub async fn run(self) -> JobOutcome {
        let span = tracing::info_span!("job", schema = %self.schema);
        async move {
            tracing::info!(event = "job_started");
            let mut stage = JobStage::Start;
            match self.execute(&mut stage).await {
                Ok(outcome) => {
                    tracing::info!(
                        event = "job_finished",
                        rows = outcome.rows.len(),
                        errors = outcome.errors.len()
                    );
                    outcome
                }
                Err(err) => {
                    tracing::error!(
                        event = "job_failed",
                        stage = %stage,
                        kind = err.kind(),
                        error = %err.detailed()
                    );
                    JobOutcome::failed(&self.schema, stage, err.detailed())
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, stage: &mut JobStage) -> Result<JobOutcome> {
        let config = &self.ctx.config;
        // Both tokens are checked before any session exists.
        let src_token = SnapshotToken::parse_optional(config.src.snapshot_ts.as_deref())?;
        let dst_token = SnapshotToken::parse_optional(config.dst.snapshot_ts.as_deref())?;

        let mut src = open_session("source", self.ctx.src.as_ref(), src_token).await?;
        let mut dst = match open_session("destination", self.ctx.dst.as_ref(), dst_token).await {
            Ok(session) => session,
            Err(err) => {
                close_session("source", src).await;
                return Err(err);
            }
        };

        let result = self.reconcile(src.as_mut(), dst.as_mut(), stage).await;
        close_session("source", src).await;
        close_session("destination", dst).await;
        result
    }

    async fn reconcile(
        &self,
        src: &mut dyn Session,
        dst: &mut dyn Session,
        stage: &mut JobStage,
    ) -> Result<JobOutcome> {
        let config = &self.ctx.config;
        let schema = self.schema.as_str();

        let (src_tables, dst_tables) = match config.explicit_tables(schema) {
            Some(tables) => {
                let tables = table_set(tables.iter().cloned(), &config.ignore_tables);
                (tables.clone(), tables)
            }
            None => (
                tables_on(src, schema, &config.ignore_tables).await?,
                tables_on(dst, schema, &config.ignore_tables).await?,
            ),
        };
        *stage = JobStage::TablesListed;

        check_cardinality(schema, &src_tables, &dst_tables)?;
        *stage = JobStage::CardinalityChecked;

        tracing::info!(
            event = "counting_rows",
            tables = src_tables.len(),
            mode = ?config.count_mode,
            batch_size = config.batch_size
        );
        *stage = JobStage::BatchCounting;
        let (src_counts, dst_counts) = self.count_both(src, dst, &src_tables, &dst_tables).await?;
        *stage = JobStage::Reconciled;

        let outcome = reconcile_counts(
            schema,
            &src_tables,
            &src_counts,
            &dst_counts,
            config.threshold,
        );
        *stage = JobStage::Done;
        Ok(outcome)
    }

    /// Count both sides inside one transaction each; any failure rolls both back.
    async fn count_both(
        &self,
        src: &mut dyn Session,
        dst: &mut dyn Session,
        src_tables: &[String],
        dst_tables: &[String],
    ) -> Result<(CountMap, CountMap)> {
        src.begin().await?;
        if let Err(err) = dst.begin().await {
            rollback("source", src).await;
            return Err(err);
        }

        let counted: Result<(CountMap, CountMap)> = async {
            let counts = self.count_batches(src, dst, src_tables, dst_tables).await?;
            src.commit().await?;
            dst.commit().await?;
            Ok(counts)
        }
        .await;

        if counted.is_err() {
            rollback("source", src).await;
            rollback("destination", dst).await;
        }
        counted
    }

    async fn count_batches(
        &self,
        src: &mut dyn Session,
        dst: &mut dyn Session,
        src_tables: &[String],
        dst_tables: &[String],
    ) -> Result<(CountMap, CountMap)> {
        let config = &self.ctx.config;
        let batch_size = config.batch_size.max(1);
        let batches = src_tables.len().div_ceil(batch_size);

        let mut src_counts = CountMap::new();
        let mut dst_counts = CountMap::new();
        for (index, (src_batch, dst_batch)) in src_tables
            .chunks(batch_size)
            .zip(dst_tables.chunks(batch_size))
            .enumerate()
        {
            count_batch(src, &self.schema, src_batch, config.count_mode, &mut src_counts).await?;
            count_batch(dst, &self.schema, dst_batch, config.count_mode, &mut dst_counts).await?;
            tracing::debug!(event = "batch_counted", batch = index + 1, batches);
        }
        Ok((src_counts, dst_counts))
    }
}

async fn count_batch(
    session: &mut dyn Session,
    schema: &str,
    batch: &[String],
    mode: CountMode,
    counts: &mut CountMap,
) -> Result<()> {
    match mode {
        CountMode::Exact => {
            counts.extend(session.count_rows(schema, batch).await?);
            if let Some(missing) = batch.iter().find(|table| !counts.contains_key(*table)) {
                return Err(Error::Query(format!(
                    "no row count returned for {schema}.{missing}"
                )));
            }
        }
        CountMode::Statistics => {
            let estimates: CountMap = session.estimate_rows(schema, batch).await?.into_iter().collect();
            for table in batch {
                counts.insert(table.clone(), estimates.get(table).copied().unwrap_or(0));
            }
        }
    }
    Ok(())
}

async fn rollback(side: &'static str, session: &mut dyn Session) {
    if let Err(err) = session.rollback().await {
        tracing::warn!(event = "rollback_failed", side, error = %err);
    }
}

/// Table sets must have the same, non-zero size to be compared table-for-table.
pub fn check_cardinality(schema: &str, src_tables: &[String], dst_tables: &[String]) -> Result<()> {
    if src_tables.len() != dst_tables.len() {
        let src_set: BTreeSet<&String> = src_tables.iter().collect();
        let dst_set: BTreeSet<&String> = dst_tables.iter().collect();
        return Err(Error::SchemaMismatch {
            schema: schema.to_string(),
            source_tables: src_tables.len(),
            destination_tables: dst_tables.len(),
            only_source: src_set.difference(&dst_set).map(|name| name.to_string()).collect(),
            only_destination: dst_set.difference(&src_set).map(|name| name.to_string()).collect(),
        });
    }
    if src_tables.is_empty() {
        return Err(Error::EmptySchema(schema.to_string()));
    }
    Ok(())
}

/// Turn both count maps into per-table verdicts, in source table order.
///
/// Tables whose counts differ beyond `threshold`, and source tables missing on
/// the destination, are listed in the outcome's errors.
pub fn reconcile_counts(
    schema: &str,
    src_tables: &[String],
    src_counts: &CountMap,
    dst_counts: &CountMap,
    threshold: u64,
) -> JobOutcome {
    let mut rows = Vec::with_capacity(src_tables.len());
    let mut errors = Vec::new();

    for table in src_tables {
        let src_count = src_counts.get(table).copied().unwrap_or_default();
        let record = match dst_counts.get(table) {
            Some(&dst_count) => {
                let record = RowCountRecord::compared(schema, table, src_count, dst_count, threshold);
                if !record.is_consistent() {
                    tracing::warn!(
                        event = "row_count_mismatch",
                        table = %table,
                        src = src_count,
                        dst = dst_count,
                        diff = ?record.abs_diff
                    );
                    errors.push(table.clone());
                }
                record
            }
            None => {
                tracing::warn!(event = "destination_table_absent", table = %table, src = src_count);
                errors.push(table.clone());
                RowCountRecord::destination_absent(schema, table, src_count)
            }
        };
        rows.push(record);
    }

    for table in dst_counts.keys().filter(|table| !src_counts.contains_key(*table)) {
        tracing::warn!(event = "source_table_absent", table = %table);
    }

    JobOutcome {
        schema: schema.to_string(),
        errors,
        rows,
        status: JobStatus::Completed,
    }
}
