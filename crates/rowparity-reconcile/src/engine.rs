use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use rowparity_core::{CompareItem, Error, ReconcileConfig, Result, SnapshotToken, TargetSelection};
use rowparity_introspect::Connector;

use crate::aggregate::{ResultAggregator, RunSummary};
use crate::auditor::{AuditReport, ObjectCountAuditor};
use crate::catalog::SchemaCatalog;
use crate::reconciler::{JobContext, ReconciliationJob};
use crate::scheduler::{JobProgress, JobScheduler};

/// Everything a run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub targets: Vec<String>,
    /// Present when tables, indexes or views were compared.
    pub audit: Option<AuditReport>,
    /// Present when row counts were compared.
    pub summary: Option<RunSummary>,
}

impl RunReport {
    /// True when any schema reported errors or the audit found a difference.
    pub fn has_errors(&self) -> bool {
        let rows = self.summary.as_ref().is_some_and(RunSummary::has_errors);
        let audit = self
            .audit
            .as_ref()
            .is_some_and(|audit| audit.error.is_some() || audit.mismatches().next().is_some());
        rows || audit
    }
}

/// Reconcile a source instance against a destination instance.
pub struct ReconcileEngine {
    config: Arc<ReconcileConfig>,
    src: Arc<dyn Connector>,
    dst: Arc<dyn Connector>,
    progress: Option<mpsc::Sender<JobProgress>>,
}

impl ReconcileEngine {
    /// Validate `config` and build an engine over both connectors.
    pub fn new(
        config: ReconcileConfig,
        src: Arc<dyn Connector>,
        dst: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            src,
            dst,
            progress: None,
        })
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<JobProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<RunReport> {
        tracing::info!(
            event = "reconcile_started",
            src = %self.src.describe(),
            dst = %self.dst.describe(),
            concurrency = self.config.concurrency,
            threshold = self.config.threshold
        );

        let targets = self.resolve_targets().await?;
        let compare_rows = self.config.compares(CompareItem::Rows);
        if compare_rows && targets.is_empty() {
            return Err(Error::Config(
                "no schema matched the configured dbs or tables".to_string(),
            ));
        }

        let audit = if self.config.object_kinds().is_empty() {
            None
        } else {
            let auditor = ObjectCountAuditor::new(
                Arc::clone(&self.config),
                Arc::clone(&self.src),
                Arc::clone(&self.dst),
            );
            Some(auditor.audit().await)
        };

        let summary = if compare_rows {
            Some(self.reconcile_rows(&targets).await)
        } else {
            None
        };

        if let Some(summary) = &summary {
            for line in summary.summary_lines() {
                tracing::info!(event = "schema_summary", "{line}");
            }
        }
        tracing::info!(event = "reconcile_finished", targets = targets.len());

        Ok(RunReport {
            targets,
            audit,
            summary,
        })
    }

    async fn resolve_targets(&self) -> Result<Vec<String>> {
        match &self.config.targets {
            TargetSelection::Tables(tables) => Ok(tables.keys().cloned().collect()),
            TargetSelection::Patterns(patterns) => {
                let snapshot =
                    match SnapshotToken::parse_optional(self.config.src.snapshot_ts.as_deref()) {
                        Ok(token) => token,
                        Err(err) => {
                            tracing::warn!(
                                event = "catalog_unpinned",
                                error = %err,
                                "listing schemas without a snapshot"
                            );
                            None
                        }
                    };
                SchemaCatalog::new(Arc::clone(&self.src), snapshot)
                    .resolve(patterns)
                    .await
            }
        }
    }

    async fn reconcile_rows(&self, targets: &[String]) -> RunSummary {
        let ctx = JobContext {
            config: Arc::clone(&self.config),
            src: Arc::clone(&self.src),
            dst: Arc::clone(&self.dst),
        };
        let jobs = targets
            .iter()
            .map(|schema| ReconciliationJob::new(schema.clone(), ctx.clone()))
            .collect();

        let mut scheduler = JobScheduler::new(self.config.concurrency);
        if let Some(tx) = &self.progress {
            scheduler = scheduler.with_progress(tx.clone());
        }

        let mut aggregator = ResultAggregator::new(targets);
        scheduler.run(jobs, &mut aggregator).await;
        aggregator.finish()
    }
}
