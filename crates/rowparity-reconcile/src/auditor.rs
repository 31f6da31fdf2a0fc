use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use rowparity_core::{
    ObjectCountComparison, ObjectCountSnapshot, ObjectKind, ReconcileConfig, Result,
    SnapshotToken,
};
use rowparity_introspect::{Connector, Session};

use crate::sessions::{close_session, open_session};

/// Result of the schema-level object-count audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub comparisons: Vec<ObjectCountComparison>,
    /// False when either side has no extended index catalog.
    pub indexes_available: bool,
    /// Why the audit could not complete, if it could not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditReport {
    fn failed(message: String) -> Self {
        Self {
            comparisons: Vec::new(),
            indexes_available: false,
            error: Some(message),
        }
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &ObjectCountComparison> {
        self.comparisons.iter().filter(|comparison| !comparison.ok)
    }
}

/// Compares table, index and view counts of both instances.
#[derive(Clone)]
pub struct ObjectCountAuditor {
    config: Arc<ReconcileConfig>,
    src: Arc<dyn Connector>,
    dst: Arc<dyn Connector>,
}

impl ObjectCountAuditor {
    pub fn new(config: Arc<ReconcileConfig>, src: Arc<dyn Connector>, dst: Arc<dyn Connector>) -> Self {
        Self { config, src, dst }
    }

    /// Run the audit for the configured kinds. Failures are reported, not raised.
    pub async fn audit(&self) -> AuditReport {
        let kinds = self.config.object_kinds();
        match self.audit_inner(&kinds).await {
            Ok(report) => {
                log_comparisons(&report);
                report
            }
            Err(err) => {
                tracing::error!(event = "object_audit_failed", kind = err.kind(), error = %err);
                AuditReport::failed(err.to_string())
            }
        }
    }

    async fn audit_inner(&self, kinds: &[ObjectKind]) -> Result<AuditReport> {
        let src_token = SnapshotToken::parse_optional(self.config.src.snapshot_ts.as_deref())?;
        let dst_token = SnapshotToken::parse_optional(self.config.dst.snapshot_ts.as_deref())?;

        let (src, src_indexes) = count_objects("source", self.src.as_ref(), src_token, kinds).await?;
        let (dst, dst_indexes) =
            count_objects("destination", self.dst.as_ref(), dst_token, kinds).await?;

        Ok(AuditReport {
            comparisons: compare(&src, &dst, self.config.threshold, kinds),
            indexes_available: src_indexes && dst_indexes,
            error: None,
        })
    }
}

/// Count the objects of `kinds` per schema on one instance.
///
/// The returned flag is false when the index catalog is missing; index counts
/// are then left empty.
pub async fn count_objects(
    side: &'static str,
    connector: &dyn Connector,
    token: Option<SnapshotToken>,
    kinds: &[ObjectKind],
) -> Result<(ObjectCountSnapshot, bool)> {
    let mut session = open_session(side, connector, token).await?;
    let counted = count_on(side, session.as_mut(), kinds).await;
    close_session(side, session).await;
    counted
}

async fn count_on(
    side: &'static str,
    session: &mut dyn Session,
    kinds: &[ObjectKind],
) -> Result<(ObjectCountSnapshot, bool)> {
    let mut snapshot = ObjectCountSnapshot::default();
    let mut indexes_available = true;
    for &kind in kinds {
        match session.count_objects(kind).await {
            Ok(counts) => *snapshot.counts_mut(kind) = counts,
            Err(err) if kind == ObjectKind::Indexes => {
                tracing::info!(
                    event = "index_catalog_unavailable",
                    side,
                    error = %err,
                    "index counts skipped, engine has no extended index catalog"
                );
                indexes_available = false;
            }
            Err(err) => return Err(err),
        }
    }
    Ok((snapshot, indexes_available))
}

/// Compare two snapshots over the union of schemas seen on either side.
///
/// A schema missing on one side counts zero there. Output is ordered by kind,
/// then schema name.
pub fn compare(
    src: &ObjectCountSnapshot,
    dst: &ObjectCountSnapshot,
    threshold: u64,
    kinds: &[ObjectKind],
) -> Vec<ObjectCountComparison> {
    let schemas: BTreeSet<&String> = ObjectKind::ALL
        .iter()
        .flat_map(|&kind| src.counts(kind).keys().chain(dst.counts(kind).keys()))
        .collect();

    let selected: BTreeSet<ObjectKind> = kinds.iter().copied().collect();
    let mut comparisons = Vec::new();
    for kind in ObjectKind::ALL.into_iter().filter(|kind| selected.contains(kind)) {
        for schema in &schemas {
            let src_count = src.counts(kind).get(*schema).copied().unwrap_or(0);
            let dst_count = dst.counts(kind).get(*schema).copied().unwrap_or(0);
            let diff = src_count.abs_diff(dst_count);
            comparisons.push(ObjectCountComparison {
                schema: (*schema).clone(),
                kind,
                src: src_count,
                dst: dst_count,
                diff,
                ok: diff <= threshold,
            });
        }
    }
    comparisons
}

fn log_comparisons(report: &AuditReport) {
    for comparison in &report.comparisons {
        if comparison.ok {
            tracing::info!(
                event = "object_count_compared",
                kind = %comparison.kind,
                schema = %comparison.schema,
                src = comparison.src,
                dst = comparison.dst,
                diff = comparison.diff,
                ok = true
            );
        } else {
            tracing::warn!(
                event = "object_count_compared",
                kind = %comparison.kind,
                schema = %comparison.schema,
                src = comparison.src,
                dst = comparison.dst,
                diff = comparison.diff,
                ok = false
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rowparity_core::{InstanceDescriptor, SideConfig, TargetSelection};
    use rowparity_introspect::{FailPoint, MemoryConnector, MemoryInstance, MemoryStatement};

    use super::*;

    fn counts(entries: &[(&str, u64)]) -> BTreeMap<String, u64> {
        entries
            .iter()
            .map(|(schema, count)| (schema.to_string(), *count))
            .collect()
    }

    fn config() -> ReconcileConfig {
        ReconcileConfig::new(
            SideConfig::new(InstanceDescriptor::parse("mysql://u@src").expect("src")),
            SideConfig::new(InstanceDescriptor::parse("mysql://u@dst").expect("dst")),
            TargetSelection::Patterns(vec!["%".to_string()]),
        )
    }

    #[test]
    fn compares_union_of_schemas() {
        let src = ObjectCountSnapshot {
            tables: counts(&[("a", 3), ("b", 2)]),
            indexes: BTreeMap::new(),
            views: counts(&[("a", 1)]),
        };
        let dst = ObjectCountSnapshot {
            tables: counts(&[("a", 3), ("c", 4)]),
            indexes: BTreeMap::new(),
            views: counts(&[("a", 2)]),
        };

        let result = compare(&src, &dst, 0, &ObjectKind::ALL);
        let tables: Vec<_> = result
            .iter()
            .filter(|row| row.kind == ObjectKind::Tables)
            .map(|row| (row.schema.as_str(), row.src, row.dst, row.ok))
            .collect();
        assert_eq!(
            tables,
            vec![("a", 3, 3, true), ("b", 2, 0, false), ("c", 0, 4, false)]
        );
        assert_eq!(result.len(), 9);
        assert_eq!(result[3].kind, ObjectKind::Indexes);
        assert!(result[3].ok);

        let tolerant = compare(&src, &dst, 1, &[ObjectKind::Views]);
        assert_eq!(tolerant.len(), 3);
        assert!(tolerant.iter().all(|row| row.kind == ObjectKind::Views && row.ok));
    }

    #[tokio::test]
    async fn missing_index_catalog_leaves_indexes_empty() {
        let src = MemoryConnector::new(
            MemoryInstance::new()
                .with_table("a", "t", 1)
                .with_indexes("a", 2)
                .without_index_catalog(),
        );
        let dst = MemoryConnector::new(
            MemoryInstance::new()
                .with_table("a", "t", 1)
                .with_indexes("a", 2),
        );
        let auditor = ObjectCountAuditor::new(Arc::new(config()), Arc::new(src), Arc::new(dst));

        let report = auditor.audit().await;
        assert_eq!(report.error, None);
        assert!(!report.indexes_available);
        let index_row = report
            .comparisons
            .iter()
            .find(|row| row.kind == ObjectKind::Indexes)
            .expect("index comparison");
        assert_eq!((index_row.src, index_row.dst, index_row.ok), (0, 2, false));
    }

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
        let src = MemoryConnector::new(MemoryInstance::new().with_table("a", "t", 1))
            .fail_on(FailPoint::CountObjects(ObjectKind::Views));
        let dst = MemoryConnector::new(MemoryInstance::new().with_table("a", "t", 1));
        let auditor = ObjectCountAuditor::new(
            Arc::new(config()),
            Arc::new(src.clone()),
            Arc::new(dst),
        );

        let report = auditor.audit().await;
        assert!(report.error.is_some());
        assert!(report.comparisons.is_empty());
        assert_eq!(src.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn pins_each_side_and_honours_selected_kinds() {
        let src = MemoryConnector::new(MemoryInstance::new().with_views("a", 1));
        let dst = MemoryConnector::new(MemoryInstance::new().with_views("a", 1));
        let mut cfg = config();
        cfg.src = cfg.src.clone().with_snapshot("5");
        cfg.compare = [rowparity_core::CompareItem::Views].into_iter().collect();

        let auditor = ObjectCountAuditor::new(
            Arc::new(cfg),
            Arc::new(src.clone()),
            Arc::new(dst.clone()),
        );
        let report = auditor.audit().await;
        assert_eq!(report.comparisons.len(), 1);
        assert!(report.comparisons[0].ok);
        assert_eq!(
            src.statements(),
            vec![
                MemoryStatement::PinSnapshot(5),
                MemoryStatement::CountObjects(ObjectKind::Views),
            ]
        );
        assert_eq!(
            dst.statements(),
            vec![MemoryStatement::CountObjects(ObjectKind::Views)]
        );
    }

    #[tokio::test]
    async fn invalid_token_fails_the_audit_only() {
        let src = MemoryConnector::new(MemoryInstance::new());
        let dst = MemoryConnector::new(MemoryInstance::new());
        let mut cfg = config();
        cfg.dst = cfg.dst.clone().with_snapshot("soon");

        let auditor = ObjectCountAuditor::new(
            Arc::new(cfg),
            Arc::new(src.clone()),
            Arc::new(dst.clone()),
        );
        let report = auditor.audit().await;
        assert!(report.error.expect("error").contains("validation"));
        assert_eq!(src.sessions_opened(), 0);
        assert_eq!(dst.sessions_opened(), 0);
    }
}
