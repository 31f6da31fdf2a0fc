use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of schema object compared by the object-count audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Tables,
    Indexes,
    Views,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 3] = [ObjectKind::Tables, ObjectKind::Indexes, ObjectKind::Views];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Tables => "tables",
            ObjectKind::Indexes => "indexes",
            ObjectKind::Views => "views",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-schema object counts of one instance.
///
/// `indexes` stays empty when the engine exposes no extended index catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCountSnapshot {
    pub tables: BTreeMap<String, u64>,
    pub indexes: BTreeMap<String, u64>,
    pub views: BTreeMap<String, u64>,
}

impl ObjectCountSnapshot {
    pub fn counts(&self, kind: ObjectKind) -> &BTreeMap<String, u64> {
        match kind {
            ObjectKind::Tables => &self.tables,
            ObjectKind::Indexes => &self.indexes,
            ObjectKind::Views => &self.views,
        }
    }

    pub fn counts_mut(&mut self, kind: ObjectKind) -> &mut BTreeMap<String, u64> {
        match kind {
            ObjectKind::Tables => &mut self.tables,
            ObjectKind::Indexes => &mut self.indexes,
            ObjectKind::Views => &mut self.views,
        }
    }
}

/// Comparison of one object kind for one schema across both instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCountComparison {
    pub schema: String,
    pub kind: ObjectKind,
    pub src: u64,
    pub dst: u64,
    pub diff: u64,
    pub ok: bool,
}

/// Verdict for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Consistent,
    Inconsistent,
    DestinationTableAbsent,
}

impl RowStatus {
    /// Label written to reports and the tabular sink.
    pub fn label(&self) -> &'static str {
        match self {
            RowStatus::Consistent => "consistent",
            RowStatus::Inconsistent => "inconsistent",
            RowStatus::DestinationTableAbsent => "destination table absent",
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Count assigned to the destination side when the table does not exist there.
pub const ABSENT_COUNT: i64 = -1;

/// Row-count verdict for one table of one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCountRecord {
    pub schema: String,
    pub table: String,
    pub src_count: i64,
    pub dst_count: i64,
    /// `None` when the destination table is absent.
    pub abs_diff: Option<u64>,
    pub status: RowStatus,
}

impl RowCountRecord {
    /// Compare two counts against the tolerated absolute difference.
    pub fn compared(
        schema: impl Into<String>,
        table: impl Into<String>,
        src_count: i64,
        dst_count: i64,
        threshold: u64,
    ) -> Self {
        let diff = src_count.abs_diff(dst_count);
        let status = if diff <= threshold {
            RowStatus::Consistent
        } else {
            RowStatus::Inconsistent
        };
        Self {
            schema: schema.into(),
            table: table.into(),
            src_count,
            dst_count,
            abs_diff: Some(diff),
            status,
        }
    }

    pub fn destination_absent(
        schema: impl Into<String>,
        table: impl Into<String>,
        src_count: i64,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            src_count,
            dst_count: ABSENT_COUNT,
            abs_diff: None,
            status: RowStatus::DestinationTableAbsent,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.status == RowStatus::Consistent
    }

    /// `absolute_difference` column value, `N/A` when not comparable.
    pub fn diff_label(&self) -> String {
        self.abs_diff
            .map(|diff| diff.to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

/// Lifecycle stages of a reconciliation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Start,
    TablesListed,
    CardinalityChecked,
    BatchCounting,
    Reconciled,
    Done,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStage::Start => "start",
            JobStage::TablesListed => "tables_listed",
            JobStage::CardinalityChecked => "cardinality_checked",
            JobStage::BatchCounting => "batch_counting",
            JobStage::Reconciled => "reconciled",
            JobStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    /// The job failed while in `stage`.
    Failed { stage: JobStage },
}

/// Everything one reconciliation job hands back to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub schema: String,
    pub errors: Vec<String>,
    pub rows: Vec<RowCountRecord>,
    pub status: JobStatus,
}

impl JobOutcome {
    /// Outcome of a job that aborted: one synthetic error and no rows.
    pub fn failed(schema: impl Into<String>, stage: JobStage, message: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            errors: vec![message.into()],
            rows: Vec::new(),
            status: JobStatus::Failed { stage },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, JobStatus::Failed { .. })
    }
}
