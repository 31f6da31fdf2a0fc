use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use rowparity_core::{JobOutcome, RowCountRecord, RowStatus};

/// Collects job outcomes as they complete.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    errors: BTreeMap<String, Vec<String>>,
    rows: Vec<RowCountRecord>,
    failed: BTreeSet<String>,
}

impl ResultAggregator {
    /// Seed an empty error list for every target schema.
    pub fn new(targets: &[String]) -> Self {
        Self {
            errors: targets
                .iter()
                .map(|schema| (schema.clone(), Vec::new()))
                .collect(),
            rows: Vec::new(),
            failed: BTreeSet::new(),
        }
    }

    pub fn merge(&mut self, outcome: JobOutcome) {
        if outcome.is_failed() {
            self.failed.insert(outcome.schema.clone());
        }
        self.errors
            .entry(outcome.schema)
            .or_default()
            .extend(outcome.errors);
        self.rows.extend(outcome.rows);
    }

    pub fn finish(mut self) -> RunSummary {
        self.rows
            .sort_by(|a, b| (&a.schema, &a.table).cmp(&(&b.schema, &b.table)));
        RunSummary {
            errors: self.errors,
            rows: self.rows,
            failed_jobs: self.failed.into_iter().collect(),
        }
    }
}

/// Merged result of every reconciliation job of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Error list per target schema; empty when every table matched.
    pub errors: BTreeMap<String, Vec<String>>,
    /// Every row-count verdict, sorted by schema then table.
    pub rows: Vec<RowCountRecord>,
    /// Schemas whose job aborted.
    pub failed_jobs: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub schemas: usize,
    pub schemas_with_errors: usize,
    pub failed_jobs: usize,
    pub rows: usize,
    pub consistent: usize,
    pub inconsistent: usize,
    pub absent: usize,
}

impl RunSummary {
    /// One line per schema, in schema order.
    pub fn summary_lines(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|(schema, errors)| {
                if errors.is_empty() {
                    format!("{schema}: all rows consistent")
                } else {
                    format!(
                        "{schema}: mismatched or missing tables: [{}]",
                        errors.join(", ")
                    )
                }
            })
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.errors.values().any(|errors| !errors.is_empty())
    }

    pub fn totals(&self) -> RunTotals {
        let count = |status: RowStatus| self.rows.iter().filter(|row| row.status == status).count();
        RunTotals {
            schemas: self.errors.len(),
            schemas_with_errors: self.errors.values().filter(|errors| !errors.is_empty()).count(),
            failed_jobs: self.failed_jobs.len(),
            rows: self.rows.len(),
            consistent: count(RowStatus::Consistent),
            inconsistent: count(RowStatus::Inconsistent),
            absent: count(RowStatus::DestinationTableAbsent),
        }
    }
}
