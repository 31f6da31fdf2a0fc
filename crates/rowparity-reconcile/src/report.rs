use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rowparity_core::RowCountRecord;

use crate::engine::RunReport;
use crate::errors::ReportError;

/// Column names of the tabular export.
pub const CSV_HEADER: [&str; 6] = [
    "database",
    "table",
    "source_count",
    "destination_count",
    "absolute_difference",
    "status",
];

/// Destination of the flat row list.
pub trait TabularSink {
    /// Write every record and return how many were written.
    fn write_rows(&mut self, rows: &[RowCountRecord]) -> Result<u64, ReportError>;
}

/// CSV export with a fixed header and one line per record.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvSink<BufWriter<File>> {
    /// Create (or truncate) the CSV file at `path`, creating parent directories.
    pub fn create(path: &Path) -> Result<Self, ReportError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(inner),
        }
    }

    pub fn into_inner(self) -> Result<W, ReportError> {
        self.writer
            .into_inner()
            .map_err(|err| ReportError::Io(err.into_error()))
    }
}

impl<W: Write> TabularSink for CsvSink<W> {
    fn write_rows(&mut self, rows: &[RowCountRecord]) -> Result<u64, ReportError> {
        self.writer.write_record(CSV_HEADER)?;
        for row in rows {
            self.writer.write_record([
                row.schema.clone(),
                row.table.clone(),
                row.src_count.to_string(),
                row.dst_count.to_string(),
                row.diff_label(),
                row.status.label().to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(rows.len() as u64)
    }
}

/// Write `rows` as CSV to `path`.
pub fn write_rows_csv(path: &Path, rows: &[RowCountRecord]) -> Result<u64, ReportError> {
    let mut sink = CsvSink::create(path)?;
    let written = sink.write_rows(rows)?;
    sink.into_inner()?.flush()?;
    Ok(written)
}

/// Render a deterministic markdown report of a run.
pub fn render_report(report: &RunReport) -> String {
    let mut lines = Vec::new();

    lines.push("# Rowparity Reconciliation Report".to_string());
    lines.push(String::new());
    lines.push("## Targets".to_string());
    if report.targets.is_empty() {
        lines.push("- none".to_string());
    }
    for target in &report.targets {
        lines.push(format!("- {target}"));
    }
    lines.push(String::new());

    if let Some(audit) = &report.audit {
        lines.push("## Object counts".to_string());
        if let Some(error) = &audit.error {
            lines.push(format!("- audit failed: {error}"));
        } else {
            if !audit.indexes_available {
                lines.push("- index counts unavailable on at least one side".to_string());
            }
            lines.push("| kind | schema | src | dst | diff | status |".to_string());
            lines.push("| --- | --- | --- | --- | --- | --- |".to_string());
            for row in &audit.comparisons {
                let status = if row.ok { "consistent" } else { "inconsistent" };
                lines.push(format!(
                    "| {} | {} | {} | {} | {} | {} |",
                    row.kind, row.schema, row.src, row.dst, row.diff, status
                ));
            }
        }
        lines.push(String::new());
    }

    if let Some(summary) = &report.summary {
        lines.push("## Row counts".to_string());
        for line in summary.summary_lines() {
            lines.push(format!("- {line}"));
        }
        lines.push(String::new());

        let totals = summary.totals();
        lines.push("## Totals".to_string());
        lines.push(format!("- schemas: {}", totals.schemas));
        lines.push(format!("- schemas with errors: {}", totals.schemas_with_errors));
        lines.push(format!("- failed jobs: {}", totals.failed_jobs));
        lines.push(format!(
            "- tables: {} ({} consistent, {} inconsistent, {} absent)",
            totals.rows, totals.consistent, totals.inconsistent, totals.absent
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use rowparity_core::{ObjectCountComparison, ObjectKind};

    use super::*;
    use crate::aggregate::ResultAggregator;
    use crate::auditor::AuditReport;

    fn rows() -> Vec<RowCountRecord> {
        vec![
            RowCountRecord::compared("shop", "orders", 10, 12, 1),
            RowCountRecord::destination_absent("shop", "c, \"quoted\"", 3),
        ]
    }

    #[test]
    fn csv_has_fixed_header_and_status_labels() {
        let mut sink = CsvSink::new(Vec::new());
        assert_eq!(sink.write_rows(&rows()).expect("write"), 2);
        let text = String::from_utf8(sink.into_inner().expect("inner")).expect("utf8");

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "database,table,source_count,destination_count,absolute_difference,status"
        );
        assert_eq!(lines[1], "shop,orders,10,12,2,inconsistent");
        assert_eq!(
            lines[2],
            "shop,\"c, \"\"quoted\"\"\",3,-1,N/A,destination table absent"
        );
    }

    #[test]
    fn writes_csv_file_under_new_directory() {
        let dir = std::env::temp_dir()
            .join(format!("rowparity_csv_{}", uuid::Uuid::new_v4()))
            .join("nested");
        let path = dir.join("rows.csv");

        let written = write_rows_csv(&path, &rows()).expect("write csv");
        assert_eq!(written, 2);
        let content = std::fs::read_to_string(&path).expect("read csv");
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn report_lists_audit_and_row_sections() {
        let mut aggregator = ResultAggregator::new(&["shop".to_string()]);
        aggregator.merge(rowparity_core::JobOutcome {
            schema: "shop".to_string(),
            errors: vec!["orders".to_string()],
            rows: rows()[..1].to_vec(),
            status: rowparity_core::JobStatus::Completed,
        });
        let report = RunReport {
            targets: vec!["shop".to_string()],
            audit: Some(AuditReport {
                comparisons: vec![ObjectCountComparison {
                    schema: "shop".to_string(),
                    kind: ObjectKind::Views,
                    src: 1,
                    dst: 0,
                    diff: 1,
                    ok: false,
                }],
                indexes_available: true,
                error: None,
            }),
            summary: Some(aggregator.finish()),
        };

        let text = render_report(&report);
        assert!(text.contains("| views | shop | 1 | 0 | 1 | inconsistent |"));
        assert!(text.contains("- shop: mismatched or missing tables: [orders]"));
        assert!(text.contains("- tables: 1 (0 consistent, 1 inconsistent, 0 absent)"));
    }
}
