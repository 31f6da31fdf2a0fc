//! Row-count and object-count reconciliation between two instances.

pub mod aggregate;
pub mod auditor;
pub mod catalog;
pub mod engine;
pub mod errors;
pub mod reconciler;
pub mod report;
pub mod scheduler;
mod sessions;

pub use aggregate::{ResultAggregator, RunSummary, RunTotals};
pub use auditor::{AuditReport, ObjectCountAuditor};
pub use catalog::SchemaCatalog;
pub use engine::{ReconcileEngine, RunReport};
pub use errors::ReportError;
pub use reconciler::{JobContext, ReconciliationJob};
pub use report::{CSV_HEADER, CsvSink, TabularSink, render_report, write_rows_csv};
pub use scheduler::{JobProgress, JobScheduler};
