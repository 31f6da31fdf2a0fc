use std::fs::{OpenOptions, create_dir_all};
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use serde::Serialize;

use rowparity_core::{CountMode, RedactedConnection, ReconcileConfig, TargetSelection};
use rowparity_reconcile::{RunReport, RunTotals, render_report, write_rows_csv};

use super::{RegistryError, RegistryResult};

/// Serializable options for runs.
#[derive(Debug, Clone, Serialize)]
pub struct RunOptions {
    pub threshold: u64,
    pub concurrency: usize,
    pub batch_size: usize,
    pub compare: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dbs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<String>>,
    pub ignore_tables: Vec<String>,
    pub count_mode: CountMode,
    pub connect_timeout_secs: u64,
    pub src_snapshot_ts: Option<String>,
    pub dst_snapshot_ts: Option<String>,
    pub output: Option<PathBuf>,
}

impl RunOptions {
    pub fn from_config(config: &ReconcileConfig) -> Self {
        let (dbs, tables) = match &config.targets {
            TargetSelection::Patterns(patterns) => (Some(patterns.clone()), None),
            TargetSelection::Tables(tables) => (
                None,
                Some(
                    tables
                        .iter()
                        .flat_map(|(schema, names)| {
                            names.iter().map(move |name| format!("{schema}.{name}"))
                        })
                        .collect(),
                ),
            ),
        };
        Self {
            threshold: config.threshold,
            concurrency: config.concurrency,
            batch_size: config.batch_size,
            compare: config.compare.iter().map(|item| item.to_string()).collect(),
            dbs,
            tables,
            ignore_tables: config.ignore_tables.iter().cloned().collect(),
            count_mode: config.count_mode,
            connect_timeout_secs: config.connect_timeout.as_secs(),
            src_snapshot_ts: config.src.snapshot_ts.clone(),
            dst_snapshot_ts: config.dst.snapshot_ts.clone(),
            output: config.output.clone(),
        }
    }
}

/// Metadata captured at run start.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub strict: bool,
    pub run_dir: PathBuf,
    pub options: RunOptions,
    pub source: RedactedConnection,
    pub destination: RedactedConnection,
}

/// JSON config written to each run directory.
#[derive(Debug, Serialize)]
pub struct RunConfig {
    pub run_id: String,
    pub started_at: String,
    pub strict: bool,
    pub options: RunOptions,
    pub source: RedactedConnection,
    pub destination: RedactedConnection,
    pub git: GitInfo,
}

/// Git metadata for reproducibility.
#[derive(Debug, Serialize)]
pub struct GitInfo {
    pub commit: Option<String>,
    pub dirty: Option<bool>,
}

/// Paths for run artifacts.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub logs_path: PathBuf,
    pub summary_path: PathBuf,
    pub rows_path: PathBuf,
    pub report_path: PathBuf,
}

/// Final state of a run, written as `summary.json`.
#[derive(Debug, Serialize)]
struct RunSummaryFile<'a> {
    run_id: &'a str,
    started_at: String,
    finished_at: String,
    has_errors: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    totals: Option<RunTotals>,
    summary_lines: Vec<String>,
    report: &'a RunReport,
}

pub fn start_run(ctx: &RunContext) -> RegistryResult<RunPaths> {
    let timestamp = ctx.started_at.format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let run_root = ctx
        .run_dir
        .join(format!("{timestamp}__run_{}", ctx.run_id));

    create_dir_all(&run_root)?;

    let config_path = run_root.join("config.json");
    let logs_path = run_root.join("logs.ndjson");

    let config = RunConfig {
        run_id: ctx.run_id.clone(),
        started_at: ctx.started_at.to_rfc3339(),
        strict: ctx.strict,
        options: ctx.options.clone(),
        source: ctx.source.clone(),
        destination: ctx.destination.clone(),
        git: collect_git_info(),
    };

    write_json(&config_path, &config)?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&logs_path)?;

    Ok(RunPaths {
        summary_path: run_root.join("summary.json"),
        rows_path: run_root.join("rows.csv"),
        report_path: run_root.join("report.md"),
        logs_path,
        root: run_root,
    })
}

/// Write the summary, the markdown report and, when rows were compared, the
/// CSV export (also to `output` when one is configured).
pub fn write_outputs(
    paths: &RunPaths,
    ctx: &RunContext,
    report: &RunReport,
    output: Option<&Path>,
) -> RegistryResult<()> {
    let summary = RunSummaryFile {
        run_id: &ctx.run_id,
        started_at: ctx.started_at.to_rfc3339(),
        finished_at: Utc::now().to_rfc3339(),
        has_errors: report.has_errors(),
        totals: report.summary.as_ref().map(|summary| summary.totals()),
        summary_lines: report
            .summary
            .as_ref()
            .map(|summary| summary.summary_lines())
            .unwrap_or_default(),
        report,
    };
    write_json(&paths.summary_path, &summary)?;
    std::fs::write(&paths.report_path, render_report(report))?;

    if let Some(summary) = &report.summary {
        write_rows_csv(&paths.rows_path, &summary.rows)?;
        if let Some(output) = output {
            let written = write_rows_csv(output, &summary.rows)?;
            tracing::info!(event = "rows_exported", path = %output.display(), rows = written);
        }
    }

    Ok(())
}

pub fn collect_git_info() -> GitInfo {
    let commit = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            } else {
                None
            }
        })
        .filter(|value| !value.is_empty());

    let dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| !output.stdout.is_empty());

    GitInfo { commit, dirty }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> RegistryResult<()> {
    let file = OpenOptions::new().create(true).truncate(true).write(true).open(path)?;
    serde_json::to_writer_pretty(file, value).map_err(RegistryError::from)
}
