mod config;
mod registry;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use rowparity_core::Error as CoreError;
use rowparity_introspect::{ConnectOptions, connector_for};
use rowparity_reconcile::{JobProgress, ReconcileEngine, render_report};
use registry::{RunContext, RunOptions, init_run_logging, start_run, write_outputs};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("{0}")]
    Core(#[from] CoreError),
    #[error("reconciliation found differences (see {0})")]
    Strict(PathBuf),
}

#[derive(Parser, Debug)]
#[command(name = "rowparity", version, about = "Row and object count reconciliation for MySQL and TiDB")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare a source instance against a destination instance.
    Check(CheckArgs),
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// TOML file with a [diff] table.
    #[arg(long, short = 'c', value_name = "PATH")]
    config: PathBuf,
    /// Also write the row CSV to this path (overrides diff.output).
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Override diff.concurrency.
    #[arg(long)]
    concurrency: Option<usize>,
    /// Output directory for runs.
    #[arg(long, default_value = "runs")]
    run_dir: PathBuf,
    /// Exit with an error when any schema reports differences.
    #[arg(long, default_value_t = false)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Check(args) => run_check(args).await,
    }
}

async fn run_check(args: CheckArgs) -> Result<(), CliError> {
    let CheckArgs {
        config,
        output,
        concurrency,
        run_dir,
        strict,
    } = args;

    let mut reconcile_config = config::load_config(&config)?;
    if output.is_some() {
        reconcile_config.output = output;
    }
    if let Some(concurrency) = concurrency {
        reconcile_config.concurrency = concurrency;
    }
    reconcile_config.validate()?;

    let run_id = Uuid::new_v4().to_string();
    let run_ctx = RunContext {
        run_id: run_id.clone(),
        started_at: chrono::Utc::now(),
        strict,
        run_dir,
        options: RunOptions::from_config(&reconcile_config),
        source: reconcile_config.src.instance.redacted(),
        destination: reconcile_config.dst.instance.redacted(),
    };

    let run_paths = start_run(&run_ctx)?;
    init_run_logging(&run_paths.logs_path)?;

    tracing::info!(
        event = "run_started",
        run_id = %run_id,
        source = %reconcile_config.src.instance,
        destination = %reconcile_config.dst.instance,
    );

    let timer = Instant::now();

    let options = ConnectOptions::from_config(&reconcile_config);
    let src = connector_for(&reconcile_config.src.instance, options.clone());
    let dst = connector_for(&reconcile_config.dst.instance, options);
    let output = reconcile_config.output.clone();

    let (tx, mut rx) = mpsc::channel::<JobProgress>(64);
    let progress = tokio::spawn(async move {
        let mut completed = 0usize;
        while let Some(event) = rx.recv().await {
            if let JobProgress::Finished { schema, total, .. } = event {
                completed += 1;
                tracing::info!(event = "run_progress", schema = %schema, completed, total);
            }
        }
    });

    let engine = ReconcileEngine::new(reconcile_config, src, dst)?.with_progress(tx);
    let result = engine.run().await;
    drop(engine);
    if let Err(err) = progress.await {
        tracing::warn!(event = "progress_task_failed", error = %err);
    }

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(event = "run_finished", status = "failed", kind = err.kind(), error = %err);
            return Err(err.into());
        }
    };

    write_outputs(&run_paths, &run_ctx, &report, output.as_deref())?;
    tracing::info!(event = "outputs_written", path = %run_paths.root.display());

    println!("{}", render_report(&report));

    let duration_ms = timer.elapsed().as_millis();
    let has_errors = report.has_errors();
    tracing::info!(
        event = "run_finished",
        status = "success",
        has_errors,
        duration_ms = duration_ms,
    );

    if run_ctx.strict && has_errors {
        return Err(CliError::Strict(run_paths.report_path));
    }

    Ok(())
}
