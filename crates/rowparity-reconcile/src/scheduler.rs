use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};

use rowparity_core::{JobOutcome, JobStage};

use crate::aggregate::ResultAggregator;
use crate::reconciler::ReconciliationJob;

/// Progress event emitted while jobs run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobProgress {
    Started {
        schema: String,
        index: usize,
        total: usize,
    },
    Finished {
        schema: String,
        index: usize,
        total: usize,
        errors: usize,
        failed: bool,
    },
}

/// Runs one job per schema with at most `concurrency` jobs in flight.
#[derive(Debug, Clone)]
pub struct JobScheduler {
    concurrency: usize,
    progress: Option<mpsc::Sender<JobProgress>>,
}

impl JobScheduler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            progress: None,
        }
    }

    /// Emit progress events on `tx`. Events are dropped when the channel is full.
    pub fn with_progress(mut self, tx: mpsc::Sender<JobProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Run every job and merge each outcome into `aggregator`.
    ///
    /// Merging happens only on the calling task, whatever the concurrency. A
    /// job that panics is merged as a failed outcome for its schema.
    pub async fn run(&self, jobs: Vec<ReconciliationJob>, aggregator: &mut ResultAggregator) {
        let total = jobs.len();
        tracing::info!(event = "jobs_scheduled", total, concurrency = self.concurrency);

        // With one permit each job is spawned only after the previous one
        // finished, so jobs still run in order.
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(total);
        for (index, job) in jobs.into_iter().enumerate() {
            let schema = job.schema().to_string();
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    aggregator.merge(JobOutcome::failed(
                        schema,
                        JobStage::Start,
                        format!("scheduler closed: {err}"),
                    ));
                    continue;
                }
            };
            let progress = self.progress.clone();
            let handle = tokio::spawn(async move {
                let outcome = run_job(job, index, total, progress).await;
                drop(permit);
                outcome
            });
            handles.push((schema, handle));
        }

        for (schema, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(event = "job_panicked", schema = %schema, error = %err);
                    JobOutcome::failed(schema, JobStage::Start, format!("job task failed: {err}"))
                }
            };
            aggregator.merge(outcome);
        }
    }
}

async fn run_job(
    job: ReconciliationJob,
    index: usize,
    total: usize,
    progress: Option<mpsc::Sender<JobProgress>>,
) -> JobOutcome {
    let schema = job.schema().to_string();
    notify(
        progress.as_ref(),
        JobProgress::Started {
            schema: schema.clone(),
            index,
            total,
        },
    );
    let outcome = job.run().await;
    notify(
        progress.as_ref(),
        JobProgress::Finished {
            schema,
            index,
            total,
            errors: outcome.errors.len(),
            failed: outcome.is_failed(),
        },
    );
    outcome
}

fn notify(progress: Option<&mpsc::Sender<JobProgress>>, event: JobProgress) {
    if let Some(tx) = progress {
        if let Err(err) = tx.try_send(event) {
            tracing::debug!(event = "progress_dropped", error = %err);
        }
    }
}
