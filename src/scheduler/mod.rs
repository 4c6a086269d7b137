//! Parallel scan scheduler
//!
//! Fans a list of jobs out in contiguous batches. A batch fully settles
//! before the next one starts; a shared session (one synthetic name for
//! the whole run) amortizes the browser launch across jobs and is closed
//! by the scheduler after the last batch. Per-job failures are isolated
//! into their report slots.

use async_trait::async_trait;
use futures::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::deep_merge;
use crate::detect::{CancelToken, DetectRequest, Detector, NoOpProgress, TestResult};

/// One unit of scheduled work — the external crawler's output contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanJob {
    pub url: String,
    pub selector: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub submit_selector: Option<String>,
}

/// Scheduler knobs.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Batch size; jobs in a batch run concurrently.
    pub concurrency: usize,
    /// Skip remaining batches once any job reports a finding.
    pub stop_on_first_vulnerability: bool,
    /// All jobs adopt one synthetic session name for the run.
    pub share_session: bool,
    /// Partial option overrides applied to every job.
    pub overrides: serde_json::Value,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            stop_on_first_vulnerability: false,
            share_session: false,
            overrides: serde_json::Value::Object(Default::default()),
        }
    }
}

/// Outcome slot for one job. Failures are carried as messages so one
/// broken target never poisons its batch.
#[derive(Debug)]
pub struct JobReport {
    pub job: ScanJob,
    pub outcome: Result<Vec<TestResult>, String>,
}

impl JobReport {
    pub fn findings(&self) -> usize {
        self.outcome.as_ref().map(|r| r.len()).unwrap_or(0)
    }
}

/// Executes individual jobs for the scheduler. The engine-backed
/// implementation is [`DetectorRunner`]; tests use stubs.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(
        &self,
        job: &ScanJob,
        overrides: serde_json::Value,
        cancel: CancelToken,
    ) -> Result<Vec<TestResult>, String>;

    async fn close_session(&self, name: &str);
}

/// [`JobRunner`] backed by the real detection engine.
pub struct DetectorRunner {
    detector: Arc<Detector>,
}

impl DetectorRunner {
    pub fn new(detector: Arc<Detector>) -> Self {
        Self { detector }
    }
}

#[async_trait]
impl JobRunner for DetectorRunner {
    async fn run_job(
        &self,
        job: &ScanJob,
        overrides: serde_json::Value,
        cancel: CancelToken,
    ) -> Result<Vec<TestResult>, String> {
        let request = DetectRequest::new(&job.url, &job.selector).with_overrides(overrides);
        self.detector
            .detect_xss(request, &NoOpProgress, cancel)
            .await
            .map(|outcome| outcome.results)
            .map_err(|e| e.to_string())
    }

    async fn close_session(&self, name: &str) {
        self.detector.sessions().close_session(name).await;
    }
}

/// Build the per-job overrides document from the run-wide overrides and
/// the job's own submit selector / shared session name.
fn job_overrides(
    base: &serde_json::Value,
    job: &ScanJob,
    shared_session: Option<&str>,
) -> serde_json::Value {
    let mut overrides = base.clone();
    let mut extra = serde_json::Map::new();
    if let Some(selector) = &job.submit_selector {
        extra.insert("submitSelector".into(), selector.clone().into());
    }
    if let Some(name) = shared_session {
        extra.insert(
            "session".into(),
            serde_json::json!({ "id": name, "closeAfter": false }),
        );
    }
    deep_merge(&mut overrides, &serde_json::Value::Object(extra));
    overrides
}

/// Run all jobs. Batches are contiguous slices of `concurrency` jobs;
/// when the stop flag trips, jobs already launched in the current batch
/// finish but later batches are skipped entirely.
pub async fn run_batch(
    runner: Arc<dyn JobRunner>,
    jobs: Vec<ScanJob>,
    options: SchedulerOptions,
    cancel: CancelToken,
) -> Vec<JobReport> {
    let concurrency = options.concurrency.max(1);
    let shared_session = options
        .share_session
        .then(|| format!("xssprobe-shared-{:08x}", rand::random::<u32>()));

    let total = jobs.len();
    let mut reports: Vec<JobReport> = Vec::with_capacity(total);
    let mut stop = false;

    for (batch_index, batch) in jobs.chunks(concurrency).enumerate() {
        if stop || cancel.is_cancelled() {
            info!(
                "skipping remaining {} jobs (stop-on-first-vulnerability)",
                total - reports.len()
            );
            for job in batch {
                reports.push(JobReport {
                    job: job.clone(),
                    outcome: Err("skipped".to_string()),
                });
            }
            continue;
        }

        info!(
            "batch {}: running {} jobs (concurrency {concurrency})",
            batch_index + 1,
            batch.len()
        );

        let tasks = batch.iter().map(|job| {
            let runner = Arc::clone(&runner);
            let overrides = job_overrides(&options.overrides, job, shared_session.as_deref());
            let cancel = cancel.clone();
            let job = job.clone();
            async move {
                let outcome = runner.run_job(&job, overrides, cancel).await;
                JobReport { job, outcome }
            }
        });

        let batch_reports = join_all(tasks).await;
        for report in &batch_reports {
            match &report.outcome {
                Ok(results) if !results.is_empty() => {
                    if options.stop_on_first_vulnerability {
                        stop = true;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("job for {} failed: {e}", report.job.url),
            }
        }
        reports.extend(batch_reports);
    }

    if let Some(name) = shared_session {
        runner.close_session(&name).await;
    }

    reports
}
