use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::billing::BillingReconciler;
use crate::error::{RepositoryError, RuntimeError};
use crate::extractor;
use crate::metrics;
use crate::models::{Job, JobRecord, JobStatus};
use crate::queue::JobQueue;
use crate::repository::Repository;
use crate::runtime::{ContainerRuntime, ContainerSpec};

#[cfg(test)]
#[path = "./dispatcher_tests.rs"]
mod tests;

// --- DISPATCHER LOGIC ---

/// Owns the full lifecycle of one job: admission, provisioning, log
/// streaming, result reconciliation, cleanup.
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    runtime: Arc<dyn ContainerRuntime>,
    repo: Arc<dyn Repository>,
    billing: BillingReconciler,
    container_wait_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        runtime: Arc<dyn ContainerRuntime>,
        repo: Arc<dyn Repository>,
        container_wait_timeout: Duration,
    ) -> Self {
        let billing = BillingReconciler::new(repo.clone());
        Self {
            queue,
            runtime,
            repo,
            billing,
            container_wait_timeout,
        }
    }

    pub async fn process(&self, job: &Job) {
        metrics::dec_queued();
        metrics::inc_running();
        let started = Instant::now();

        let mut record = match self.queue.get_job(&job.id).await {
            Ok(r) => r,
            Err(e) => {
                warn!("[{}] No queue record ({}); rebuilding from envelope", job.id, e);
                JobRecord::new(job)
            }
        };
        record.status = JobStatus::Running;
        record.advance(1);
        self.save(&record).await;
        info!("[{}] Status: RUNNING", job.id);

        // Admission. The user must exist and the balance must cover the call
        // before any compute resource is committed.
        let user = match self.repo.get_user_by_email(&job.data.user_email).await {
            Ok(Some(u)) => u,
            Ok(None) => {
                self.finish_failed(&mut record, format!("user {} not found", job.data.user_email))
                    .await;
                return;
            }
            Err(e) => {
                self.finish_failed(&mut record, format!("user lookup failed: {}", e))
                    .await;
                return;
            }
        };

        match self.billing.admit(&user, job.data.call_cost).await {
            Ok(true) => {}
            Ok(false) => {
                // Distinct terminal state: the caller must be able to tell a
                // billing rejection from a generic failure, and it is never
                // retried.
                record.status = JobStatus::Aborted;
                record.error = Some(format!(
                    "insufficient token balance: {} cannot cover cost {}",
                    user.email, job.data.call_cost
                ));
                record.finished_at = Some(Utc::now());
                self.save(&record).await;
                metrics::dec_running();
                metrics::inc_aborted();
                warn!("[{}] Aborted: insufficient token balance for {}", job.id, user.email);
                return;
            }
            Err(e) => {
                self.finish_failed(&mut record, format!("admission check failed: {}", e))
                    .await;
                return;
            }
        }
        record.advance(20);
        self.save(&record).await;

        // Provisioning.
        let spec = ContainerSpec::for_job(job);
        if let Err(e) = self.runtime.create(&spec).await {
            self.finish_failed(&mut record, format!("container create failed: {}", e))
                .await;
            return;
        }
        if let Err(e) = self.runtime.start(&spec.name).await {
            self.remove_container(&spec.name, &job.id).await;
            self.finish_failed(&mut record, format!("container start failed: {}", e))
                .await;
            return;
        }
        record.advance(40);
        self.save(&record).await;
        info!("[{}] Container {} started", job.id, spec.name);

        // Attach to the combined output stream. Extraction and reconciliation
        // run while the container runs; they are not serialized against exit.
        let scan = tokio::spawn(scan_output(
            self.runtime.follow_logs(&spec.name),
            self.billing.clone(),
            job.clone(),
        ));
        record.advance(60);
        self.save(&record).await;

        // Bounded wait on the process boundary. An unbounded wait would wedge
        // the whole queue at concurrency 1.
        let mut timed_out = false;
        tokio::select! {
            res = self.runtime.wait(&spec.name) => {
                match res {
                    Ok(code) => {
                        record.exit_code = Some(code);
                        info!("[{}] Container exited with {}", job.id, code);
                    }
                    Err(e) => warn!("[{}] Container wait failed: {}", job.id, e),
                }
            }
            _ = tokio::time::sleep(self.container_wait_timeout) => {
                timed_out = true;
                warn!(
                    "[{}] Container did not exit within {}s; forcing removal",
                    job.id,
                    self.container_wait_timeout.as_secs()
                );
            }
        }

        // Cleanup happens exactly once per provisioned job, whatever the
        // stream produced. A missing result must never leak a container.
        self.remove_container(&spec.name, &job.id).await;
        record.advance(80);

        let outcome = match scan.await {
            Ok(o) => o,
            Err(e) => {
                error!("[{}] Output scanner task failed: {}", job.id, e);
                ScanOutcome::default()
            }
        };
        if let Some(err) = outcome.billing_error {
            // Reconciliation failures are reported, never allowed to block
            // cleanup or finalization.
            error!("[{}] Reconciliation failed: {}", job.id, err);
            record.billing_error = Some(err);
        }
        if outcome.results == 0 && !timed_out {
            warn!("[{}] Container produced no result payload", job.id);
        }

        if timed_out {
            record.status = JobStatus::TimedOut;
            record.error = Some(format!(
                "container execution exceeded {}s",
                self.container_wait_timeout.as_secs()
            ));
            metrics::inc_failed();
        } else {
            record.status = JobStatus::Completed;
            metrics::inc_completed();
        }
        record.finished_at = Some(Utc::now());
        record.advance(100);
        self.save(&record).await;
        metrics::dec_running();

        info!(
            "[{}] Status: {} ({} result(s), {:.2}s)",
            job.id,
            record.status,
            outcome.results,
            started.elapsed().as_secs_f64()
        );
    }

    async fn finish_failed(&self, record: &mut JobRecord, msg: String) {
        error!("[{}] {}", record.id, msg);
        record.status = JobStatus::Failed;
        record.error = Some(msg);
        record.finished_at = Some(Utc::now());
        self.save(record).await;
        metrics::dec_running();
        metrics::inc_failed();
    }

    async fn save(&self, record: &JobRecord) {
        if let Err(e) = self.queue.save(record).await {
            error!("[{}] Failed to persist job record: {}", record.id, e);
        }
    }

    async fn remove_container(&self, name: &str, job_id: &str) {
        if let Err(e) = self.runtime.remove(name).await {
            warn!("[{}] Container removal reported: {}", job_id, e);
        }
    }
}

#[derive(Default)]
struct ScanOutcome {
    results: usize,
    billing_error: Option<String>,
}

/// Consume the container's combined output, line by line, feeding each line
/// to the extractor. Every hit spawns an asynchronous persist-then-bill
/// reconciliation; the handles are joined before the outcome is reported so a
/// reconciliation may finish after the container itself is long gone.
async fn scan_output(
    mut stream: BoxStream<'static, Result<Vec<u8>, RuntimeError>>,
    billing: BillingReconciler,
    job: Job,
) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();
    let mut pending: Vec<tokio::task::JoinHandle<Result<(), RepositoryError>>> = Vec::new();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!("[{}] Log stream error: {}", job.id, e);
                break;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            scan_line(line.trim_end(), &billing, &job, &mut pending, &mut outcome);
        }
    }
    let rest = std::mem::take(&mut buffer);
    if !rest.trim().is_empty() {
        scan_line(rest.trim_end(), &billing, &job, &mut pending, &mut outcome);
    }

    for handle in pending {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => outcome.billing_error = Some(e.to_string()),
            Err(e) => outcome.billing_error = Some(format!("reconciliation task failed: {}", e)),
        }
    }
    outcome
}

fn scan_line(
    line: &str,
    billing: &BillingReconciler,
    job: &Job,
    pending: &mut Vec<tokio::task::JoinHandle<Result<(), RepositoryError>>>,
    outcome: &mut ScanOutcome,
) {
    let Some(ret) = extractor::extract_result(line) else {
        return;
    };
    if ret.result_request_id != job.data.result_request_id {
        warn!(
            "[{}] Dropping result payload addressed to foreign request {}",
            job.id, ret.result_request_id
        );
        return;
    }

    outcome.results += 1;
    info!("[{}] Result payload extracted; reconciling", job.id);
    let billing = billing.clone();
    pending.push(tokio::spawn(async move { billing.reconcile(&ret).await }));
}
