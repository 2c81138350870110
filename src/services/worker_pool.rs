//! Cooperative worker pool draining the job queue (§5 concurrency model, §7
//! error handling).
//!
//! Each worker runs a blocking dequeue loop across the known job types and
//! dispatches on its own task, per §5's "handlers run on their dequeuing
//! worker". Grounded on the dequeue/process/ack loop in
//! `scraper/worker.rs`, generalized from a single-table Postgres poll to the
//! multi-type Redis Streams queue and from a fixed worker to a pool sized by
//! `WORKER_CONCURRENCY`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ingestion::Handlers;
use crate::queue::{Job, JobId, JobQueue, WorkerHeartbeat};
use crate::services::Service;
use crate::status::{ServiceStatus, ServiceStatusRegistry};

const JOB_TYPES: &[&str] = &[
    "flight_search",
    "bulk_search",
    "price_graph_sweep",
    "continuous_price_graph",
];

const IDLE_POLL: Duration = Duration::from_millis(50);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const HEARTBEAT_NAMESPACE: &str = "farecrawl";

pub struct WorkerPoolService {
    queue: Arc<dyn JobQueue>,
    handlers: Arc<Handlers>,
    concurrency: usize,
    retry_delay: Duration,
    job_timeout: Duration,
    shutdown_timeout: Duration,
    service_statuses: ServiceStatusRegistry,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPoolService {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handlers: Arc<Handlers>,
        concurrency: usize,
        retry_delay: Duration,
        job_timeout: Duration,
        shutdown_timeout: Duration,
        service_statuses: ServiceStatusRegistry,
    ) -> Self {
        Self {
            queue,
            handlers,
            concurrency: concurrency.max(1),
            retry_delay,
            job_timeout,
            shutdown_timeout,
            service_statuses,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    async fn worker_loop(
        id: usize,
        queue: Arc<dyn JobQueue>,
        handlers: Arc<Handlers>,
        job_timeout: Duration,
        retry_delay: Duration,
        cancel: CancellationToken,
    ) {
        let consumer = format!("worker-{id}");
        let started_at = Utc::now();
        let mut processed: u64 = 0;
        let mut last_heartbeat = tokio::time::Instant::now() - HEARTBEAT_INTERVAL;
        info!(worker_id = id, "worker started");

        while !cancel.is_cancelled() {
            let mut found_any = false;

            for &job_type in JOB_TYPES {
                if cancel.is_cancelled() {
                    break;
                }
                match queue.dequeue(job_type, &consumer).await {
                    Ok(Some(job)) => {
                        found_any = true;
                        let job_id = job.id.clone();
                        Self::heartbeat(&queue, &consumer, started_at, processed, Some(job_id.to_string()), &mut last_heartbeat).await;
                        Self::process_job(&queue, &handlers, job_type, job, job_timeout, retry_delay, id).await;
                        processed += 1;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(worker_id = id, job_type, error = %e, "dequeue failed");
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }

            Self::heartbeat(&queue, &consumer, started_at, processed, None, &mut last_heartbeat).await;

            if !found_any {
                tokio::time::sleep(IDLE_POLL).await;
            }
        }

        info!(worker_id = id, "worker stopped");
    }

    /// Writes a liveness report at most once per [`HEARTBEAT_INTERVAL`],
    /// cheap to call from the hot loop.
    async fn heartbeat(
        queue: &Arc<dyn JobQueue>,
        consumer: &str,
        started_at: chrono::DateTime<Utc>,
        processed: u64,
        current_job_id: Option<String>,
        last_heartbeat: &mut tokio::time::Instant,
    ) {
        if last_heartbeat.elapsed() < HEARTBEAT_INTERVAL {
            return;
        }
        *last_heartbeat = tokio::time::Instant::now();
        let report = WorkerHeartbeat {
            id: consumer.to_string(),
            hostname: hostname(),
            status: "active".to_string(),
            current_job_id,
            processed,
            started_at,
            last_heartbeat: Utc::now(),
            concurrency: 1,
        };
        if let Err(e) = queue.record_heartbeat(HEARTBEAT_NAMESPACE, &report).await {
            warn!(worker_id = consumer, error = %e, "failed to record heartbeat");
        }
    }

    /// Dispatches one dequeued job, enforcing the worker job timeout and
    /// recovering handler panics into a Nack rather than crashing the worker
    /// loop (§7 "Handlers never panic the worker").
    async fn process_job(
        queue: &Arc<dyn JobQueue>,
        handlers: &Arc<Handlers>,
        job_type: &str,
        job: Job,
        job_timeout: Duration,
        retry_delay: Duration,
        worker_id: usize,
    ) {
        let job_id = job.id.clone();

        if matches!(queue.is_job_canceled(&job_id).await, Ok(true)) {
            debug!(worker_id, job_id = %job_id, "job canceled before dispatch, skipping");
            return;
        }

        let handlers = handlers.clone();
        let job_type_owned = job_type.to_string();
        let payload = job.payload.clone();
        let dispatch_id = job_id.clone();
        let dispatch = AssertUnwindSafe(async move { handlers.dispatch(&job_type_owned, &dispatch_id, &payload).await })
            .catch_unwind();

        match tokio::time::timeout(job_timeout, dispatch).await {
            Ok(Ok(Ok(()))) => {
                if let Err(e) = queue.ack(job_type, &job_id).await {
                    error!(worker_id, job_id = %job_id, error = %e, "ack failed");
                }
            }
            Ok(Ok(Err(e))) => {
                warn!(worker_id, job_id = %job_id, error = %e, "job handler failed");
                Self::nack_with_backoff(queue, job_type, &job_id, retry_delay, worker_id).await;
            }
            Ok(Err(_panic)) => {
                error!(worker_id, job_id = %job_id, "job handler panicked");
                Self::nack_with_backoff(queue, job_type, &job_id, retry_delay, worker_id).await;
            }
            Err(_elapsed) => {
                warn!(worker_id, job_id = %job_id, timeout = ?job_timeout, "job handler timed out");
                Self::nack_with_backoff(queue, job_type, &job_id, retry_delay, worker_id).await;
            }
        }
    }

    async fn nack_with_backoff(queue: &Arc<dyn JobQueue>, job_type: &str, job_id: &JobId, retry_delay: Duration, worker_id: usize) {
        if matches!(queue.is_job_canceled(job_id).await, Ok(true)) {
            return;
        }
        match queue.nack(job_type, job_id).await {
            Ok(true) => tokio::time::sleep(retry_delay).await,
            Ok(false) => warn!(worker_id, job_id = %job_id, "job exhausted retries, moved to failed"),
            Err(e) => error!(worker_id, job_id = %job_id, error = %e, "nack failed"),
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[async_trait::async_trait]
impl Service for WorkerPoolService {
    fn name(&self) -> &'static str {
        "worker_pool"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.service_statuses.set("worker_pool", ServiceStatus::Active);
        info!(concurrency = self.concurrency, "worker pool starting");

        for id in 0..self.concurrency {
            let queue = self.queue.clone();
            let handlers = self.handlers.clone();
            let cancel = self.cancel.clone();
            let job_timeout = self.job_timeout;
            let retry_delay = self.retry_delay;
            self.handles.push(tokio::spawn(Self::worker_loop(id, queue, handlers, job_timeout, retry_delay, cancel)));
        }

        // Blocks until `shutdown` cancels the token; the actual worker tasks
        // run detached so a dropped `run` future (e.g. on ServiceManager
        // teardown) never orphans them.
        self.cancel.cancelled().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.cancel.cancel();
        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            if tokio::time::timeout(self.shutdown_timeout, handle).await.is_err() {
                warn!("worker task did not finish within shutdown timeout, abandoning");
            }
        }
        Ok(())
    }
}
