//! Job queue (component E, §4.1): at-least-once delivery, visibility
//! timeouts, cancellation, retries, enqueue attribution.

mod redis_queue;

pub use redis_queue::RedisStreamQueue;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// `<type>-<monotonic-ns>` job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, type = "string")]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl JobId {
    pub fn new(job_type: &str) -> Self {
        let ns = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        JobId(format!("{job_type}-{ns}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => JobStatus::Pending,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "canceled" => JobStatus::Canceled,
            _ => return None,
        })
    }
}

/// Caller-provided attribution attached to an enqueue, used for operator
/// diagnostics via `GetEnqueueMetrics`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EnqueueAttribution {
    pub actor: Option<String>,
    pub request_id: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub remote_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl EnqueueAttribution {
    /// Derives the per-minute metrics bucket key for this attribution.
    /// Falls back to "unknown" when no actor is attached (e.g. internal
    /// sweep-controller enqueues use a fixed "scheduler" actor instead).
    pub fn source(&self) -> String {
        self.actor.clone().unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub stream_id: Option<String>,
    pub attribution: Option<EnqueueAttribution>,
}

/// Per-minute enqueue counters keyed by attribution source.
#[derive(Debug, Clone, Default, Serialize, TS)]
#[ts(export)]
pub struct EnqueueMetrics {
    pub minutes_back: u32,
    pub by_source: Vec<(String, u64)>,
    pub total: u64,
}

/// A worker's periodic liveness report, written to a TTL-scoped KV key
/// `workers:<namespace>:<id>` (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WorkerHeartbeat {
    pub id: String,
    pub hostname: String,
    pub status: String,
    pub current_job_id: Option<String>,
    pub processed: u64,
    #[ts(type = "string")]
    pub started_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub last_heartbeat: DateTime<Utc>,
    pub concurrency: usize,
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),
    #[error("corrupt job record: {0}")]
    Corrupt(String),
}

/// Contract for the job queue. A mapping from queue name (`job_type`) to an
/// ordered sequence of jobs, with per-job status tracked in four membership
/// sets (pending, processing, completed, failed).
#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        attribution: Option<EnqueueAttribution>,
    ) -> Result<JobId, QueueError>;

    async fn dequeue(&self, job_type: &str, consumer: &str) -> Result<Option<Job>, QueueError>;

    async fn ack(&self, job_type: &str, job_id: &JobId) -> Result<(), QueueError>;

    /// Returns `true` if the job was re-enqueued, `false` if it was moved to failed.
    async fn nack(&self, job_type: &str, job_id: &JobId) -> Result<bool, QueueError>;

    async fn cancel_job(&self, job_type: &str, job_id: &JobId) -> Result<(), QueueError>;

    async fn is_job_canceled(&self, job_id: &JobId) -> Result<bool, QueueError>;

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>, QueueError>;

    async fn list_jobs(
        &self,
        job_type: &str,
        status: JobStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>, QueueError>;

    async fn get_backlog(&self, job_type: &str, limit: usize) -> Result<Vec<Job>, QueueError>;

    async fn get_enqueue_metrics(
        &self,
        job_type: &str,
        minutes_back: u32,
    ) -> Result<EnqueueMetrics, QueueError>;

    async fn clear_queue(&self, job_type: &str) -> Result<u64, QueueError>;

    /// Cancels every currently-pending job without touching jobs already
    /// dispatched to a worker, so in-flight work finishes normally. Unlike
    /// [`JobQueue::clear_queue`] the job records are kept (status flips to
    /// `Canceled`) rather than deleted, preserving them for `get_job`/audit.
    async fn drain(&self, job_type: &str) -> Result<u64, QueueError>;

    async fn clear_failed(&self, job_type: &str) -> Result<u64, QueueError>;

    async fn clear_processing(&self, job_type: &str) -> Result<u64, QueueError>;

    async fn retry_failed(&self, job_type: &str, limit: usize) -> Result<u64, QueueError>;

    /// Writes a worker's liveness report under `workers:<namespace>:<id>`,
    /// refreshing its TTL.
    async fn record_heartbeat(&self, namespace: &str, heartbeat: &WorkerHeartbeat) -> Result<(), QueueError>;

    /// Lists all non-expired worker heartbeats under a namespace, backing
    /// `GET /admin/workers`.
    async fn list_heartbeats(&self, namespace: &str) -> Result<Vec<WorkerHeartbeat>, QueueError>;
}

#[cfg(test)]
mod tests {
    //! Exercises the universal invariants from spec §8 against a deterministic
    //! in-memory double, since driving the real Redis Streams semantics needs
    //! a live broker (covered separately by the `tests/queue_redis.rs`
    //! integration suite, which is skipped unless `REDIS_TEST_URL` is set).
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryQueue {
        jobs: Mutex<HashMap<String, Job>>,
        pending: Mutex<Vec<String>>,
        processing: Mutex<HashSet<String>>,
        completed: Mutex<HashSet<String>>,
        failed: Mutex<HashSet<String>>,
        canceled: Mutex<HashSet<String>>,
    }

    impl MemoryQueue {
        fn enqueue(&self, job_type: &str) -> JobId {
            let id = JobId::new(job_type);
            let job = Job {
                id: id.clone(),
                job_type: job_type.to_string(),
                payload: serde_json::Value::Null,
                created_at: Utc::now(),
                attempts: 0,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                status: JobStatus::Pending,
                stream_id: None,
                attribution: None,
            };
            self.jobs.lock().unwrap().insert(id.0.clone(), job);
            self.pending.lock().unwrap().push(id.0.clone());
            id
        }

        fn dequeue(&self) -> Option<JobId> {
            let id = self.pending.lock().unwrap().pop()?;
            self.processing.lock().unwrap().insert(id.clone());
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(&id).unwrap();
            job.attempts += 1;
            job.status = JobStatus::Processing;
            Some(JobId(id))
        }

        fn nack(&self, id: &JobId) -> bool {
            self.processing.lock().unwrap().remove(&id.0);
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(&id.0).unwrap();
            if job.attempts < job.max_attempts {
                job.status = JobStatus::Pending;
                self.pending.lock().unwrap().push(id.0.clone());
                true
            } else {
                job.status = JobStatus::Failed;
                self.failed.lock().unwrap().insert(id.0.clone());
                false
            }
        }

        fn cancel(&self, id: &JobId) {
            self.pending.lock().unwrap().retain(|x| x != &id.0);
            self.processing.lock().unwrap().remove(&id.0);
            self.canceled.lock().unwrap().insert(id.0.clone());
            self.jobs.lock().unwrap().get_mut(&id.0).unwrap().status = JobStatus::Canceled;
        }

        /// Membership across the four core sets is an exact cover at rest
        /// (canceled jobs are tracked separately and excluded by design).
        fn assert_exact_cover(&self) {
            let jobs = self.jobs.lock().unwrap();
            let pending: HashSet<_> = self.pending.lock().unwrap().iter().cloned().collect();
            let processing = self.processing.lock().unwrap();
            let completed = self.completed.lock().unwrap();
            let failed = self.failed.lock().unwrap();
            let canceled = self.canceled.lock().unwrap();
            for id in jobs.keys() {
                let memberships = [
                    pending.contains(id),
                    processing.contains(id),
                    completed.contains(id),
                    failed.contains(id),
                    canceled.contains(id),
                ];
                assert_eq!(memberships.iter().filter(|x| **x).count(), 1, "job {id} in {memberships:?}");
            }
        }
    }

    #[test]
    fn retry_cap_moves_job_to_failed_never_completed() {
        let q = MemoryQueue::default();
        let id = q.enqueue("flight_search");

        for _ in 0..3 {
            q.dequeue();
            q.nack(&id);
        }

        let jobs = q.jobs.lock().unwrap();
        assert_eq!(jobs.get(&id.0).unwrap().status, JobStatus::Failed);
        assert!(q.failed.lock().unwrap().contains(&id.0));
        assert!(!q.completed.lock().unwrap().contains(&id.0));
        drop(jobs);
        q.assert_exact_cover();
    }

    #[test]
    fn cancellation_does_not_touch_failed_set() {
        let q = MemoryQueue::default();
        let id = q.enqueue("flight_search");
        q.dequeue();
        q.cancel(&id);

        assert!(!q.failed.lock().unwrap().contains(&id.0));
        assert_eq!(q.jobs.lock().unwrap().get(&id.0).unwrap().status, JobStatus::Canceled);
    }

    #[test]
    fn enqueue_attribution_source_defaults_to_unknown() {
        let attribution = EnqueueAttribution::default();
        assert_eq!(attribution.source(), "unknown");
    }

    #[test]
    fn job_id_is_type_prefixed() {
        let id = JobId::new("bulk_search");
        assert!(id.0.starts_with("bulk_search-"));
    }
}
