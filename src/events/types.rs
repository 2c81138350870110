//! Domain event payloads broadcast on the admin SSE stream (`GET /admin/events`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use ts_rs::TS;

use crate::queue::JobId;
use crate::sweep::SweepStateKind;

/// Top-level envelope stored in the ring buffer and serialized to clients.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export)]
pub enum DomainEvent {
    Job(JobEvent),
    Sweep(SweepEvent),
    Deal(DealEvent),
    Worker(WorkerEvent),
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "event", rename_all = "snake_case")]
#[ts(export)]
pub enum JobEvent {
    Enqueued { job_id: JobId, job_type: String },
    Started { job_id: JobId, job_type: String, worker_id: String },
    Completed { job_id: JobId, job_type: String },
    Retried { job_id: JobId, job_type: String, attempts: u32 },
    Failed { job_id: JobId, job_type: String },
    Canceled { job_id: JobId, job_type: String },
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "event", rename_all = "snake_case")]
#[ts(export)]
pub enum SweepEvent {
    StateChanged { from: SweepStateKind, to: SweepStateKind },
    TupleEmitted { origin: String, destination: String, window_idx: i64, trip_length: i64 },
    LeaderAcquired,
    LeaderLost,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "event", rename_all = "snake_case")]
#[ts(export)]
pub enum DealEvent {
    Detected {
        origin: String,
        destination: String,
        departure_date: String,
        classification: String,
        score: f64,
    },
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "event", rename_all = "snake_case")]
#[ts(export)]
pub enum WorkerEvent {
    Heartbeat {
        worker_id: String,
        processed: u64,
        #[ts(type = "string")]
        at: DateTime<Utc>,
    },
}
