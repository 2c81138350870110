//! Redis Streams-backed implementation of [`JobQueue`].
//!
//! Key layout (§6 "Persisted state layout"):
//! - `queue_stream:<type>` — the stream itself, one consumer group `workers`.
//! - `queue:<type>:{pending,processing,completed,failed,canceled}` — membership sets.
//! - `job:<id>:cancel` — cancellation flag, 24h TTL.
//! - `job:<id>` — job record hash, 24h TTL.
//! - `queue:<type>:enqueues:<YYYYMMDDHHMM>` — per-minute attribution counters, 48h TTL.
//! - `queue:<type>:reclaim_cursor` — XAUTOCLAIM resume cursor, bounds reclaim scan cost.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult, Value};
use std::time::Duration;

use super::{EnqueueAttribution, EnqueueMetrics, Job, JobId, JobQueue, JobStatus, QueueError, WorkerHeartbeat};

const GROUP: &str = "workers";
const JOB_TTL_SECS: i64 = 24 * 3600;
const ENQUEUE_METRIC_TTL_SECS: i64 = 48 * 3600;
const HEARTBEAT_TTL_SECS: i64 = 90;

pub struct RedisStreamQueue {
    conn: ConnectionManager,
    visibility_timeout: Duration,
    block_timeout: Duration,
}

impl RedisStreamQueue {
    pub fn new(conn: ConnectionManager, visibility_timeout: Duration, block_timeout: Duration) -> Self {
        Self {
            conn,
            visibility_timeout,
            block_timeout,
        }
    }

    fn stream_key(job_type: &str) -> String {
        format!("queue_stream:{job_type}")
    }

    fn set_key(job_type: &str, status: JobStatus) -> String {
        format!("queue:{job_type}:{}", status.as_str())
    }

    fn job_key(id: &JobId) -> String {
        format!("job:{id}")
    }

    fn cancel_key(id: &JobId) -> String {
        format!("job:{id}:cancel")
    }

    fn reclaim_cursor_key(job_type: &str) -> String {
        format!("queue:{job_type}:reclaim_cursor")
    }

    fn enqueue_metric_key(job_type: &str, at: DateTime<Utc>) -> String {
        format!("queue:{job_type}:enqueues:{}", at.format("%Y%m%d%H%M"))
    }

    fn heartbeat_key(namespace: &str, id: &str) -> String {
        format!("workers:{namespace}:{id}")
    }

    /// Ensures the stream and its consumer group exist. Idempotent: the
    /// `BUSYGROUP` error from an existing group is swallowed.
    async fn ensure_group(&self, job_type: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::stream_key(job_type);
        let result: RedisResult<Value> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&key)
            .arg(GROUP)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_job_record(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::job_key(&job.id);
        let attribution = job
            .attribution
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| QueueError::Corrupt(e.to_string()))?
            .unwrap_or_default();
        let payload = serde_json::to_string(&job.payload).map_err(|e| QueueError::Corrupt(e.to_string()))?;
        let () = conn
            .hset_multiple(
                &key,
                &[
                    ("job_type", job.job_type.clone()),
                    ("payload", payload),
                    ("created_at", job.created_at.to_rfc3339()),
                    ("attempts", job.attempts.to_string()),
                    ("max_attempts", job.max_attempts.to_string()),
                    ("status", job.status.as_str().to_string()),
                    ("stream_id", job.stream_id.clone().unwrap_or_default()),
                    ("attribution", attribution),
                ],
            )
            .await?;
        let _: i64 = conn.expire(&key, JOB_TTL_SECS).await?;
        Ok(())
    }

    async fn read_job_record(&self, id: &JobId) -> Result<Option<Job>, QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::job_key(id);
        let fields: Vec<(String, String)> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let get = |name: &str| fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());

        let job_type = get("job_type").ok_or_else(|| QueueError::Corrupt("missing job_type".into()))?;
        let payload_raw = get("payload").unwrap_or_default();
        let payload = serde_json::from_str(&payload_raw).unwrap_or(serde_json::Value::Null);
        let created_at = get("created_at")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let attempts = get("attempts").and_then(|s| s.parse().ok()).unwrap_or(0);
        let max_attempts = get("max_attempts").and_then(|s| s.parse().ok()).unwrap_or(super::DEFAULT_MAX_ATTEMPTS);
        let status = get("status").and_then(|s| JobStatus::parse(&s)).unwrap_or(JobStatus::Pending);
        let stream_id = get("stream_id").filter(|s| !s.is_empty());
        let attribution = get("attribution")
            .filter(|s| !s.is_empty())
            .and_then(|s| serde_json::from_str::<EnqueueAttribution>(&s).ok());

        Ok(Some(Job {
            id: id.clone(),
            job_type,
            payload,
            created_at,
            attempts,
            max_attempts,
            status,
            stream_id,
            attribution,
        }))
    }

    async fn set_status(&self, id: &JobId, status: JobStatus, attempts: Option<u32>) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::job_key(id);
        let mut pairs: Vec<(&str, String)> = vec![("status", status.as_str().to_string())];
        if let Some(a) = attempts {
            pairs.push(("attempts", a.to_string()));
        }
        let () = conn.hset_multiple(&key, &pairs).await?;
        Ok(())
    }

    async fn move_membership(&self, job_type: &str, id: &JobId, from: JobStatus, to: JobStatus) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let from_key = Self::set_key(job_type, from);
        let to_key = Self::set_key(job_type, to);
        let _: i64 = conn.srem(&from_key, id.0.as_str()).await?;
        let _: i64 = conn.sadd(&to_key, id.0.as_str()).await?;
        Ok(())
    }

    /// Attempts to reclaim one pending-delivery idle at least `visibility_timeout`,
    /// resuming from the per-stream cursor. Returns `None` when nothing is claimable.
    async fn try_reclaim(&self, job_type: &str, consumer: &str) -> Result<Option<(String, String)>, QueueError> {
        let mut conn = self.conn.clone();
        let stream = Self::stream_key(job_type);
        let cursor_key = Self::reclaim_cursor_key(job_type);
        let cursor: String = conn.get(&cursor_key).await.unwrap_or_else(|_| "0-0".to_string());
        let cursor = if cursor.is_empty() { "0-0".to_string() } else { cursor };

        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(&stream)
            .arg(GROUP)
            .arg(consumer)
            .arg(self.visibility_timeout.as_millis() as i64)
            .arg(&cursor)
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        let (next_cursor, entries) = parse_autoclaim_reply(reply)?;
        let _: () = conn.set(&cursor_key, &next_cursor).await?;

        Ok(entries.into_iter().next())
    }

    async fn read_new(&self, job_type: &str, consumer: &str) -> Result<Option<(String, String)>, QueueError> {
        let mut conn = self.conn.clone();
        let stream = Self::stream_key(job_type);
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(GROUP)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.block_timeout.as_millis() as i64)
            .arg("STREAMS")
            .arg(&stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;
        Ok(parse_xreadgroup_reply(reply).into_iter().next())
    }
}

/// Extracts `(stream_id, job_id)` pairs from an XAUTOCLAIM reply
/// (`[next-cursor, [[id, [field, value, ...]], ...], deleted-ids]`).
fn parse_autoclaim_reply(reply: Value) -> Result<(String, Vec<(String, String)>), QueueError> {
    let Value::Array(top) = reply else {
        return Ok(("0-0".to_string(), vec![]));
    };
    let mut iter = top.into_iter();
    let cursor = match iter.next() {
        Some(Value::BulkString(b)) => String::from_utf8_lossy(&b).to_string(),
        Some(Value::SimpleString(s)) => s,
        _ => "0-0".to_string(),
    };
    let entries = match iter.next() {
        Some(Value::Array(entries)) => entries
            .into_iter()
            .filter_map(parse_stream_entry)
            .collect(),
        _ => vec![],
    };
    Ok((cursor, entries))
}

fn parse_xreadgroup_reply(reply: Value) -> Vec<(String, String)> {
    let Value::Array(streams) = reply else {
        return vec![];
    };
    let mut out = vec![];
    for stream in streams {
        if let Value::Array(pair) = stream {
            if let Some(Value::Array(entries)) = pair.into_iter().nth(1) {
                out.extend(entries.into_iter().filter_map(parse_stream_entry));
            }
        }
    }
    out
}

/// Parses one `[id, [field, value, ...]]` stream entry, extracting the
/// `job_id` field we stored at XADD time.
fn parse_stream_entry(entry: Value) -> Option<(String, String)> {
    let Value::Array(parts) = entry else {
        return None;
    };
    let mut it = parts.into_iter();
    let stream_id = match it.next()? {
        Value::BulkString(b) => String::from_utf8_lossy(&b).to_string(),
        Value::SimpleString(s) => s,
        _ => return None,
    };
    let Value::Array(fields) = it.next()? else {
        return None;
    };
    let mut job_id = None;
    let mut chunks = fields.into_iter();
    while let (Some(k), Some(v)) = (chunks.next(), chunks.next()) {
        let key = match k {
            Value::BulkString(b) => String::from_utf8_lossy(&b).to_string(),
            Value::SimpleString(s) => s,
            _ => continue,
        };
        if key == "job_id" {
            job_id = match v {
                Value::BulkString(b) => Some(String::from_utf8_lossy(&b).to_string()),
                Value::SimpleString(s) => Some(s),
                _ => None,
            };
        }
    }
    job_id.map(|jid| (stream_id, jid))
}

#[async_trait::async_trait]
impl JobQueue for RedisStreamQueue {
    async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        attribution: Option<EnqueueAttribution>,
    ) -> Result<JobId, QueueError> {
        self.ensure_group(job_type).await?;

        let id = JobId::new(job_type);
        let now = Utc::now();

        let mut conn = self.conn.clone();
        let stream = Self::stream_key(job_type);
        let stream_id: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg("job_id")
            .arg(&id.0)
            .query_async(&mut conn)
            .await?;

        let job = Job {
            id: id.clone(),
            job_type: job_type.to_string(),
            payload,
            created_at: now,
            attempts: 0,
            max_attempts: super::DEFAULT_MAX_ATTEMPTS,
            status: JobStatus::Pending,
            stream_id: Some(stream_id),
            attribution: attribution.clone(),
        };
        self.write_job_record(&job).await?;

        let pending_key = Self::set_key(job_type, JobStatus::Pending);
        let _: i64 = conn.sadd(&pending_key, id.0.as_str()).await?;

        let source = attribution.unwrap_or_default().source();
        let metric_key = Self::enqueue_metric_key(job_type, now);
        let _: i64 = conn.hincr(&metric_key, &source, 1i64).await?;
        let _: i64 = conn.expire(&metric_key, ENQUEUE_METRIC_TTL_SECS).await?;

        Ok(id)
    }

    async fn dequeue(&self, job_type: &str, consumer: &str) -> Result<Option<Job>, QueueError> {
        self.ensure_group(job_type).await?;

        let claimed = self.try_reclaim(job_type, consumer).await?;
        let (stream_id, job_id) = match claimed {
            Some(pair) => pair,
            None => match self.read_new(job_type, consumer).await? {
                Some(pair) => pair,
                None => return Ok(None),
            },
        };

        let id = JobId(job_id);
        let mut job = match self.read_job_record(&id).await? {
            Some(j) => j,
            None => return Ok(None),
        };

        job.attempts += 1;
        job.status = JobStatus::Processing;
        job.stream_id = Some(stream_id);
        self.set_status(&id, JobStatus::Processing, Some(job.attempts)).await?;
        self.move_membership(job_type, &id, JobStatus::Pending, JobStatus::Processing).await?;

        Ok(Some(job))
    }

    async fn ack(&self, job_type: &str, job_id: &JobId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let stream = Self::stream_key(job_type);
        if let Some(job) = self.read_job_record(job_id).await? {
            if let Some(stream_id) = &job.stream_id {
                let _: i64 = conn.xack(&stream, GROUP, &[stream_id.as_str()]).await?;
                let _: i64 = conn.xdel(&stream, &[stream_id.as_str()]).await?;
            }
        }
        self.set_status(job_id, JobStatus::Completed, None).await?;
        self.move_membership(job_type, job_id, JobStatus::Processing, JobStatus::Completed).await?;
        Ok(())
    }

    async fn nack(&self, job_type: &str, job_id: &JobId) -> Result<bool, QueueError> {
        let job = self
            .read_job_record(job_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(job_id.clone()))?;

        let mut conn = self.conn.clone();
        let stream = Self::stream_key(job_type);
        if let Some(stream_id) = &job.stream_id {
            let _: i64 = conn.xack(&stream, GROUP, &[stream_id.as_str()]).await?;
            let _: i64 = conn.xdel(&stream, &[stream_id.as_str()]).await?;
        }

        if job.attempts < job.max_attempts {
            let new_stream_id: String = redis::cmd("XADD")
                .arg(&stream)
                .arg("*")
                .arg("job_id")
                .arg(&job_id.0)
                .query_async(&mut conn)
                .await?;
            let mut requeued = job;
            requeued.stream_id = Some(new_stream_id);
            requeued.status = JobStatus::Pending;
            self.write_job_record(&requeued).await?;
            self.move_membership(job_type, job_id, JobStatus::Processing, JobStatus::Pending).await?;
            Ok(true)
        } else {
            self.set_status(job_id, JobStatus::Failed, None).await?;
            self.move_membership(job_type, job_id, JobStatus::Processing, JobStatus::Failed).await?;
            Ok(false)
        }
    }

    async fn cancel_job(&self, job_type: &str, job_id: &JobId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let cancel_key = Self::cancel_key(job_id);
        let _: () = conn.set_ex(&cancel_key, "1", JOB_TTL_SECS as u64).await?;

        match self.read_job_record(job_id).await? {
            Some(job) if job.status == JobStatus::Processing => {
                if let Some(stream_id) = &job.stream_id {
                    let stream = Self::stream_key(job_type);
                    let _: i64 = conn.xack(&stream, GROUP, &[stream_id.as_str()]).await?;
                    let _: i64 = conn.xdel(&stream, &[stream_id.as_str()]).await?;
                }
                self.move_membership(job_type, job_id, JobStatus::Processing, JobStatus::Canceled).await?;
            }
            Some(job) => {
                self.move_membership(job_type, job_id, job.status, JobStatus::Canceled).await?;
            }
            None => {
                let canceled_key = Self::set_key(job_type, JobStatus::Canceled);
                let _: i64 = conn.sadd(&canceled_key, job_id.0.as_str()).await?;
            }
        }
        self.set_status(job_id, JobStatus::Canceled, None).await?;
        Ok(())
    }

    async fn is_job_canceled(&self, job_id: &JobId) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::cancel_key(job_id);
        let exists: bool = conn.exists(&key).await?;
        Ok(exists)
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>, QueueError> {
        self.read_job_record(job_id).await
    }

    async fn list_jobs(
        &self,
        job_type: &str,
        status: JobStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>, QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::set_key(job_type, status);
        let mut ids: Vec<String> = conn.smembers(&key).await?;
        ids.sort();
        let mut out = Vec::new();
        for id in ids.into_iter().skip(offset).take(limit) {
            if let Some(job) = self.read_job_record(&JobId(id)).await? {
                out.push(job);
            }
        }
        Ok(out)
    }

    async fn get_backlog(&self, job_type: &str, limit: usize) -> Result<Vec<Job>, QueueError> {
        self.list_jobs(job_type, JobStatus::Pending, limit, 0).await
    }

    async fn get_enqueue_metrics(&self, job_type: &str, minutes_back: u32) -> Result<EnqueueMetrics, QueueError> {
        let mut conn = self.conn.clone();
        let mut totals: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
        let now = Utc::now();
        for m in 0..minutes_back {
            let at = now - chrono::Duration::minutes(m as i64);
            let key = Self::enqueue_metric_key(job_type, at);
            let fields: Vec<(String, u64)> = conn.hgetall(&key).await.unwrap_or_default();
            for (source, count) in fields {
                *totals.entry(source).or_insert(0) += count;
            }
        }
        let total = totals.values().sum();
        let mut by_source: Vec<(String, u64)> = totals.into_iter().collect();
        by_source.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(EnqueueMetrics {
            minutes_back,
            by_source,
            total,
        })
    }

    async fn clear_queue(&self, job_type: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::set_key(job_type, JobStatus::Pending);
        let ids: Vec<String> = conn.smembers(&key).await?;
        for id in &ids {
            let _: i64 = conn.del(Self::job_key(&JobId(id.clone()))).await?;
        }
        let _: i64 = conn.del(&key).await?;
        Ok(ids.len() as u64)
    }

    async fn drain(&self, job_type: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::set_key(job_type, JobStatus::Pending);
        let ids: Vec<String> = conn.smembers(&key).await?;
        for id in &ids {
            let job_id = JobId(id.clone());
            self.set_status(&job_id, JobStatus::Canceled, None).await?;
            self.move_membership(job_type, &job_id, JobStatus::Pending, JobStatus::Canceled).await?;
        }
        Ok(ids.len() as u64)
    }

    async fn clear_failed(&self, job_type: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::set_key(job_type, JobStatus::Failed);
        let ids: Vec<String> = conn.smembers(&key).await?;
        for id in &ids {
            let _: i64 = conn.del(Self::job_key(&JobId(id.clone()))).await?;
        }
        let _: i64 = conn.del(&key).await?;
        Ok(ids.len() as u64)
    }

    async fn clear_processing(&self, job_type: &str) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::set_key(job_type, JobStatus::Processing);
        let ids: Vec<String> = conn.smembers(&key).await?;
        let stream = Self::stream_key(job_type);
        for id in &ids {
            if let Some(job) = self.read_job_record(&JobId(id.clone())).await? {
                if let Some(stream_id) = &job.stream_id {
                    let _: i64 = conn.xack(&stream, GROUP, &[stream_id.as_str()]).await?;
                    let _: i64 = conn.xdel(&stream, &[stream_id.as_str()]).await?;
                }
            }
            let _: i64 = conn.del(Self::job_key(&JobId(id.clone()))).await?;
        }
        let _: i64 = conn.del(&key).await?;
        Ok(ids.len() as u64)
    }

    async fn retry_failed(&self, job_type: &str, limit: usize) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::set_key(job_type, JobStatus::Failed);
        let ids: Vec<String> = conn.smembers(&key).await?;
        let stream = Self::stream_key(job_type);
        let mut requeued = 0u64;
        for id in ids.into_iter().take(limit) {
            let job_id = JobId(id);
            let Some(mut job) = self.read_job_record(&job_id).await? else {
                continue;
            };
            job.attempts = 0;
            job.status = JobStatus::Pending;
            let new_stream_id: String = redis::cmd("XADD")
                .arg(&stream)
                .arg("*")
                .arg("job_id")
                .arg(&job_id.0)
                .query_async(&mut conn)
                .await?;
            job.stream_id = Some(new_stream_id);
            self.write_job_record(&job).await?;
            self.move_membership(job_type, &job_id, JobStatus::Failed, JobStatus::Pending).await?;
            requeued += 1;
        }
        Ok(requeued)
    }

    async fn record_heartbeat(&self, namespace: &str, heartbeat: &WorkerHeartbeat) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let key = Self::heartbeat_key(namespace, &heartbeat.id);
        let () = conn
            .hset_multiple(
                &key,
                &[
                    ("hostname", heartbeat.hostname.clone()),
                    ("status", heartbeat.status.clone()),
                    ("current_job_id", heartbeat.current_job_id.clone().unwrap_or_default()),
                    ("processed", heartbeat.processed.to_string()),
                    ("started_at", heartbeat.started_at.to_rfc3339()),
                    ("last_heartbeat", heartbeat.last_heartbeat.to_rfc3339()),
                    ("concurrency", heartbeat.concurrency.to_string()),
                ],
            )
            .await?;
        let _: i64 = conn.expire(&key, HEARTBEAT_TTL_SECS).await?;
        Ok(())
    }

    async fn list_heartbeats(&self, namespace: &str) -> Result<Vec<WorkerHeartbeat>, QueueError> {
        let mut conn = self.conn.clone();
        let pattern = format!("workers:{namespace}:*");
        let keys: Vec<String> = conn.scan_match(&pattern).await?.collect().await;

        let mut heartbeats = Vec::with_capacity(keys.len());
        for key in keys {
            let fields: std::collections::HashMap<String, String> = conn.hgetall(&key).await?;
            if fields.is_empty() {
                continue;
            }
            let id = key
                .rsplit(':')
                .next()
                .map(str::to_string)
                .unwrap_or_default();
            let started_at = fields
                .get("started_at")
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            let last_heartbeat = fields
                .get("last_heartbeat")
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            heartbeats.push(WorkerHeartbeat {
                id,
                hostname: fields.get("hostname").cloned().unwrap_or_default(),
                status: fields.get("status").cloned().unwrap_or_default(),
                current_job_id: fields.get("current_job_id").filter(|s| !s.is_empty()).cloned(),
                processed: fields.get("processed").and_then(|s| s.parse().ok()).unwrap_or(0),
                started_at,
                last_heartbeat,
                concurrency: fields.get("concurrency").and_then(|s| s.parse().ok()).unwrap_or(0),
            });
        }
        Ok(heartbeats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// These tests need a live Redis reachable at `REDIS_TEST_URL`; they skip
    /// themselves (rather than fail the suite) when the variable is unset, so
    /// `cargo test` stays usable without a Redis instance on hand.
    async fn test_queue() -> Option<RedisStreamQueue> {
        let url = std::env::var("REDIS_TEST_URL").ok()?;
        let client = redis::Client::open(url).expect("invalid REDIS_TEST_URL");
        let conn = ConnectionManager::new(client).await.expect("failed to connect to REDIS_TEST_URL");
        Some(RedisStreamQueue::new(conn, Duration::from_millis(200), Duration::from_millis(50)))
    }

    #[tokio::test]
    async fn enqueue_dequeue_ack_round_trip() {
        let Some(queue) = test_queue().await else {
            eprintln!("skipping: REDIS_TEST_URL not set");
            return;
        };
        let job_type = format!("test-{}", unique_suffix());

        let id = queue
            .enqueue(&job_type, serde_json::json!({"origin": "JFK"}), None)
            .await
            .unwrap();

        let job = queue.dequeue(&job_type, "consumer-1").await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.status, JobStatus::Processing);

        queue.ack(&job_type, &id).await.unwrap();
        let stored = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn nack_requeues_until_max_attempts_then_fails() {
        let Some(queue) = test_queue().await else {
            eprintln!("skipping: REDIS_TEST_URL not set");
            return;
        };
        let job_type = format!("test-{}", unique_suffix());

        let id = queue.enqueue(&job_type, serde_json::json!({}), None).await.unwrap();

        queue.dequeue(&job_type, "consumer-1").await.unwrap().unwrap();
        let requeued = queue.nack(&job_type, &id).await.unwrap();
        assert!(requeued, "first failure should be retried (max_attempts defaults above 1)");

        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn cancel_job_marks_pending_job_canceled_and_removes_it_from_backlog() {
        let Some(queue) = test_queue().await else {
            eprintln!("skipping: REDIS_TEST_URL not set");
            return;
        };
        let job_type = format!("test-{}", unique_suffix());

        let id = queue.enqueue(&job_type, serde_json::json!({}), None).await.unwrap();
        queue.cancel_job(&job_type, &id).await.unwrap();

        assert!(queue.is_job_canceled(&id).await.unwrap());
        let backlog = queue.get_backlog(&job_type, 10).await.unwrap();
        assert!(backlog.iter().all(|j| j.id != id));

        let canceled = queue.list_jobs(&job_type, JobStatus::Canceled, 10, 0).await.unwrap();
        assert_eq!(canceled.len(), 1);
        assert_eq!(canceled[0].id, id);
    }

    #[tokio::test]
    async fn drain_cancels_pending_jobs_without_touching_in_flight_ones() {
        let Some(queue) = test_queue().await else {
            eprintln!("skipping: REDIS_TEST_URL not set");
            return;
        };
        let job_type = format!("test-{}", unique_suffix());

        let pending_id = queue.enqueue(&job_type, serde_json::json!({}), None).await.unwrap();
        let in_flight_id = queue.enqueue(&job_type, serde_json::json!({}), None).await.unwrap();
        queue.dequeue(&job_type, "consumer-1").await.unwrap();

        let drained = queue.drain(&job_type).await.unwrap();
        assert_eq!(drained, 1, "only the still-pending job should be drained");

        let pending_job = queue.get_job(&pending_id).await.unwrap().unwrap();
        assert_eq!(pending_job.status, JobStatus::Canceled);

        let in_flight_job = queue.get_job(&in_flight_id).await.unwrap().unwrap();
        assert_eq!(in_flight_job.status, JobStatus::Processing, "drain must not touch jobs already dispatched");

        let canceled = queue.list_jobs(&job_type, JobStatus::Canceled, 10, 0).await.unwrap();
        assert_eq!(canceled.len(), 1);
        assert_eq!(canceled[0].id, pending_id);
    }

    /// A per-test job-type suffix so concurrent test runs don't share state.
    fn unique_suffix() -> String {
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string()
    }
}
