//! The continuous-sweep controller's in-memory runtime state and control
//! surface. The actual periodic emission loop lives in
//! `services::sweep::SweepService`, which drives this controller the way
//! the teacher's `scraper/scheduler.rs` drives subject scheduling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{RwLock, Semaphore};
use tracing::{info, warn};
use ts_rs::TS;

use crate::db::DbContext;
use crate::error::AppError;
use crate::events::{DomainEvent, EventBuffer, SweepEvent};
use crate::queue::{EnqueueAttribution, JobQueue};
use crate::sweep::adaptive::{AdaptiveScorer, Priority};
use crate::sweep::{LeaderLease, SweepConfig, SweepCursor, SweepStateKind, SweepTuple};

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct SweepStatus {
    pub state: SweepStateKind,
    pub is_leader: bool,
    pub cursor: SweepCursor,
    pub config: SweepConfig,
    #[ts(type = "string | null")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, TS)]
#[ts(export)]
pub struct SweepStats {
    pub emitted_total: u64,
    pub passes_completed: u64,
}

struct RuntimeState {
    kind: SweepStateKind,
    config: SweepConfig,
    cursor: SweepCursor,
    started_at: Option<DateTime<Utc>>,
    stats: SweepStats,
}

pub struct SweepController {
    db: DbContext,
    queue: Arc<dyn JobQueue>,
    events: Arc<EventBuffer>,
    state: RwLock<RuntimeState>,
    leader: tokio::sync::Mutex<LeaderLease>,
    semaphore: RwLock<Arc<Semaphore>>,
    in_flight: DashMap<String, tokio::sync::OwnedSemaphorePermit>,
    pub adaptive: AdaptiveScorer,
}

impl SweepController {
    pub fn new(
        db: DbContext,
        queue: Arc<dyn JobQueue>,
        events: Arc<EventBuffer>,
        leader: LeaderLease,
        config: SweepConfig,
        cursor: SweepCursor,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_probes.max(1)));
        SweepController {
            db,
            queue,
            events,
            state: RwLock::new(RuntimeState {
                kind: SweepStateKind::Idle,
                config,
                cursor,
                started_at: None,
                stats: SweepStats::default(),
            }),
            leader: tokio::sync::Mutex::new(leader),
            semaphore: RwLock::new(semaphore),
            in_flight: DashMap::new(),
            adaptive: AdaptiveScorer::new(),
        }
    }

    pub async fn is_leader(&self) -> bool {
        self.leader.lock().await.is_leader()
    }

    pub async fn try_acquire_leadership(&self) -> bool {
        let acquired = self.leader.lock().await.try_acquire().await;
        if acquired {
            let state = self.state.read().await;
            let is_running = state.kind == SweepStateKind::Running;
            let is_paused = state.kind == SweepStateKind::Paused;
            let config = state.config.clone();
            drop(state);
            // Re-stamps the config snapshot/checksum the new leader is running
            // under, so `load_for_takeover` sees a shape match on the next
            // restart instead of comparing against a stale default-0 checksum.
            if let Err(err) = self.db.sweep_progress().save_state(is_running, is_paused, false, &config).await {
                warn!(?err, "failed to persist sweep state on leadership acquisition");
            }
        }
        acquired
    }

    pub async fn renew_leadership(&self) {
        self.leader.lock().await.renew().await;
    }

    pub async fn release_leadership(&self) {
        self.leader.lock().await.release().await;
    }

    pub async fn status(&self) -> SweepStatus {
        let state = self.state.read().await;
        SweepStatus {
            state: state.kind,
            is_leader: self.is_leader().await,
            cursor: state.cursor,
            config: state.config.clone(),
            started_at: state.started_at,
        }
    }

    pub async fn stats(&self) -> SweepStats {
        self.state.read().await.stats.clone()
    }

    pub async fn start(&self) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.kind == SweepStateKind::Running {
            return Err(AppError::Conflict("sweep already running".into()));
        }
        let from = state.kind;
        state.kind = SweepStateKind::Running;
        state.started_at = Some(Utc::now());
        let config = state.config.clone();
        drop(state);
        self.db.sweep_progress().save_state(true, false, false, &config).await.map_err(AppError::Other)?;
        self.events.publish(DomainEvent::Sweep(SweepEvent::StateChanged { from, to: SweepStateKind::Running }));
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.kind != SweepStateKind::Running {
            return Err(AppError::Conflict("sweep is not running".into()));
        }
        state.kind = SweepStateKind::Paused;
        let config = state.config.clone();
        drop(state);
        self.db.sweep_progress().save_state(false, true, false, &config).await.map_err(AppError::Other)?;
        self.events.publish(DomainEvent::Sweep(SweepEvent::StateChanged { from: SweepStateKind::Running, to: SweepStateKind::Paused }));
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.kind != SweepStateKind::Paused {
            return Err(AppError::Conflict("sweep is not paused".into()));
        }
        state.kind = SweepStateKind::Running;
        let config = state.config.clone();
        drop(state);
        self.db.sweep_progress().save_state(true, false, false, &config).await.map_err(AppError::Other)?;
        self.events.publish(DomainEvent::Sweep(SweepEvent::StateChanged { from: SweepStateKind::Paused, to: SweepStateKind::Running }));
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if !matches!(state.kind, SweepStateKind::Running | SweepStateKind::Paused) {
            return Err(AppError::Conflict("sweep is not active".into()));
        }
        let from = state.kind;
        state.kind = SweepStateKind::Draining;
        let config = state.config.clone();
        drop(state);
        self.db.sweep_progress().save_state(false, false, false, &config).await.map_err(AppError::Other)?;
        self.events.publish(DomainEvent::Sweep(SweepEvent::StateChanged { from, to: SweepStateKind::Draining }));
        Ok(())
    }

    /// Called by the drive loop once controller-owned pending jobs reach zero.
    pub async fn finish_draining(&self) {
        let mut state = self.state.write().await;
        if state.kind == SweepStateKind::Draining {
            state.kind = SweepStateKind::Stopped;
            drop(state);
            self.events.publish(DomainEvent::Sweep(SweepEvent::StateChanged { from: SweepStateKind::Draining, to: SweepStateKind::Stopped }));
        }
    }

    pub async fn skip(&self) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.kind != SweepStateKind::Running {
            return Err(AppError::Conflict("sweep is not running".into()));
        }
        let config = state.config.clone();
        state.cursor.skip_pair(&config);
        self.db.sweep_progress().save_cursor(&state.cursor).await.map_err(AppError::Other)?;
        Ok(())
    }

    pub async fn restart(&self) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.kind != SweepStateKind::Stopped {
            return Err(AppError::Conflict("sweep must be stopped before restart".into()));
        }
        state.cursor = SweepCursor::reset();
        state.kind = SweepStateKind::Running;
        state.started_at = Some(Utc::now());
        let config = state.config.clone();
        drop(state);
        self.db.sweep_progress().save_cursor(&SweepCursor::reset()).await.map_err(AppError::Other)?;
        self.db.sweep_progress().save_state(true, false, false, &config).await.map_err(AppError::Other)?;
        self.events.publish(DomainEvent::Sweep(SweepEvent::StateChanged { from: SweepStateKind::Stopped, to: SweepStateKind::Running }));
        Ok(())
    }

    pub async fn update_config(&self, new_config: SweepConfig) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let new_permits = new_config.max_concurrent_probes.max(1);
        state.config = new_config;
        let is_running = state.kind == SweepStateKind::Running;
        let is_paused = state.kind == SweepStateKind::Paused;
        let config = state.config.clone();
        drop(state);
        *self.semaphore.write().await = Arc::new(Semaphore::new(new_permits));
        self.db.sweep_progress().save_state(is_running, is_paused, false, &config).await.map_err(AppError::Other)?;
        Ok(())
    }

    pub async fn kind(&self) -> SweepStateKind {
        self.state.read().await.kind
    }

    /// One tick of the drive loop: resolves the current tuple, blocks on the
    /// throttle semaphore, enqueues a `price_graph_sweep` job, and advances
    /// the cursor. Returns `None` when the controller is not in a state that
    /// should emit (Paused/Draining/Stopped/Idle) so the caller can sleep.
    pub async fn tick(&self) -> Result<Option<SweepTuple>, AppError> {
        let kind = self.kind().await;
        if kind != SweepStateKind::Running {
            return Ok(None);
        }

        let permit = {
            let semaphore = self.semaphore.read().await.clone();
            semaphore
                .acquire_owned()
                .await
                .map_err(|e| AppError::Other(anyhow::anyhow!(e)))?
        };

        let mut state = self.state.write().await;
        let Some(tuple) = state.cursor.resolve(&state.config) else {
            drop(state);
            drop(permit);
            return Ok(None);
        };
        let config = state.config.clone();
        let wrapped = state.cursor.advance(&config);
        if wrapped {
            state.stats.passes_completed += 1;
        }
        state.stats.emitted_total += 1;
        let cursor = state.cursor;
        drop(state);

        self.db.sweep_progress().save_cursor(&cursor).await.map_err(AppError::Other)?;

        let priority = self.adaptive.priority_for(&tuple.origin, &tuple.destination);
        let payload = serde_json::json!({
            "origin": tuple.origin,
            "destination": tuple.destination,
            "departure_date": tuple.departure_date,
            "trip_length_days": tuple.trip_length_days,
            "cabin": config.cabin,
            "stops": config.stops,
            "travelers": config.travelers,
            "currency": config.currency,
            "excluded_airlines": config.excluded_airlines,
            "priority": priority_str(priority),
        });

        let attribution = EnqueueAttribution {
            actor: Some("scheduler".to_string()),
            ..Default::default()
        };
        let job_id = self
            .queue
            .enqueue("continuous_price_graph", payload, Some(attribution))
            .await
            .map_err(|e| AppError::Other(e.into()))?;
        self.in_flight.insert(job_id.0.clone(), permit);

        self.events.publish(DomainEvent::Sweep(SweepEvent::TupleEmitted {
            origin: tuple.origin.clone(),
            destination: tuple.destination.clone(),
            window_idx: tuple.window_idx,
            trip_length: tuple.trip_length_days as i64,
        }));

        Ok(Some(tuple))
    }

    /// Releases the throttle permit held for a completed probe, called by
    /// the ingestion handler once the oracle call and persistence finish.
    pub fn mark_probe_complete(&self, job_id: &str) {
        self.in_flight.remove(job_id);
    }

    /// Number of probes emitted but not yet marked complete. The drive loop
    /// polls this while Draining to decide when to transition to Stopped.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub async fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.state.read().await.config.rate_limit_millis)
    }

    pub async fn config_snapshot(&self) -> HashMap<&'static str, serde_json::Value> {
        let state = self.state.read().await;
        let mut map = HashMap::new();
        map.insert("shape_checksum", serde_json::json!(state.config.shape_checksum()));
        map
    }
}

fn priority_str(p: Priority) -> &'static str {
    match p {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
    }
}

impl std::fmt::Debug for SweepController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepController").finish_non_exhaustive()
    }
}

/// Logs a concise summary line; used by the drive loop on state transitions.
pub fn log_transition(from: SweepStateKind, to: SweepStateKind) {
    info!(?from, ?to, "continuous sweep state transition");
}
