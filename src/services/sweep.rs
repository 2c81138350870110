//! Drive loop for the continuous-sweep controller (§4.2).
//!
//! Grounded on the periodic-wake-with-`CancellationToken` shape of
//! `scraper/scheduler.rs`: a `tokio::select!` between a timer and a shutdown
//! signal, with in-flight work cancellable rather than blocking shutdown.
//! Leadership is attempted and renewed on its own slower cadence independent
//! of the emission rate.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::services::Service;
use crate::status::{ServiceStatus, ServiceStatusRegistry};
use crate::sweep::{SweepController, SweepStateKind};

/// How often a non-leader (or leader renewing its own lease) retries leader
/// election, well under the lease's own TTL so a crashed leader is noticed
/// quickly without constant Redis traffic.
const LEADER_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct SweepService {
    controller: Arc<SweepController>,
    service_statuses: ServiceStatusRegistry,
    cancel: CancellationToken,
}

impl SweepService {
    pub fn new(controller: Arc<SweepController>, service_statuses: ServiceStatusRegistry) -> Self {
        Self {
            controller,
            service_statuses,
            cancel: CancellationToken::new(),
        }
    }

    /// Owns the leader lease, renewing it while held and retrying acquisition
    /// while not, independent of the emission loop's cadence.
    async fn leadership_loop(controller: Arc<SweepController>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(LEADER_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if controller.is_leader().await {
                        controller.renew_leadership().await;
                    } else if controller.try_acquire_leadership().await {
                        info!("took over as continuous-sweep leader");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }

    /// Emits one tuple per tick while leading and running, and drains in
    /// flight probes down to zero before announcing Stopped.
    async fn emission_loop(controller: Arc<SweepController>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let kind = controller.kind().await;
            if kind == SweepStateKind::Draining {
                if controller.in_flight_count() == 0 {
                    controller.finish_draining().await;
                } else {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                continue;
            }

            if !controller.is_leader().await || kind != SweepStateKind::Running {
                tokio::time::sleep(Duration::from_millis(250)).await;
                continue;
            }

            match controller.tick().await {
                Ok(Some(tuple)) => {
                    debug!(origin = tuple.origin, destination = tuple.destination, "emitted sweep tuple");
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = ?e, "sweep tick failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(controller.rate_limit().await) => {}
                _ = cancel.cancelled() => break,
            }
        }
    }
}

#[async_trait::async_trait]
impl Service for SweepService {
    fn name(&self) -> &'static str {
        "sweep"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.service_statuses.set("sweep", ServiceStatus::Active);

        tokio::join!(
            Self::leadership_loop(self.controller.clone(), self.cancel.clone()),
            Self::emission_loop(self.controller.clone(), self.cancel.clone()),
        );

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.cancel.cancel();
        self.controller.release_leadership().await;
        Ok(())
    }
}
