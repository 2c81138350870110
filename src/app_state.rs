//! Application state shared across the web service and admin handlers.

use std::sync::Arc;

use crate::config::Config;
use crate::db::DbContext;
use crate::events::EventBuffer;
use crate::graph::GraphStore;
use crate::ingestion::Handlers;
use crate::oracle::PriceOracle;
use crate::queue::JobQueue;
use crate::status::ServiceStatusRegistry;
use crate::sweep::SweepController;

#[derive(Clone)]
pub struct AppState {
    pub db: DbContext,
    pub queue: Arc<dyn JobQueue>,
    pub graph: Arc<GraphStore>,
    pub oracle: Arc<dyn PriceOracle>,
    pub sweep: Arc<SweepController>,
    pub events: Arc<EventBuffer>,
    pub service_statuses: ServiceStatusRegistry,
    pub config: Arc<Config>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DbContext,
        queue: Arc<dyn JobQueue>,
        graph: Arc<GraphStore>,
        oracle: Arc<dyn PriceOracle>,
        sweep: Arc<SweepController>,
        events: Arc<EventBuffer>,
        service_statuses: ServiceStatusRegistry,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            queue,
            graph,
            oracle,
            sweep,
            events,
            service_statuses,
            config,
        }
    }

    /// Builds the shared handler set given to every worker in the pool.
    /// Held behind `Arc` so each worker task can clone it cheaply.
    pub fn handlers(&self) -> Arc<Handlers> {
        Arc::new(Handlers {
            db: self.db.clone(),
            queue: self.queue.clone(),
            oracle: self.oracle.clone(),
            graph: self.graph.clone(),
            sweep: Some(self.sweep.clone()),
            deal_thresholds: self.config.deal_thresholds.clone(),
        })
    }
}
