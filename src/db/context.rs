//! Database context with automatic event emission.

use sqlx::PgPool;
use std::sync::Arc;

use crate::db::airports::AirportOps;
use crate::db::bulk_searches::BulkSearchOps;
use crate::db::deals::DealOps;
use crate::db::price_graph::PriceGraphOps;
use crate::db::scheduled_jobs::ScheduledJobOps;
use crate::db::search_queries::SearchQueryOps;
use crate::db::sweep_progress::SweepProgressOps;
use crate::events::EventBuffer;

/// Database context that wraps pool and event buffer.
///
/// All database operations that should emit events go through this context.
#[derive(Clone)]
pub struct DbContext {
    pool: PgPool,
    events: Arc<EventBuffer>,
}

impl DbContext {
    /// Create a new DbContext.
    pub fn new(pool: PgPool, events: Arc<EventBuffer>) -> Self {
        Self { pool, events }
    }

    /// Get the underlying database pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get the event buffer.
    pub fn events(&self) -> &EventBuffer {
        &self.events
    }

    pub fn airports(&self) -> AirportOps<'_> {
        AirportOps::new(self)
    }

    pub fn search_queries(&self) -> SearchQueryOps<'_> {
        SearchQueryOps::new(self)
    }

    pub fn scheduled_jobs(&self) -> ScheduledJobOps<'_> {
        ScheduledJobOps::new(self)
    }

    pub fn bulk_searches(&self) -> BulkSearchOps<'_> {
        BulkSearchOps::new(self)
    }

    pub fn price_graph(&self) -> PriceGraphOps<'_> {
        PriceGraphOps::new(self)
    }

    pub fn sweep_progress(&self) -> SweepProgressOps<'_> {
        SweepProgressOps::new(self)
    }

    pub fn deals(&self) -> DealOps<'_> {
        DealOps::new(self)
    }
}
