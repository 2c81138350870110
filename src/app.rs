//! Application bootstrap: config load, connection pools, and service
//! registration. Grounded on the old Banner app's `App::new`/`run` shape,
//! generalized from a single Discord-bot/web pairing to the three
//! farecrawl services (web API, worker pool, continuous-sweep controller).

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use figment::{Figment, providers::Env};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::app_state::AppState;
use crate::config::Config;
use crate::db::DbContext;
use crate::events::EventBuffer;
use crate::graph::GraphStore;
use crate::ingestion::Handlers;
use crate::oracle::{OracleClient, PriceOracle};
use crate::queue::{JobQueue, RedisStreamQueue};
use crate::services::manager::ServiceManager;
use crate::services::sweep::SweepService;
use crate::services::web::WebService;
use crate::services::worker_pool::WorkerPoolService;
use crate::status::ServiceStatusRegistry;
use crate::sweep::{LeaderLease, SweepConfig, SweepController, SweepCursor};

/// Event buffer capacity (component F, §6 "SSE event feed").
const EVENT_BUFFER_CAPACITY: usize = 4096;
/// Continuous-sweep leader lease TTL, well above `services::sweep`'s poll
/// interval so a live leader never loses its lease to its own jitter.
const LEADER_LEASE_TTL: Duration = Duration::from_secs(30);

/// Main application struct containing all necessary components
pub struct App {
    config: Arc<Config>,
    app_state: AppState,
    service_manager: ServiceManager,
}

impl App {
    /// Create a new App instance with all necessary components initialized
    pub async fn new() -> Result<Self, anyhow::Error> {
        let config: Config = Figment::new()
            .merge(Env::raw())
            .extract()
            .context("failed to load config")?;
        let config = Arc::new(config);

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(8))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect(&config.database_url)
            .await
            .context("failed to create database pool")?;
        info!("database pool established");

        if config.init_schema {
            info!("running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&db_pool)
                .await
                .context("failed to run database migrations")?;
            info!("database migrations completed");
        }

        let redis_client = redis::Client::open(config.redis_url.clone()).context("failed to parse redis url")?;
        let redis_conn = ConnectionManager::new(redis_client)
            .await
            .context("failed to connect to redis")?;

        let events = Arc::new(EventBuffer::new(EVENT_BUFFER_CAPACITY));
        let db = DbContext::new(db_pool, events.clone());

        let queue: Arc<dyn JobQueue> = Arc::new(RedisStreamQueue::new(
            redis_conn.clone(),
            config.queue_visibility_timeout,
            config.queue_block_timeout,
        ));

        let graph = Arc::new(GraphStore::new());
        if config.seed_neo4j {
            let airports = db.airports().list().await.context("failed to load airports for graph seed")?;
            let count = airports.len();
            graph.seed_airports(&airports).await;
            info!(count, "seeded graph store with airport reference data");
        }

        let oracle: Arc<dyn PriceOracle> = Arc::new(
            OracleClient::new(
                config.oracle_base_url.clone(),
                config.oracle_timeout,
                config.price_graph_diagnostics,
                config.oracle_rpm,
            )
            .context("failed to build oracle client")?,
        );

        let service_statuses = ServiceStatusRegistry::new();

        let sweep_defaults = SweepConfig {
            rate_limit_millis: config.sweep_defaults.rate_limit_millis,
            max_concurrent_probes: config.sweep_defaults.max_concurrent_probes,
            window_days_ahead: config.sweep_defaults.window_days_ahead,
            window_days_step: config.sweep_defaults.window_days_step,
            ..Default::default()
        };
        // Shape-checksum mismatch (or no prior row) both fall back to a fresh
        // cursor; only an exact shape match resumes mid-pass (§4.2).
        let cursor = match db.sweep_progress().load_for_takeover(&sweep_defaults).await? {
            Some((cursor, true)) => cursor,
            Some((_, false)) => {
                info!("sweep config shape changed since last run, resetting cursor");
                SweepCursor::reset()
            }
            None => SweepCursor::reset(),
        };
        let leader = LeaderLease::new(redis_conn.clone(), LEADER_LEASE_TTL);
        let sweep = Arc::new(SweepController::new(db.clone(), queue.clone(), events.clone(), leader, sweep_defaults, cursor));

        let app_state = AppState::new(db, queue, graph, oracle, sweep, events, service_statuses, config.clone());

        Ok(App {
            config,
            app_state,
            service_manager: ServiceManager::new(),
        })
    }

    /// Registers the web API, worker pool, and continuous-sweep services.
    /// All three run in every process; farecrawl has no per-process role
    /// split like the old Banner app's bot/web/scraper toggle.
    pub fn setup_services(&mut self) {
        let web_service = Box::new(WebService::new(self.config.port, self.app_state.clone()));
        self.service_manager.register_service("web", web_service);

        let handlers: Arc<Handlers> = self.app_state.handlers();
        let worker_pool = Box::new(WorkerPoolService::new(
            self.app_state.queue.clone(),
            handlers,
            self.config.worker_concurrency,
            self.config.worker_retry_delay,
            self.config.worker_job_timeout,
            self.config.worker_shutdown_timeout,
            self.app_state.service_statuses.clone(),
        ));
        self.service_manager.register_service("worker_pool", worker_pool);

        let sweep_service = Box::new(SweepService::new(self.app_state.sweep.clone(), self.app_state.service_statuses.clone()));
        self.service_manager.register_service("sweep", sweep_service);
    }

    /// Start all registered services
    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Run the application and handle shutdown signals
    pub async fn run(self) -> ExitCode {
        crate::signals::handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout).await
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
