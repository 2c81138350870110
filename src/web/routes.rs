//! HTTP control API (§6): job enqueue/lookup, price-graph queries,
//! continuous-sweep admin, queue admin, and the SSE event feed.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{OriginalUri, Path, Query, Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{Json, Response};
use axum::routing::{get, post, put};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{Span, debug, trace, warn};
use ts_rs::TS;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::models::{Deal, FlightOffer, FlightSegment, SearchQuery};
use crate::error::AppError;
use crate::graph::{PathResult, RouteAggregate};
use crate::ingestion::{BulkSearchPayload, ContinuousPriceGraphPayload, FlightSearchPayload, JobType, PriceGraphSweepPayload};
use crate::queue::{EnqueueAttribution, Job, JobId, JobQueue, JobStatus, QueueError};
use crate::status::ServiceStatus;
use crate::sweep::{SweepConfig, SweepStats, SweepStatus};
use crate::web::error::ApiError;
use crate::web::sse;

/// Builds the full router. `/admin/events` is deliberately kept outside the
/// `CompressionLayer` — compressing a long-lived SSE body only adds buffering
/// latency for no size win, since each event is already a small JSON line.
pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/jobs/enqueue/{job_type}", post(enqueue_job))
        .route("/search/{id}", get(get_search))
        .route("/bulk-search", post(create_bulk_search))
        .route("/bulk-search/{id}", get(get_bulk_search))
        .route("/price-graph-sweeps", post(create_price_graph_sweep))
        .route("/price-graph-sweeps/{id}", get(get_price_graph_sweep))
        .route("/graph/path", get(graph_path))
        .route("/graph/route-details", get(graph_route_details))
        .route("/graph/explore", get(graph_explore))
        .with_state(app_state.clone());

    let admin_router = Router::new()
        .route("/admin/workers", get(list_workers))
        .route(
            "/admin/continuous-sweep/status",
            get(sweep_status),
        )
        .route("/admin/continuous-sweep/stats", get(sweep_stats))
        .route(
            "/admin/continuous-sweep/config",
            put(sweep_update_config),
        )
        .route("/admin/continuous-sweep/start", post(sweep_start))
        .route("/admin/continuous-sweep/pause", post(sweep_pause))
        .route("/admin/continuous-sweep/resume", post(sweep_resume))
        .route("/admin/continuous-sweep/stop", post(sweep_stop))
        .route("/admin/continuous-sweep/skip", post(sweep_skip))
        .route("/admin/continuous-sweep/restart", post(sweep_restart))
        .route("/admin/continuous-sweep/results", get(sweep_results))
        .route("/admin/queues/{job_type}/backlog", get(queue_backlog))
        .route("/admin/queues/{job_type}/jobs", get(queue_list_jobs))
        .route(
            "/admin/queues/{job_type}/jobs/{id}/cancel",
            post(queue_cancel_job),
        )
        .route("/admin/queues/{job_type}/drain", post(queue_drain))
        .route("/admin/queues/{job_type}/clear", post(queue_clear))
        .route(
            "/admin/queues/{job_type}/clear-failed",
            post(queue_clear_failed),
        )
        .route(
            "/admin/queues/{job_type}/clear-processing",
            post(queue_clear_processing),
        )
        .route(
            "/admin/queues/{job_type}/retry-failed",
            post(queue_retry_failed),
        )
        .route(
            "/admin/queues/{job_type}/enqueues",
            get(queue_enqueue_metrics),
        )
        .with_state(app_state.clone());

    let events_router = Router::new()
        .route("/admin/events", get(sse::stream_events))
        .with_state(app_state);

    let compressed = Router::new()
        .nest("/api", api_router)
        .nest("/api", admin_router)
        .layer(
            CompressionLayer::new()
                .zstd(true)
                .br(true)
                .gzip(true)
                .quality(tower_http::CompressionLevel::Fastest),
        );

    compressed
        .merge(Router::new().nest("/api", events_router))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer((
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    tracing::debug_span!("request", path = request.uri().path())
                })
                .on_response(
                    |response: &Response<Body>, latency: Duration, _span: &Span| {
                        let status = response.status();
                        if status.is_server_error() {
                            warn!(latency = format!("{latency:.2?}"), status = status.as_u16(), "response");
                        } else {
                            debug!(latency = format!("{latency:.2?}"), status = status.as_u16(), "response");
                        }
                    },
                )
                .on_failure(
                    |error: ServerErrorsFailureClass, latency: Duration, _span: &Span| {
                        warn!(error = ?error, latency = format!("{latency:.2?}"), "request failed");
                    },
                ),
            TimeoutLayer::new(Duration::from_secs(10)),
        ))
}

/// Maps a queue-layer error onto the crate-wide error type. `NotFound`
/// carries the missing job id through to the 404 body; everything else is an
/// opaque internal error.
fn queue_err(e: QueueError) -> AppError {
    match e {
        QueueError::NotFound(id) => AppError::NotFound(format!("job {id} not found")),
        other => AppError::Other(other.into()),
    }
}

fn attribution(headers: &HeaderMap, method: &Method, uri: &axum::http::Uri) -> EnqueueAttribution {
    EnqueueAttribution {
        actor: None,
        request_id: headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        method: Some(method.to_string()),
        path: Some(uri.path().to_string()),
        remote_ip: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct ServiceInfo {
    name: String,
    status: ServiceStatus,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct StatusResponse {
    status: ServiceStatus,
    version: String,
    services: BTreeMap<String, ServiceInfo>,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut services = BTreeMap::new();
    for (name, svc_status) in state.service_statuses.all() {
        services.insert(
            name.clone(),
            ServiceInfo {
                name,
                status: svc_status,
            },
        );
    }

    let overall_status = if services.values().any(|s| matches!(s.status, ServiceStatus::Error)) {
        ServiceStatus::Error
    } else if !services.is_empty()
        && services
            .values()
            .all(|s| matches!(s.status, ServiceStatus::Active | ServiceStatus::Connected))
    {
        ServiceStatus::Active
    } else if services.is_empty() {
        ServiceStatus::Disabled
    } else {
        ServiceStatus::Starting
    };

    Json(StatusResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        services,
    })
}

#[derive(Serialize, TS)]
#[ts(export)]
struct JobAccepted {
    job_id: String,
}

/// Jobs that only read the leg the caller describes can be enqueued directly.
/// `bulk_search` and `price_graph_sweep` are fanned out from their own
/// creation endpoints below, since each needs a parent row inserted first.
async fn enqueue_job(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    OriginalUri(uri): OriginalUri,
    method: Method,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    match JobType::parse(&job_type) {
        Some(JobType::FlightSearch) => {
            serde_json::from_value::<FlightSearchPayload>(payload.clone())
                .map_err(|e| ApiError::bad_request(e.to_string()))?;
        }
        Some(JobType::ContinuousPriceGraph) => {
            serde_json::from_value::<ContinuousPriceGraphPayload>(payload.clone())
                .map_err(|e| ApiError::bad_request(e.to_string()))?;
        }
        Some(JobType::BulkSearch) | Some(JobType::PriceGraphSweep) => {
            return Err(ApiError::bad_request(format!(
                "job type '{job_type}' is created via its own endpoint, not enqueued directly"
            )));
        }
        None => return Err(ApiError::bad_request(format!("unknown job type '{job_type}'"))),
    }

    let attribution = attribution(&headers, &method, &uri);
    let job_id = state
        .queue
        .enqueue(&job_type, payload, Some(attribution))
        .await
        .map_err(queue_err)?;

    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id: job_id.0 })))
}

#[derive(Serialize, TS)]
#[ts(export)]
struct OfferWithSegments {
    #[serde(flatten)]
    offer: FlightOffer,
    segments: Vec<FlightSegment>,
}

#[derive(Serialize, TS)]
#[ts(export)]
struct SearchResponse {
    query: SearchQuery,
    offers: Vec<OfferWithSegments>,
}

async fn get_search(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<SearchResponse>, ApiError> {
    let query = state
        .db
        .search_queries()
        .get(id)
        .await
        .map_err(AppError::Other)?
        .ok_or_else(|| AppError::NotFound(format!("search query {id}")))?;

    let offers = state.db.search_queries().get_offers(id).await.map_err(AppError::Other)?;
    let mut with_segments = Vec::with_capacity(offers.len());
    for offer in offers {
        let segments = state
            .db
            .search_queries()
            .get_segments(offer.id)
            .await
            .map_err(AppError::Other)?;
        with_segments.push(OfferWithSegments { offer, segments });
    }

    Ok(Json(SearchResponse {
        query,
        offers: with_segments,
    }))
}

#[derive(Deserialize)]
struct BulkSearchRequest {
    legs: Vec<FlightSearchPayload>,
}

async fn create_bulk_search(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    method: Method,
    headers: HeaderMap,
    Json(req): Json<BulkSearchRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    if req.legs.is_empty() {
        return Err(ApiError::bad_request("bulk search needs at least one leg"));
    }

    let bulk_search_id = state
        .db
        .bulk_searches()
        .create(req.legs.len() as i32)
        .await
        .map_err(AppError::Other)?;

    let attribution = attribution(&headers, &method, &uri);
    for leg in req.legs {
        let payload = serde_json::to_value(BulkSearchPayload { bulk_search_id, leg }).map_err(|e| AppError::Other(e.into()))?;
        state
            .queue
            .enqueue("bulk_search", payload, Some(attribution.clone()))
            .await
            .map_err(queue_err)?;
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id: bulk_search_id.to_string(),
        }),
    ))
}

async fn get_bulk_search(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::db::models::BulkSearch>, ApiError> {
    let bulk_search = state
        .db
        .bulk_searches()
        .get(id)
        .await
        .map_err(AppError::Other)?
        .ok_or_else(|| AppError::NotFound(format!("bulk search {id}")))?;
    Ok(Json(bulk_search))
}

#[derive(Deserialize)]
struct PriceGraphSweepRequest {
    origin: String,
    destination: String,
    window_start: chrono::NaiveDate,
    window_end: chrono::NaiveDate,
    trip_length_days: i32,
}

async fn create_price_graph_sweep(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    method: Method,
    headers: HeaderMap,
    Json(req): Json<PriceGraphSweepRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    if req.window_end < req.window_start {
        return Err(ApiError::bad_request("window_end must not precede window_start"));
    }

    let sweep_id = state.db.price_graph().create_sweep(1).await.map_err(AppError::Other)?;

    let payload = serde_json::to_value(PriceGraphSweepPayload {
        sweep_id,
        origin: req.origin,
        destination: req.destination,
        window_start: req.window_start,
        window_end: req.window_end,
        trip_length_days: req.trip_length_days,
    })
    .map_err(|e| AppError::Other(e.into()))?;

    let attribution = attribution(&headers, &method, &uri);
    state
        .queue
        .enqueue("price_graph_sweep", payload, Some(attribution))
        .await
        .map_err(queue_err)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id: sweep_id.to_string(),
        }),
    ))
}

#[derive(Serialize, TS)]
#[ts(export)]
struct PriceGraphSweepResponse {
    sweep: crate::db::models::PriceGraphSweep,
    results: Vec<crate::db::models::PriceGraphResult>,
}

async fn get_price_graph_sweep(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PriceGraphSweepResponse>, ApiError> {
    let sweep = state
        .db
        .price_graph()
        .get_sweep(id)
        .await
        .map_err(AppError::Other)?
        .ok_or_else(|| AppError::NotFound(format!("price graph sweep {id}")))?;
    let results = state.db.price_graph().list_results(id).await.map_err(AppError::Other)?;
    Ok(Json(PriceGraphSweepResponse { sweep, results }))
}

#[derive(Deserialize)]
struct PathQuery {
    origin: String,
    destination: String,
    #[serde(default = "default_max_hops")]
    max_hops: usize,
    max_price: Option<f64>,
}

fn default_max_hops() -> usize {
    2
}

async fn graph_path(
    State(state): State<AppState>,
    Query(q): Query<PathQuery>,
) -> Result<Json<Option<PathResult>>, ApiError> {
    let path = state.graph.cheapest_path(&q.origin, &q.destination, q.max_hops).await;
    let path = match (path, q.max_price) {
        (Some(p), Some(max_price)) if p.total_price > max_price => None,
        (p, _) => p,
    };
    Ok(Json(path))
}

#[derive(Deserialize)]
struct RouteDetailsQuery {
    origin: String,
    destination: String,
}

async fn graph_route_details(
    State(state): State<AppState>,
    Query(q): Query<RouteDetailsQuery>,
) -> Result<Json<RouteAggregate>, ApiError> {
    state
        .graph
        .route_aggregate(&q.origin, &q.destination)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no observed prices for {} -> {}", q.origin, q.destination)))
}

#[derive(Deserialize)]
struct ExploreQuery {
    origin: String,
    max_price: Option<f64>,
}

async fn graph_explore(
    State(state): State<AppState>,
    Query(q): Query<ExploreQuery>,
) -> Json<Vec<crate::graph::ExploreNode>> {
    let mut nodes = state.graph.explore(&q.origin).await;
    if let Some(max_price) = q.max_price {
        nodes.retain(|n| n.min_price_from_origin <= max_price);
    }
    Json(nodes)
}

async fn list_workers(State(state): State<AppState>) -> Result<Json<Vec<crate::queue::WorkerHeartbeat>>, ApiError> {
    let heartbeats = state.queue.list_heartbeats("worker").await.map_err(queue_err)?;
    Ok(Json(heartbeats))
}

async fn sweep_status(State(state): State<AppState>) -> Json<SweepStatus> {
    Json(state.sweep.status().await)
}

async fn sweep_stats(State(state): State<AppState>) -> Json<SweepStats> {
    Json(state.sweep.stats().await)
}

async fn sweep_update_config(
    State(state): State<AppState>,
    Json(config): Json<SweepConfig>,
) -> Result<StatusCode, ApiError> {
    state.sweep.update_config(config).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sweep_start(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.sweep.start().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sweep_pause(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.sweep.pause().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sweep_resume(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.sweep.resume().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sweep_stop(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.sweep.stop().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sweep_skip(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.sweep.skip().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sweep_restart(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.sweep.restart().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default = "default_results_limit_i64")]
    limit: i64,
}

fn default_results_limit_i64() -> i64 {
    50
}

fn default_results_limit_usize() -> usize {
    50
}

/// Continuous-sweep probes feed the same deal classifier as any other flight
/// search, so "results" for the continuous sweep is the set of currently
/// open deals rather than a dedicated result table.
async fn sweep_results(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> Result<Json<Vec<Deal>>, ApiError> {
    let deals = state.db.deals().list_open(q.limit).await.map_err(AppError::Other)?;
    Ok(Json(deals))
}

fn parse_job_status(raw: &str) -> Result<JobStatus, ApiError> {
    JobStatus::parse(raw).ok_or_else(|| ApiError::bad_request(format!("unknown job status '{raw}'")))
}

#[derive(Deserialize)]
struct BacklogQuery {
    #[serde(default = "default_results_limit_usize")]
    limit: usize,
}

async fn queue_backlog(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    Query(q): Query<BacklogQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let jobs = state.queue.get_backlog(&job_type, q.limit).await.map_err(queue_err)?;
    Ok(Json(jobs))
}

#[derive(Deserialize)]
struct ListJobsQuery {
    status: String,
    #[serde(default = "default_results_limit_usize")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

async fn queue_list_jobs(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let status = parse_job_status(&q.status)?;
    let jobs = state
        .queue
        .list_jobs(&job_type, status, q.limit, q.offset)
        .await
        .map_err(queue_err)?;
    Ok(Json(jobs))
}

async fn queue_cancel_job(
    State(state): State<AppState>,
    Path((job_type, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.queue.cancel_job(&job_type, &JobId(id)).await.map_err(queue_err)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct CountResponse {
    count: u64,
}

async fn queue_drain(State(state): State<AppState>, Path(job_type): Path<String>) -> Result<Json<CountResponse>, ApiError> {
    let count = state.queue.drain(&job_type).await.map_err(queue_err)?;
    Ok(Json(CountResponse { count }))
}

async fn queue_clear(State(state): State<AppState>, Path(job_type): Path<String>) -> Result<Json<CountResponse>, ApiError> {
    let count = state.queue.clear_queue(&job_type).await.map_err(queue_err)?;
    Ok(Json(CountResponse { count }))
}

async fn queue_clear_failed(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.queue.clear_failed(&job_type).await.map_err(queue_err)?;
    Ok(Json(CountResponse { count }))
}

async fn queue_clear_processing(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.queue.clear_processing(&job_type).await.map_err(queue_err)?;
    Ok(Json(CountResponse { count }))
}

#[derive(Deserialize)]
struct RetryFailedQuery {
    #[serde(default = "default_results_limit_usize")]
    limit: usize,
}

async fn queue_retry_failed(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    Query(q): Query<RetryFailedQuery>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.queue.retry_failed(&job_type, q.limit).await.map_err(queue_err)?;
    Ok(Json(CountResponse { count }))
}

#[derive(Deserialize)]
struct EnqueueMetricsQuery {
    #[serde(default = "default_minutes_back")]
    minutes_back: u32,
}

fn default_minutes_back() -> u32 {
    60
}

async fn queue_enqueue_metrics(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    Query(q): Query<EnqueueMetricsQuery>,
) -> Result<Json<crate::queue::EnqueueMetrics>, ApiError> {
    let metrics = state
        .queue
        .get_enqueue_metrics(&job_type, q.minutes_back)
        .await
        .map_err(queue_err)?;
    Ok(Json(metrics))
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, Uri, header};

    use super::*;

    #[test]
    fn queue_err_carries_the_missing_job_id_into_not_found() {
        let id = JobId("flight_search-1".to_string());
        match queue_err(QueueError::NotFound(id.clone())) {
            AppError::NotFound(msg) => assert!(msg.contains(&id.0)),
            other => panic!("expected AppError::NotFound, got {other:?}"),
        }
    }

    #[test]
    fn queue_err_maps_everything_else_to_other() {
        match queue_err(QueueError::Corrupt("bad record".to_string())) {
            AppError::Other(_) => {}
            other => panic!("expected AppError::Other, got {other:?}"),
        }
    }

    #[test]
    fn parse_job_status_accepts_known_values_and_rejects_unknown() {
        assert!(parse_job_status("pending").is_ok());
        assert!(parse_job_status("processing").is_ok());
        assert!(parse_job_status("not-a-status").is_err());
    }

    #[test]
    fn attribution_reads_request_id_and_user_agent_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc-123"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("test-agent"));
        let uri: Uri = "/api/jobs/enqueue/flight_search".parse().unwrap();

        let attr = attribution(&headers, &Method::POST, &uri);
        assert_eq!(attr.request_id.as_deref(), Some("abc-123"));
        assert_eq!(attr.user_agent.as_deref(), Some("test-agent"));
        assert_eq!(attr.method.as_deref(), Some("POST"));
        assert_eq!(attr.path.as_deref(), Some("/api/jobs/enqueue/flight_search"));
    }

    #[test]
    fn default_max_hops_is_two() {
        assert_eq!(default_max_hops(), 2);
    }
}
