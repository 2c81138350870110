//! In-process route/price graph (component C, §3, §9).
//!
//! Implements the graph as a `petgraph` directed multigraph keyed by IATA
//! code, guarded by a single `RwLock` per the Resolved Open Question in
//! SPEC_FULL.md: the graph lives in memory and is rebuilt from a periodic
//! Postgres snapshot on restart rather than backed directly by the relational
//! store.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use ts_rs::TS;

use crate::db::models::Airport;

/// One observed (route, departure date, airline, trip type) price point,
/// stored as an edge weight. At most one edge exists per identity tuple —
/// `GraphStore::record_price_point` upserts in place and bumps `last_seen_at`
/// rather than adding a duplicate edge (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PricePoint {
    #[ts(type = "string")]
    pub departure_date: NaiveDate,
    pub price: f64,
    pub airline_code: String,
    pub trip_type: String,
    #[ts(type = "string")]
    pub return_date: Option<NaiveDate>,
    #[ts(type = "string")]
    pub first_seen_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub last_seen_at: DateTime<Utc>,
}

/// One (origin, destination, airline) aggregate edge, maintained
/// incrementally as `PricePoint`s are recorded rather than recomputed from
/// scratch on read (§3, §4.3).
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct Route {
    pub origin: String,
    pub destination: String,
    pub airline_code: String,
    pub avg_price: f64,
    pub sample_count: usize,
    #[ts(type = "string")]
    pub first_seen_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct RouteAggregate {
    pub origin: String,
    pub destination: String,
    pub min_price: f64,
    pub max_price: f64,
    pub avg_price: f64,
    pub sample_count: usize,
}

/// Identity key for upserting a `PricePoint` edge: (origin, destination,
/// departure_date, airline, trip_type, return_date), per §3.
type PricePointKey = (NodeIndex, NodeIndex, NaiveDate, String, String, Option<NaiveDate>);

/// Identity key for a maintained `Route` edge: (origin, destination, airline).
type RouteKey = (NodeIndex, NodeIndex, String);

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct PathHop {
    pub origin: String,
    pub destination: String,
    pub price: f64,
    #[ts(type = "string")]
    pub departure_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct PathResult {
    pub hops: Vec<PathHop>,
    pub total_price: f64,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct ExploreNode {
    pub iata: String,
    pub min_price_from_origin: f64,
}

struct Inner {
    graph: DiGraph<String, PricePoint>,
    index_of: HashMap<String, NodeIndex>,
    price_points: HashMap<PricePointKey, EdgeIndex>,
    routes: HashMap<RouteKey, Route>,
}

impl Inner {
    fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_of: HashMap::new(),
            price_points: HashMap::new(),
            routes: HashMap::new(),
        }
    }

    fn ensure_node(&mut self, iata: &str) -> NodeIndex {
        if let Some(idx) = self.index_of.get(iata) {
            return *idx;
        }
        let idx = self.graph.add_node(iata.to_string());
        self.index_of.insert(iata.to_string(), idx);
        idx
    }
}

/// In-memory route graph. Cheap to clone the handle (`Arc<GraphStore>`); the
/// lock is held only for the duration of a single read or write operation.
pub struct GraphStore {
    inner: RwLock<Inner>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::new()),
        }
    }

    pub async fn seed_airports(&self, airports: &[Airport]) {
        let mut inner = self.inner.write().await;
        for airport in airports {
            inner.ensure_node(&airport.iata);
        }
    }

    /// Upserts the `PricePoint` edge identified by (origin, destination,
    /// departure_date, airline, trip_type, return_date) — updating price and
    /// `last_seen_at` in place if it already exists rather than adding a
    /// duplicate edge — and rolls the price into the matching `Route`'s
    /// incremental mean, per §3 and §4.3.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_price_point(
        &self,
        origin: &str,
        destination: &str,
        departure_date: NaiveDate,
        airline_code: &str,
        trip_type: &str,
        return_date: Option<NaiveDate>,
        price: f64,
    ) -> Route {
        let mut inner = self.inner.write().await;
        let from = inner.ensure_node(origin);
        let to = inner.ensure_node(destination);
        let now = Utc::now();

        let point_key = (from, to, departure_date, airline_code.to_string(), trip_type.to_string(), return_date);
        if let Some(&edge_idx) = inner.price_points.get(&point_key) {
            let existing = &mut inner.graph[edge_idx];
            existing.price = price;
            existing.last_seen_at = now;
        } else {
            let edge_idx = inner.graph.add_edge(
                from,
                to,
                PricePoint {
                    departure_date,
                    price,
                    airline_code: airline_code.to_string(),
                    trip_type: trip_type.to_string(),
                    return_date,
                    first_seen_at: now,
                    last_seen_at: now,
                },
            );
            inner.price_points.insert(point_key, edge_idx);
        }

        let route_key = (from, to, airline_code.to_string());
        let route = inner
            .routes
            .entry(route_key)
            .and_modify(|route| {
                route.avg_price = (route.avg_price * route.sample_count as f64 + price) / (route.sample_count + 1) as f64;
                route.sample_count += 1;
                route.last_seen_at = now;
            })
            .or_insert_with(|| Route {
                origin: origin.to_string(),
                destination: destination.to_string(),
                airline_code: airline_code.to_string(),
                avg_price: price,
                sample_count: 1,
                first_seen_at: now,
                last_seen_at: now,
            });
        route.clone()
    }

    /// Prices on `PricePoint` edges for `origin -> destination` last seen
    /// within `window_days`, used as the deal classifier's baseline (§4.3).
    /// Reads the continuous-sweep graph store directly rather than the
    /// one-off price-graph-sweep table, so deals classify off of whichever
    /// job type actually ingested the point.
    pub async fn recent_prices(&self, origin: &str, destination: &str, window_days: i64) -> Vec<f64> {
        let inner = self.inner.read().await;
        let (Some(&from), Some(&to)) = (inner.index_of.get(origin), inner.index_of.get(destination)) else {
            return Vec::new();
        };
        let since = Utc::now() - chrono::Duration::days(window_days);
        inner
            .graph
            .edges_connecting(from, to)
            .map(|edge| edge.weight())
            .filter(|point| point.last_seen_at >= since)
            .map(|point| point.price)
            .collect()
    }

    /// Aggregate min/max/avg price across the route's maintained per-airline
    /// `Route` edges — bounded by the number of airlines serving the route,
    /// not the number of price points ever observed on it.
    pub async fn route_aggregate(&self, origin: &str, destination: &str) -> Option<RouteAggregate> {
        let inner = self.inner.read().await;
        let from = *inner.index_of.get(origin)?;
        let to = *inner.index_of.get(destination)?;
        let routes: Vec<&Route> = inner
            .routes
            .iter()
            .filter(|((f, t, _), _)| *f == from && *t == to)
            .map(|(_, route)| route)
            .collect();
        if routes.is_empty() {
            return None;
        }
        let total_samples: usize = routes.iter().map(|r| r.sample_count).sum();
        let weighted_sum: f64 = routes.iter().map(|r| r.avg_price * r.sample_count as f64).sum();
        Some(RouteAggregate {
            origin: origin.to_string(),
            destination: destination.to_string(),
            min_price: routes.iter().map(|r| r.avg_price).fold(f64::INFINITY, f64::min),
            max_price: routes.iter().map(|r| r.avg_price).fold(f64::NEG_INFINITY, f64::max),
            avg_price: weighted_sum / total_samples as f64,
            sample_count: total_samples,
        })
    }

    /// Cheapest multi-hop path between two airports, using the minimum
    /// observed price per edge as the edge weight. Dijkstra over the whole
    /// graph; `max_hops` bounds the search depth to keep this bounded on a
    /// dense graph.
    pub async fn cheapest_path(
        &self,
        origin: &str,
        destination: &str,
        max_hops: usize,
    ) -> Option<PathResult> {
        let inner = self.inner.read().await;
        let start = *inner.index_of.get(origin)?;
        let goal = *inner.index_of.get(destination)?;

        // Collapse parallel edges to their minimum price before running the
        // shortest-path search, so Dijkstra operates on a simple weighted graph.
        let mut min_edge: HashMap<(NodeIndex, NodeIndex), &PricePoint> = HashMap::new();
        for edge in inner.graph.edge_references() {
            let key = (edge.source(), edge.target());
            let weight = edge.weight();
            min_edge
                .entry(key)
                .and_modify(|existing| {
                    if weight.price < existing.price {
                        *existing = weight;
                    }
                })
                .or_insert(weight);
        }

        let mut dist: HashMap<NodeIndex, f64> = HashMap::new();
        let mut prev: HashMap<NodeIndex, (NodeIndex, &PricePoint)> = HashMap::new();
        let mut hops: HashMap<NodeIndex, usize> = HashMap::new();
        let mut visited: std::collections::HashSet<NodeIndex> = std::collections::HashSet::new();
        dist.insert(start, 0.0);
        hops.insert(start, 0);

        loop {
            let current = dist
                .iter()
                .filter(|(node, _)| !visited.contains(*node))
                .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(node, cost)| (*node, *cost));
            let Some((node, cost)) = current else { break };
            if node == goal {
                break;
            }
            visited.insert(node);
            let current_hops = *hops.get(&node).unwrap_or(&0);
            if current_hops >= max_hops {
                continue;
            }
            for ((from, to), point) in min_edge.iter().filter(|((from, _), _)| *from == node) {
                let next_cost = cost + point.price;
                if next_cost < *dist.get(to).unwrap_or(&f64::INFINITY) {
                    dist.insert(*to, next_cost);
                    prev.insert(*to, (*from, point));
                    hops.insert(*to, current_hops + 1);
                }
            }
        }

        if !dist.contains_key(&goal) {
            return None;
        }

        let mut path_hops = Vec::new();
        let mut current = goal;
        while let Some((from, point)) = prev.get(&current) {
            path_hops.push(PathHop {
                origin: inner.graph[*from].clone(),
                destination: inner.graph[current].clone(),
                price: point.price,
                departure_date: point.departure_date,
            });
            current = *from;
        }
        path_hops.reverse();

        Some(PathResult {
            total_price: *dist.get(&goal).unwrap_or(&0.0),
            hops: path_hops,
        })
    }

    /// One-hop neighbors of `origin` sorted by cheapest observed price,
    /// backing the `/graph/explore` endpoint.
    pub async fn explore(&self, origin: &str) -> Vec<ExploreNode> {
        let inner = self.inner.read().await;
        let Some(&from) = inner.index_of.get(origin) else {
            return Vec::new();
        };
        let mut best: HashMap<NodeIndex, f64> = HashMap::new();
        for edge in inner.graph.edges(from) {
            let price = edge.weight().price;
            best.entry(edge.target())
                .and_modify(|existing| {
                    if price < *existing {
                        *existing = price;
                    }
                })
                .or_insert(price);
        }
        let mut nodes: Vec<ExploreNode> = best
            .into_iter()
            .map(|(idx, price)| ExploreNode {
                iata: inner.graph[idx].clone(),
                min_price_from_origin: price,
            })
            .collect();
        nodes.sort_by(|a, b| a.min_price_from_origin.partial_cmp(&b.min_price_from_origin).unwrap());
        nodes
    }

    pub async fn node_count(&self) -> usize {
        self.inner.read().await.graph.node_count()
    }

    pub async fn edge_count(&self) -> usize {
        self.inner.read().await.graph.edge_count()
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    #[tokio::test]
    async fn cheapest_path_prefers_lower_price_multi_hop() {
        let store = GraphStore::new();
        store.record_price_point("JFK", "LHR", today(), "AA", "one_way", None, 500.0).await;
        store.record_price_point("JFK", "CDG", today(), "AA", "one_way", None, 100.0).await;
        store.record_price_point("CDG", "LHR", today(), "AA", "one_way", None, 100.0).await;

        let path = store.cheapest_path("JFK", "LHR", 5).await.unwrap();
        assert_eq!(path.total_price, 200.0);
        assert_eq!(path.hops.len(), 2);
    }

    #[tokio::test]
    async fn record_price_point_upserts_same_identity_instead_of_duplicating() {
        let store = GraphStore::new();
        store.record_price_point("JFK", "LAX", today(), "AA", "one_way", None, 300.0).await;
        store.record_price_point("JFK", "LAX", today(), "AA", "one_way", None, 250.0).await;

        assert_eq!(store.edge_count().await, 1, "same identity tuple must update in place, not duplicate");
        let prices = store.recent_prices("JFK", "LAX", 30).await;
        assert_eq!(prices, vec![250.0]);
    }

    #[tokio::test]
    async fn record_price_point_keeps_distinct_edges_for_distinct_identities() {
        let store = GraphStore::new();
        store.record_price_point("JFK", "LAX", today(), "AA", "one_way", None, 300.0).await;
        store.record_price_point("JFK", "LAX", today(), "UA", "one_way", None, 280.0).await;
        store.record_price_point("JFK", "LAX", today() + chrono::Duration::days(1), "AA", "one_way", None, 260.0).await;

        assert_eq!(store.edge_count().await, 3);
    }

    #[tokio::test]
    async fn route_aggregate_reflects_incrementally_maintained_route_means() {
        let store = GraphStore::new();
        let first = store.record_price_point("JFK", "LAX", today(), "AA", "one_way", None, 300.0).await;
        assert_eq!(first.avg_price, 300.0);
        assert_eq!(first.sample_count, 1);

        let second = store
            .record_price_point("JFK", "LAX", today() + chrono::Duration::days(1), "AA", "one_way", None, 200.0)
            .await;
        assert_eq!(second.avg_price, 250.0, "incremental mean across the two AA price points");
        assert_eq!(second.sample_count, 2);

        store.record_price_point("JFK", "LAX", today(), "UA", "one_way", None, 150.0).await;

        let agg = store.route_aggregate("JFK", "LAX").await.unwrap();
        assert_eq!(agg.min_price, 150.0, "UA's route mean is the cheapest of the two airlines");
        assert_eq!(agg.max_price, 250.0);
        assert_eq!(agg.sample_count, 3);
    }

    #[tokio::test]
    async fn recent_prices_excludes_points_outside_the_window() {
        let store = GraphStore::new();
        store.record_price_point("JFK", "LHR", today(), "AA", "one_way", None, 500.0).await;
        {
            let mut inner = store.inner.write().await;
            let from = *inner.index_of.get("JFK").unwrap();
            let to = *inner.index_of.get("LHR").unwrap();
            let key = inner
                .price_points
                .get(&(from, to, today(), "AA".to_string(), "one_way".to_string(), None))
                .copied()
                .unwrap();
            inner.graph[key].last_seen_at = Utc::now() - chrono::Duration::days(90);
        }
        store.record_price_point("JFK", "LHR", today(), "DL", "one_way", None, 420.0).await;

        let prices = store.recent_prices("JFK", "LHR", 30).await;
        assert_eq!(prices, vec![420.0]);
    }

    #[tokio::test]
    async fn explore_sorts_neighbors_by_price() {
        let store = GraphStore::new();
        store.record_price_point("JFK", "LAX", today(), "AA", "one_way", None, 300.0).await;
        store.record_price_point("JFK", "ORD", today(), "AA", "one_way", None, 100.0).await;
        let nodes = store.explore("JFK").await;
        assert_eq!(nodes[0].iata, "ORD");
        assert_eq!(nodes[1].iata, "LAX");
    }
}
