//! Continuous-sweep controller (component G, §4.2): a cooperative, leader-elected
//! scheduler walking the origin x destination x date-window x trip-length
//! cross product, emitting one `price_graph_sweep` job per tuple.

pub mod adaptive;
mod controller;
mod cursor;
mod leader;
mod regions;

pub use controller::{SweepController, SweepStats, SweepStatus};
pub use cursor::SweepCursor;
pub use leader::LeaderLease;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// States of the continuous-sweep controller's state machine (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SweepStateKind {
    Idle,
    Running,
    Paused,
    Draining,
    Stopped,
}

/// Mutable configuration for the sweep, replaceable at runtime via the
/// control API (`PUT /admin/continuous-sweep/config`).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SweepConfig {
    /// IATA codes or `REGION:*` macro tokens, expanded at enqueue time.
    pub origins: Vec<String>,
    pub destinations: Vec<String>,
    #[serde(default)]
    pub excluded_origins: Vec<String>,
    #[serde(default)]
    pub excluded_destinations: Vec<String>,
    /// Sorted, unique, positive trip lengths in days.
    pub trip_lengths: Vec<u32>,
    pub window_days_ahead: i64,
    pub window_days_step: i64,
    pub rate_limit_millis: u64,
    pub max_concurrent_probes: usize,
    #[serde(default = "default_cabin")]
    pub cabin: String,
    pub stops: Option<u32>,
    #[serde(default = "default_travelers")]
    pub travelers: u32,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub excluded_airlines: Vec<String>,
}

fn default_cabin() -> String {
    "economy".to_string()
}
fn default_travelers() -> u32 {
    1
}
fn default_currency() -> String {
    "USD".to_string()
}

impl SweepConfig {
    /// Number of date windows implied by `window_days_ahead`/`window_days_step`.
    pub fn window_count(&self) -> i64 {
        if self.window_days_step <= 0 {
            return 1;
        }
        (self.window_days_ahead / self.window_days_step).max(1)
    }

    /// Expands region macros and applies the exclusion lists, producing the
    /// concrete airport lists the cross-product is taken over. Expansion
    /// happens here (at cursor-advance / emit time), not at config save, so
    /// changes to the macro catalog affect only future tuples.
    pub fn resolved_origins(&self) -> Vec<String> {
        regions::expand_list(&self.origins, &self.excluded_origins)
    }

    pub fn resolved_destinations(&self) -> Vec<String> {
        regions::expand_list(&self.destinations, &self.excluded_destinations)
    }

    /// A stable checksum over the shape of the cross-product, used to detect
    /// drift when a new leader takes over mid-sweep (§4.2 "Cursor & resumption").
    pub fn shape_checksum(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        self.resolved_origins().hash(&mut hasher);
        self.resolved_destinations().hash(&mut hasher);
        self.trip_lengths.hash(&mut hasher);
        self.window_count().hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            origins: vec!["REGION:NORTH_AMERICA".to_string()],
            destinations: vec!["REGION:EUROPE".to_string()],
            excluded_origins: vec![],
            excluded_destinations: vec![],
            trip_lengths: vec![7, 14],
            window_days_ahead: 365,
            window_days_step: 30,
            rate_limit_millis: 250,
            max_concurrent_probes: 4,
            cabin: default_cabin(),
            stops: None,
            travelers: default_travelers(),
            currency: default_currency(),
            excluded_airlines: vec![],
        }
    }
}

/// One (origin, destination, window, trip-length) tuple ready to be enqueued.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SweepTuple {
    pub origin: String,
    pub destination: String,
    pub window_idx: i64,
    pub departure_date: String,
    pub trip_length_days: u32,
}
