//! Adaptive re-probe priority scoring (supplemented feature, see SPEC_FULL.md).
//!
//! Generalizes the change-ratio cooldown idiom into a priority hint that
//! feeds into `PriceGraphSweep` job payloads. This is additive: the base
//! cross-product sweep in `cursor.rs` still emits every tuple regardless of
//! this score; the score only tags the payload's priority field.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

const DEAL_STREAK_RESET: u32 = 0;
const HIGH_PRIORITY_STREAK_CEILING: u32 = 3;
const MEDIUM_PRIORITY_STREAK_CEILING: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
struct PairState {
    consecutive_no_change: u32,
    last_probe_at: DateTime<Utc>,
}

/// Tracks, per (origin, destination) pair, how many consecutive probes have
/// ingested no price change. A deal sighting resets the pair to `High`
/// priority immediately; otherwise priority decays as the streak grows.
#[derive(Default)]
pub struct AdaptiveScorer {
    pairs: RwLock<HashMap<(String, String), PairState>>,
}

impl AdaptiveScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority_for(&self, origin: &str, destination: &str) -> Priority {
        let pairs = self.pairs.read().unwrap();
        match pairs.get(&(origin.to_string(), destination.to_string())) {
            None => Priority::Medium,
            Some(state) if state.consecutive_no_change <= HIGH_PRIORITY_STREAK_CEILING => Priority::High,
            Some(state) if state.consecutive_no_change <= MEDIUM_PRIORITY_STREAK_CEILING => Priority::Medium,
            Some(_) => Priority::Low,
        }
    }

    pub fn record_probe(&self, origin: &str, destination: &str, price_changed: bool) {
        let mut pairs = self.pairs.write().unwrap();
        let entry = pairs
            .entry((origin.to_string(), destination.to_string()))
            .or_insert_with(|| PairState {
                consecutive_no_change: 0,
                last_probe_at: Utc::now(),
            });
        entry.last_probe_at = Utc::now();
        if price_changed {
            entry.consecutive_no_change = DEAL_STREAK_RESET;
        } else {
            entry.consecutive_no_change += 1;
        }
    }

    /// Resets a pair to maximum priority immediately upon deal discovery.
    pub fn reset_on_deal(&self, origin: &str, destination: &str) {
        let mut pairs = self.pairs.write().unwrap();
        pairs.insert(
            (origin.to_string(), destination.to_string()),
            PairState {
                consecutive_no_change: DEAL_STREAK_RESET,
                last_probe_at: Utc::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_pair_defaults_to_medium() {
        let scorer = AdaptiveScorer::new();
        assert_eq!(scorer.priority_for("JFK", "LHR"), Priority::Medium);
    }

    #[test]
    fn repeated_no_change_decays_priority() {
        let scorer = AdaptiveScorer::new();
        for _ in 0..12 {
            scorer.record_probe("JFK", "LHR", false);
        }
        assert_eq!(scorer.priority_for("JFK", "LHR"), Priority::Low);
    }

    #[test]
    fn deal_discovery_resets_to_high_priority() {
        let scorer = AdaptiveScorer::new();
        for _ in 0..12 {
            scorer.record_probe("JFK", "LHR", false);
        }
        scorer.reset_on_deal("JFK", "LHR");
        assert_eq!(scorer.priority_for("JFK", "LHR"), Priority::High);
    }
}
