//! Cursor-based resumable progress through the sweep's cross-product.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::{SweepConfig, SweepTuple};

/// `(originIdx, destIdx, windowIdx, tripLenIdx)` per §4.2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SweepCursor {
    pub origin_idx: i64,
    pub dest_idx: i64,
    pub window_idx: i64,
    pub trip_len_idx: i64,
}

impl SweepCursor {
    pub fn reset() -> Self {
        Self::default()
    }

    /// Resolves the cursor to a concrete tuple given the current config, or
    /// `None` if the cursor has walked past the end of the cross-product.
    pub fn resolve(&self, config: &SweepConfig) -> Option<SweepTuple> {
        let origins = config.resolved_origins();
        let destinations = config.resolved_destinations();
        if origins.is_empty() || destinations.is_empty() || config.trip_lengths.is_empty() {
            return None;
        }
        let origin = origins.get(self.origin_idx as usize)?;
        let destination = destinations.get(self.dest_idx as usize)?;
        let trip_length = *config.trip_lengths.get(self.trip_len_idx as usize)?;
        if self.window_idx >= config.window_count() {
            return None;
        }
        let departure_date = (chrono::Utc::now().date_naive()
            + chrono::Duration::days(self.window_idx * config.window_days_step))
        .to_string();
        Some(SweepTuple {
            origin: origin.clone(),
            destination: destination.clone(),
            window_idx: self.window_idx,
            departure_date,
            trip_length_days: trip_length,
        })
    }

    /// Advances to the next tuple in row-major (origin, dest, window, trip-length) order.
    /// Returns `true` if the cursor wrapped back to the start of the cross-product.
    pub fn advance(&mut self, config: &SweepConfig) -> bool {
        let origins = config.resolved_origins().len().max(1) as i64;
        let destinations = config.resolved_destinations().len().max(1) as i64;
        let windows = config.window_count();
        let trip_lengths = config.trip_lengths.len().max(1) as i64;

        self.trip_len_idx += 1;
        if self.trip_len_idx >= trip_lengths {
            self.trip_len_idx = 0;
            self.window_idx += 1;
            if self.window_idx >= windows {
                self.window_idx = 0;
                self.dest_idx += 1;
                if self.dest_idx >= destinations {
                    self.dest_idx = 0;
                    self.origin_idx += 1;
                    if self.origin_idx >= origins {
                        self.origin_idx = 0;
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Abandons the current (origin, destination) pair and advances to the
    /// next destination, used by the Skip transition.
    pub fn skip_pair(&mut self, config: &SweepConfig) {
        self.window_idx = 0;
        self.trip_len_idx = 0;
        let destinations = config.resolved_destinations().len().max(1) as i64;
        self.dest_idx += 1;
        if self.dest_idx >= destinations {
            self.dest_idx = 0;
            let origins = config.resolved_origins().len().max(1) as i64;
            self.origin_idx = (self.origin_idx + 1) % origins;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SweepConfig {
        SweepConfig {
            origins: vec!["JFK".into(), "LAX".into()],
            destinations: vec!["LHR".into()],
            excluded_origins: vec![],
            excluded_destinations: vec![],
            trip_lengths: vec![7, 14],
            window_days_ahead: 60,
            window_days_step: 30,
            rate_limit_millis: 0,
            max_concurrent_probes: 1,
            cabin: "economy".into(),
            stops: None,
            travelers: 1,
            currency: "USD".into(),
            excluded_airlines: vec![],
        }
    }

    #[test]
    fn full_cross_product_is_covered_exactly_once_per_pass() {
        let config = config();
        let mut cursor = SweepCursor::reset();
        let mut seen = std::collections::HashSet::new();
        loop {
            let tuple = cursor.resolve(&config).expect("tuple within bounds");
            let key = (tuple.origin.clone(), tuple.destination.clone(), tuple.window_idx, tuple.trip_length_days);
            assert!(seen.insert(key), "tuple emitted twice before wraparound");
            if cursor.advance(&config) {
                break;
            }
        }
        // 2 origins * 1 destination * 2 windows * 2 trip lengths
        assert_eq!(seen.len(), 2 * 1 * 2 * 2);
    }

    #[test]
    fn skip_pair_abandons_remaining_windows_and_trip_lengths() {
        let config = config();
        let mut cursor = SweepCursor { origin_idx: 0, dest_idx: 0, window_idx: 1, trip_len_idx: 1 };
        cursor.skip_pair(&config);
        assert_eq!(cursor.window_idx, 0);
        assert_eq!(cursor.trip_len_idx, 0);
        assert_eq!(cursor.origin_idx, 1);
    }
}
