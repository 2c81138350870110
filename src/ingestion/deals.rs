//! Deal classifier (§4.3): baseline computation and score/classification
//! formulas, independent of persistence so the formulas can be unit tested
//! directly.

use crate::config::DealThresholds;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    ErrorFare,
    Amazing,
    Great,
    Good,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::ErrorFare => "error_fare",
            Classification::Amazing => "amazing",
            Classification::Great => "great",
            Classification::Good => "good",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Baseline {
    pub min: f64,
    pub avg: f64,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct DealVerdict {
    pub classification: Classification,
    pub discount_pct: f64,
    pub score: f64,
}

/// Classifies a newly ingested price against its route baseline. Returns
/// `None` when the baseline sample is too small to classify, or when the
/// discount doesn't clear the lowest threshold.
pub fn classify(price: f64, baseline: &Baseline, thresholds: &DealThresholds) -> Option<DealVerdict> {
    if (baseline.count as i64) < thresholds.baseline_min_count {
        return None;
    }
    if baseline.avg <= 0.0 {
        return None;
    }

    let discount_pct = (baseline.avg - price) / baseline.avg * 100.0;

    let classification = if discount_pct >= thresholds.error_fare_pct {
        Classification::ErrorFare
    } else if discount_pct >= thresholds.amazing_pct {
        Classification::Amazing
    } else if discount_pct >= thresholds.great_pct {
        Classification::Great
    } else if discount_pct >= thresholds.good_pct {
        Classification::Good
    } else {
        return None;
    };

    let score = (discount_pct * 1.25 + (baseline.count as f64).ln() * 3.0).clamp(0.0, 100.0);

    Some(DealVerdict {
        classification,
        discount_pct,
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> DealThresholds {
        DealThresholds::default()
    }

    #[test]
    fn twenty_prices_around_500_with_new_price_270_classifies_amazing() {
        let baseline = Baseline {
            min: 450.0,
            avg: 500.0,
            count: 20,
        };
        let verdict = classify(270.0, &baseline, &thresholds()).expect("should classify");
        assert_eq!(verdict.classification, Classification::Amazing);
        assert!((verdict.discount_pct - 46.0).abs() < 1.0);
        assert!(verdict.score >= 60.0 && verdict.score <= 90.0, "score={}", verdict.score);
    }

    #[test]
    fn below_sample_minimum_does_not_classify() {
        let baseline = Baseline { min: 450.0, avg: 500.0, count: 4 };
        assert!(classify(100.0, &baseline, &thresholds()).is_none());
    }

    #[test]
    fn small_discount_below_good_threshold_does_not_classify() {
        let baseline = Baseline { min: 450.0, avg: 500.0, count: 20 };
        assert!(classify(480.0, &baseline, &thresholds()).is_none());
    }

    #[test]
    fn error_fare_threshold_boundary() {
        let baseline = Baseline { min: 450.0, avg: 500.0, count: 20 };
        let verdict = classify(150.0, &baseline, &thresholds()).unwrap();
        assert_eq!(verdict.classification, Classification::ErrorFare);
        assert!(verdict.discount_pct >= 70.0);
    }
}
