//! Tolerant parser for the oracle's semi-structured offer payloads (§4.3).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

const MAX_SAMPLES: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedSegment {
    pub origin_airport: String,
    pub destination_airport: String,
    pub airline_code: String,
    pub flight_number: Option<String>,
    pub departure_at: DateTime<Utc>,
    pub arrival_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedOffer {
    pub price: f64,
    pub currency: String,
    pub total_duration_minutes: Option<i32>,
    pub segments: Vec<ParsedSegment>,
}

/// A redacted fingerprint of a row that failed to parse: a hash and length,
/// never the raw payload (§4.3 "never raw payload").
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RedactedSample {
    pub fingerprint: String,
    pub length: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ParseErrors {
    pub raw_offers_seen: u64,
    pub unmarshal_failures: u64,
    pub date_parse_failures: u64,
    pub zero_price_rows: u64,
    pub empty_sections: u64,
    pub samples: Vec<RedactedSample>,
}

impl ParseErrors {
    fn record_sample(&mut self, raw: &Value) {
        if self.samples.len() >= MAX_SAMPLES {
            return;
        }
        let raw_str = raw.to_string();
        let mut hasher = DefaultHasher::new();
        raw_str.hash(&mut hasher);
        self.samples.push(RedactedSample {
            fingerprint: format!("{:016x}", hasher.finish()),
            length: raw_str.len(),
        });
    }
}

/// Parses an oracle response body into best-effort offers plus a diagnostics
/// record. Never fails outright: a malformed body yields zero offers and a
/// `ParseErrors` describing what went wrong.
pub fn parse_offers(body: &str) -> (Vec<ParsedOffer>, ParseErrors) {
    let mut diagnostics = ParseErrors::default();

    let root: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => {
            diagnostics.unmarshal_failures += 1;
            return (Vec::new(), diagnostics);
        }
    };

    let raw_offers = match root.get("offers").and_then(Value::as_array) {
        Some(arr) if !arr.is_empty() => arr.clone(),
        Some(_) => {
            diagnostics.empty_sections += 1;
            return (Vec::new(), diagnostics);
        }
        None => {
            diagnostics.empty_sections += 1;
            return (Vec::new(), diagnostics);
        }
    };

    diagnostics.raw_offers_seen = raw_offers.len() as u64;
    let mut offers = Vec::new();

    for raw in &raw_offers {
        match parse_one_offer(raw, &mut diagnostics) {
            Some(offer) => offers.push(offer),
            None => diagnostics.record_sample(raw),
        }
    }

    (offers, diagnostics)
}

fn parse_one_offer(raw: &Value, diagnostics: &mut ParseErrors) -> Option<ParsedOffer> {
    let price = raw.get("price").and_then(Value::as_f64)?;
    if price <= 0.0 {
        diagnostics.zero_price_rows += 1;
        return None;
    }
    let currency = raw
        .get("currency")
        .and_then(Value::as_str)
        .unwrap_or("USD")
        .to_string();
    let total_duration_minutes = raw
        .get("totalDurationMinutes")
        .and_then(Value::as_i64)
        .map(|v| v as i32);

    let raw_segments = raw
        .get("segments")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if raw_segments.is_empty() {
        diagnostics.empty_sections += 1;
    }

    let mut segments = Vec::new();
    for raw_segment in &raw_segments {
        match parse_one_segment(raw_segment) {
            Some(segment) => segments.push(segment),
            None => {
                diagnostics.date_parse_failures += 1;
                return None;
            }
        }
    }

    Some(ParsedOffer {
        price,
        currency,
        total_duration_minutes,
        segments,
    })
}

fn parse_one_segment(raw: &Value) -> Option<ParsedSegment> {
    let origin_airport = raw.get("originAirport")?.as_str()?.to_string();
    let destination_airport = raw.get("destinationAirport")?.as_str()?.to_string();
    let airline_code = raw.get("airlineCode")?.as_str()?.to_string();
    let flight_number = raw
        .get("flightNumber")
        .and_then(Value::as_str)
        .map(str::to_string);
    let departure_at = raw
        .get("departureAt")?
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))?;
    let arrival_at = raw
        .get("arrivalAt")?
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))?;

    Some(ParsedSegment {
        origin_airport,
        destination_airport,
        airline_code,
        flight_number,
        departure_at,
        arrival_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_offer(price: f64) -> Value {
        serde_json::json!({
            "price": price,
            "currency": "USD",
            "totalDurationMinutes": 360,
            "segments": [{
                "originAirport": "JFK",
                "destinationAirport": "LHR",
                "airlineCode": "AA",
                "flightNumber": "100",
                "departureAt": "2026-03-01T10:00:00Z",
                "arrivalAt": "2026-03-01T22:00:00Z",
            }]
        })
    }

    #[test]
    fn parses_well_formed_offers() {
        let body = serde_json::json!({ "offers": [good_offer(450.0), good_offer(500.0)] }).to_string();
        let (offers, diagnostics) = parse_offers(&body);
        assert_eq!(offers.len(), 2);
        assert_eq!(diagnostics.raw_offers_seen, 2);
        assert_eq!(diagnostics.date_parse_failures, 0);
    }

    #[test]
    fn one_malformed_date_out_of_ten_yields_nine_offers_and_one_diagnostic() {
        let mut raw = (0..9).map(|_| good_offer(400.0)).collect::<Vec<_>>();
        let mut bad = good_offer(400.0);
        bad["segments"][0]["departureAt"] = serde_json::json!("not-a-date");
        raw.push(bad);

        let body = serde_json::json!({ "offers": raw }).to_string();
        let (offers, diagnostics) = parse_offers(&body);

        assert_eq!(offers.len(), 9);
        assert_eq!(diagnostics.date_parse_failures, 1);
        assert_eq!(diagnostics.samples.len(), 1);
    }

    #[test]
    fn zero_price_row_is_dropped_and_counted() {
        let body = serde_json::json!({ "offers": [good_offer(0.0), good_offer(300.0)] }).to_string();
        let (offers, diagnostics) = parse_offers(&body);
        assert_eq!(offers.len(), 1);
        assert_eq!(diagnostics.zero_price_rows, 1);
    }

    #[test]
    fn unparseable_body_yields_unmarshal_failure() {
        let (offers, diagnostics) = parse_offers("not json");
        assert!(offers.is_empty());
        assert_eq!(diagnostics.unmarshal_failures, 1);
    }
}
