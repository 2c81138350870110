//! reqwest-backed `PriceOracle` implementation.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::Result;
use crate::oracle::parser::{ParseErrors, ParsedOffer, parse_offers};
use crate::oracle::{PriceGraphArgs, PriceGraphPoint, PriceOracle, TripArgs};

const MAX_ATTEMPTS: u32 = 5;

/// HTTP client for the external price oracle. Cached process-wide and safe
/// for concurrent use (§5 "the Session to the oracle is safe for concurrent
/// use and cached process-wide").
pub struct OracleClient {
    client: Client,
    base_url: String,
    diagnostics: bool,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl OracleClient {
    pub fn new(base_url: String, timeout: Duration, diagnostics: bool, rpm: u32) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent())
            .tcp_keepalive(Some(Duration::from_secs(60 * 5)))
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .context("failed to build oracle HTTP client")?;
        let quota = Quota::per_minute(NonZeroU32::new(rpm.max(1)).unwrap());
        Ok(Self {
            client,
            base_url,
            diagnostics,
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    /// Retries transient failures (timeouts, 5xx) with exponential backoff up
    /// to `MAX_ATTEMPTS`, per §7(ii). Non-transient failures are returned
    /// immediately. Every attempt, including retries, waits on the shared
    /// rate limiter so a burst of worker tasks can't overrun the oracle.
    async fn get_with_retry(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.rate_limiter.until_ready().await;
            let result = self.client.get(url).query(query).send().await;
            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status().is_server_error() && attempt < MAX_ATTEMPTS => {
                    let delay = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                    warn!(status = %response.status(), attempt, "oracle returned transient error, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Ok(response) => {
                    return Err(anyhow::anyhow!("oracle returned {}", response.status()).into());
                }
                Err(e) if e.is_timeout() && attempt < MAX_ATTEMPTS => {
                    let delay = Duration::from_millis(200 * 2u64.pow(attempt - 1));
                    warn!(attempt, "oracle request timed out, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(anyhow::Error::from(e).context("oracle request failed").into()),
            }
        }
    }
}

#[async_trait]
impl PriceOracle for OracleClient {
    async fn get_offers(&self, args: &TripArgs) -> Result<(Vec<ParsedOffer>, ParseErrors)> {
        let url = format!("{}/offers", self.base_url);
        let query = trip_query(args);
        let response = self.get_with_retry(&url, &query).await?;
        let body = response.text().await.context("failed to read oracle response body")?;
        let (offers, diagnostics) = parse_offers(&body);
        if self.diagnostics {
            debug!(
                raw_offers_seen = diagnostics.raw_offers_seen,
                unmarshal_failures = diagnostics.unmarshal_failures,
                date_parse_failures = diagnostics.date_parse_failures,
                zero_price_rows = diagnostics.zero_price_rows,
                "parsed oracle offers"
            );
        }
        Ok((offers, diagnostics))
    }

    async fn get_price_graph(&self, args: &PriceGraphArgs) -> Result<Vec<PriceGraphPoint>> {
        let url = format!("{}/price-graph", self.base_url);
        let query = vec![
            ("origin", args.origin.clone()),
            ("destination", args.destination.clone()),
            ("windowStart", args.window_start.to_string()),
            ("windowEnd", args.window_end.to_string()),
            ("tripLengthDays", args.trip_length_days.to_string()),
        ];
        let response = self.get_with_retry(&url, &query).await?;
        let points: Vec<PriceGraphPoint> = response
            .json()
            .await
            .context("failed to parse oracle price-graph response")?;
        Ok(points)
    }

    fn serialize_url(&self, args: &TripArgs) -> String {
        let query = trip_query(args);
        let encoded: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        format!("{}/deeplink?{}", self.base_url, encoded.join("&"))
    }
}

fn trip_query(args: &TripArgs) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("origin", args.origin.clone()),
        ("destination", args.destination.clone()),
        ("departureDate", args.departure_date.to_string()),
        ("cabin", args.cabin.clone()),
        ("travelers", args.travelers.to_string()),
        ("currency", args.currency.clone()),
    ];
    if let Some(return_date) = args.return_date {
        query.push(("returnDate", return_date.to_string()));
    }
    if let Some(stops) = args.stops {
        query.push(("stops", stops.to_string()));
    }
    if !args.excluded_airlines.is_empty() {
        query.push(("excludedAirlines", args.excluded_airlines.join(",")));
    }
    query
}

fn user_agent() -> &'static str {
    concat!("farecrawl/", env!("CARGO_PKG_VERSION"))
}
