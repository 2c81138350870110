//! SearchQuery + FlightOffer + FlightSegment persistence (§3).

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::db::context::DbContext;
use crate::db::models::{FlightOffer, FlightSegment, SearchQuery};
use crate::error::Result;

pub struct SearchQueryOps<'a> {
    ctx: &'a DbContext,
}

/// A parsed offer ready for insertion, paired with its segments.
pub struct OfferInsert {
    pub price: f64,
    pub currency: String,
    pub total_duration_minutes: Option<i32>,
    pub segments: Vec<SegmentInsert>,
}

pub struct SegmentInsert {
    pub origin_airport: String,
    pub destination_airport: String,
    pub airline_code: String,
    pub flight_number: Option<String>,
    pub departure_at: chrono::DateTime<Utc>,
    pub arrival_at: chrono::DateTime<Utc>,
}

impl<'a> SearchQueryOps<'a> {
    pub fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Inserts the query and all of its offers/segments transactionally.
    pub async fn insert_with_offers(
        &self,
        origin: &str,
        destination: &str,
        departure_date: NaiveDate,
        return_date: Option<NaiveDate>,
        trip_length_days: Option<i32>,
        cabin: &str,
        travelers: i32,
        currency: &str,
        offers: &[OfferInsert],
    ) -> Result<(Uuid, Vec<Uuid>)> {
        let mut tx = self.ctx.pool().begin().await?;
        let query_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO search_queries
                (id, origin, destination, departure_date, return_date, trip_length_days, cabin, travelers, currency, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            "#,
        )
        .bind(query_id)
        .bind(origin)
        .bind(destination)
        .bind(departure_date)
        .bind(return_date)
        .bind(trip_length_days)
        .bind(cabin)
        .bind(travelers)
        .bind(currency)
        .execute(&mut *tx)
        .await?;

        let mut offer_ids = Vec::with_capacity(offers.len());
        for offer in offers {
            let offer_id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO flight_offers (id, search_query_id, price, currency, total_duration_minutes, created_at)
                VALUES ($1, $2, $3, $4, $5, now())
                "#,
            )
            .bind(offer_id)
            .bind(query_id)
            .bind(offer.price)
            .bind(&offer.currency)
            .bind(offer.total_duration_minutes)
            .execute(&mut *tx)
            .await?;

            for segment in &offer.segments {
                sqlx::query(
                    r#"
                    INSERT INTO flight_segments
                        (id, offer_id, origin_airport, destination_airport, airline_code, flight_number, departure_at, arrival_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(offer_id)
                .bind(&segment.origin_airport)
                .bind(&segment.destination_airport)
                .bind(&segment.airline_code)
                .bind(&segment.flight_number)
                .bind(segment.departure_at)
                .bind(segment.arrival_at)
                .execute(&mut *tx)
                .await?;
            }
            offer_ids.push(offer_id);
        }

        tx.commit().await?;
        Ok((query_id, offer_ids))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<SearchQuery>> {
        let row = sqlx::query_as::<_, SearchQuery>("SELECT * FROM search_queries WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await?;
        Ok(row)
    }

    pub async fn get_offers(&self, search_query_id: Uuid) -> Result<Vec<FlightOffer>> {
        let rows = sqlx::query_as::<_, FlightOffer>(
            "SELECT * FROM flight_offers WHERE search_query_id = $1 ORDER BY price ASC",
        )
        .bind(search_query_id)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    pub async fn get_segments(&self, offer_id: Uuid) -> Result<Vec<FlightSegment>> {
        let rows = sqlx::query_as::<_, FlightSegment>(
            "SELECT * FROM flight_segments WHERE offer_id = $1 ORDER BY departure_at ASC",
        )
        .bind(offer_id)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::events::EventBuffer;

    fn ctx(pool: sqlx::PgPool) -> DbContext {
        DbContext::new(pool, Arc::new(EventBuffer::new(64)))
    }

    #[sqlx::test]
    async fn insert_with_offers_round_trips_query_offers_and_segments(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let departure = NaiveDate::from_ymd_opt(2026, 5, 10).unwrap();
        let now = Utc::now();

        let offers = vec![OfferInsert {
            price: 512.0,
            currency: "USD".to_string(),
            total_duration_minutes: Some(420),
            segments: vec![SegmentInsert {
                origin_airport: "JFK".to_string(),
                destination_airport: "LHR".to_string(),
                airline_code: "AA".to_string(),
                flight_number: Some("100".to_string()),
                departure_at: now,
                arrival_at: now + chrono::Duration::hours(7),
            }],
        }];

        let (query_id, offer_ids) = ctx
            .search_queries()
            .insert_with_offers("JFK", "LHR", departure, None, Some(7), "economy", 1, "USD", &offers)
            .await
            .unwrap();
        assert_eq!(offer_ids.len(), 1);

        let query = ctx.search_queries().get(query_id).await.unwrap().unwrap();
        assert_eq!(query.origin, "JFK");
        assert_eq!(query.destination, "LHR");

        let fetched_offers = ctx.search_queries().get_offers(query_id).await.unwrap();
        assert_eq!(fetched_offers.len(), 1);
        assert_eq!(fetched_offers[0].price, 512.0);

        let segments = ctx.search_queries().get_segments(fetched_offers[0].id).await.unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].airline_code, "AA");
    }

    #[sqlx::test]
    async fn get_offers_orders_by_price_ascending(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let departure = NaiveDate::from_ymd_opt(2026, 5, 10).unwrap();
        let offers = vec![
            OfferInsert {
                price: 900.0,
                currency: "USD".to_string(),
                total_duration_minutes: None,
                segments: vec![],
            },
            OfferInsert {
                price: 450.0,
                currency: "USD".to_string(),
                total_duration_minutes: None,
                segments: vec![],
            },
        ];

        let (query_id, _) = ctx
            .search_queries()
            .insert_with_offers("SFO", "NRT", departure, None, None, "economy", 1, "USD", &offers)
            .await
            .unwrap();

        let fetched = ctx.search_queries().get_offers(query_id).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].price, 450.0);
        assert_eq!(fetched[1].price, 900.0);
    }
}
