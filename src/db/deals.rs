//! Deal persistence, baseline lookups, and staleness expiry (§4.3).

use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::db::context::DbContext;
use crate::db::models::Deal;
use crate::error::Result;
use crate::events::{DealEvent, DomainEvent};

pub struct DealOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> DealOps<'a> {
    pub fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Inserts a newly discovered deal, or updates an existing open deal for
    /// the same (origin, destination, departure_date, airline) when the new
    /// price is at or below the one on record, per §4.3.
    pub async fn upsert(
        &self,
        origin: &str,
        destination: &str,
        departure_date: NaiveDate,
        airline_code: &str,
        price: f64,
        baseline_min: f64,
        baseline_avg: f64,
        discount_pct: f64,
        classification: &str,
        score: f64,
        cost_per_mile: Option<f64>,
    ) -> Result<Deal> {
        let existing = sqlx::query_as::<_, Deal>(
            r#"
            SELECT * FROM deals
            WHERE origin = $1 AND destination = $2 AND departure_date = $3
                AND airline_code = $4 AND status = 'open'
            "#,
        )
        .bind(origin)
        .bind(destination)
        .bind(departure_date)
        .bind(airline_code)
        .fetch_optional(self.ctx.pool())
        .await?;

        let deal = if let Some(existing) = existing {
            if price <= existing.price {
                sqlx::query_as::<_, Deal>(
                    r#"
                    UPDATE deals SET
                        price = $2, baseline_min = $3, baseline_avg = $4,
                        discount_pct = $5, classification = $6, score = $7,
                        cost_per_mile = $8, last_seen_at = now()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(existing.id)
                .bind(price)
                .bind(baseline_min)
                .bind(baseline_avg)
                .bind(discount_pct)
                .bind(classification)
                .bind(score)
                .bind(cost_per_mile)
                .fetch_one(self.ctx.pool())
                .await?
            } else {
                sqlx::query_as::<_, Deal>(
                    "UPDATE deals SET last_seen_at = now() WHERE id = $1 RETURNING *",
                )
                .bind(existing.id)
                .fetch_one(self.ctx.pool())
                .await?
            }
        } else {
            sqlx::query_as::<_, Deal>(
                r#"
                INSERT INTO deals
                    (id, origin, destination, departure_date, airline_code, price,
                     baseline_min, baseline_avg, discount_pct, classification, score,
                     cost_per_mile, status, first_seen_at, last_seen_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'open', now(), now())
                RETURNING *
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(origin)
            .bind(destination)
            .bind(departure_date)
            .bind(airline_code)
            .bind(price)
            .bind(baseline_min)
            .bind(baseline_avg)
            .bind(discount_pct)
            .bind(classification)
            .bind(score)
            .bind(cost_per_mile)
            .fetch_one(self.ctx.pool())
            .await?
        };

        self.ctx.events().publish(DomainEvent::Deal(DealEvent::Detected {
            origin: deal.origin.clone(),
            destination: deal.destination.clone(),
            departure_date: deal.departure_date.to_string(),
            classification: deal.classification.clone(),
            score: deal.score,
        }));

        Ok(deal)
    }

    pub async fn list_open(&self, limit: i64) -> Result<Vec<Deal>> {
        let rows = sqlx::query_as::<_, Deal>(
            "SELECT * FROM deals WHERE status = 'open' ORDER BY score DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// Marks deals untouched for longer than `expire_days` as `expired`.
    pub async fn expire_stale(&self, expire_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(expire_days);
        let result = sqlx::query(
            "UPDATE deals SET status = 'expired' WHERE status = 'open' AND last_seen_at < $1",
        )
        .bind(cutoff)
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected())
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
    async fn upsert_inserts_new_open_deal(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let deal = ctx
            .deals()
            .upsert("JFK", "LHR", date, "AA", 450.0, 500.0, 600.0, 25.0, "great", 80.0, Some(0.12))
            .await
            .unwrap();
        assert_eq!(deal.price, 450.0);
        assert_eq!(deal.status, "open");

        let open = ctx.deals().list_open(10).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, deal.id);
    }

    #[sqlx::test]
    async fn upsert_updates_price_when_cheaper_but_not_when_costlier(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let first = ctx
            .deals()
            .upsert("JFK", "LHR", date, "AA", 450.0, 500.0, 600.0, 25.0, "great", 80.0, None)
            .await
            .unwrap();

        let costlier = ctx
            .deals()
            .upsert("JFK", "LHR", date, "AA", 470.0, 500.0, 600.0, 22.0, "good", 60.0, None)
            .await
            .unwrap();
        assert_eq!(costlier.price, 450.0, "a higher price must not overwrite the recorded one");
        assert_eq!(costlier.id, first.id);

        let cheaper = ctx
            .deals()
            .upsert("JFK", "LHR", date, "AA", 400.0, 500.0, 600.0, 33.0, "amazing", 90.0, None)
            .await
            .unwrap();
        assert_eq!(cheaper.price, 400.0);
        assert_eq!(cheaper.classification, "amazing");
        assert_eq!(cheaper.id, first.id, "identity key is unchanged, so this updates the same row");

        let open = ctx.deals().list_open(10).await.unwrap();
        assert_eq!(open.len(), 1, "upsert must never produce a second open row for the same identity");
    }

    #[sqlx::test]
    async fn expire_stale_only_touches_open_deals_past_the_cutoff(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let stale = ctx
            .deals()
            .upsert("JFK", "LHR", date, "AA", 450.0, 500.0, 600.0, 25.0, "great", 80.0, None)
            .await
            .unwrap();
        let fresh = ctx
            .deals()
            .upsert("SFO", "NRT", date, "UA", 900.0, 1000.0, 1100.0, 10.0, "good", 40.0, None)
            .await
            .unwrap();

        sqlx::query("UPDATE deals SET last_seen_at = now() - interval '30 days' WHERE id = $1")
            .bind(stale.id)
            .execute(ctx.pool())
            .await
            .unwrap();

        let expired = ctx.deals().expire_stale(14).await.unwrap();
        assert_eq!(expired, 1);

        let open = ctx.deals().list_open(10).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, fresh.id);
    }
}
