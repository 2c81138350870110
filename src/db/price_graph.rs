//! PriceGraphSweep + PriceGraphResult persistence (§3).

use chrono::NaiveDate;
use uuid::Uuid;

use crate::db::context::DbContext;
use crate::db::models::{PriceGraphResult, PriceGraphSweep};
use crate::error::Result;

pub struct PriceGraphOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> PriceGraphOps<'a> {
    pub fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    pub async fn create_sweep(&self, total: i32) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO price_graph_sweeps (id, status, total, completed, created_at) VALUES ($1, 'pending', $2, 0, now())",
        )
        .bind(id)
        .bind(total)
        .execute(self.ctx.pool())
        .await?;
        Ok(id)
    }

    pub async fn get_sweep(&self, id: Uuid) -> Result<Option<PriceGraphSweep>> {
        let row = sqlx::query_as::<_, PriceGraphSweep>(
            "SELECT * FROM price_graph_sweeps WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.ctx.pool())
        .await?;
        Ok(row)
    }

    pub async fn record_result(
        &self,
        sweep_id: Uuid,
        origin: &str,
        destination: &str,
        departure_date: NaiveDate,
        return_date: Option<NaiveDate>,
        trip_length_days: i32,
        price: f64,
    ) -> Result<()> {
        let mut tx = self.ctx.pool().begin().await?;
        sqlx::query(
            r#"
            INSERT INTO price_graph_results
                (id, sweep_id, origin, destination, departure_date, return_date, trip_length_days, price, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(sweep_id)
        .bind(origin)
        .bind(destination)
        .bind(departure_date)
        .bind(return_date)
        .bind(trip_length_days)
        .bind(price)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE price_graph_sweeps SET
                completed = completed + 1,
                status = CASE WHEN completed + 1 >= total THEN 'completed' ELSE status END
            WHERE id = $1
            "#,
        )
        .bind(sweep_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_results(&self, sweep_id: Uuid) -> Result<Vec<PriceGraphResult>> {
        let rows = sqlx::query_as::<_, PriceGraphResult>(
            "SELECT * FROM price_graph_results WHERE sweep_id = $1 ORDER BY price ASC",
        )
        .bind(sweep_id)
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
    async fn record_result_flips_sweep_to_completed_once_total_is_reached(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let sweep_id = ctx.price_graph().create_sweep(2).await.unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();

        ctx.price_graph()
            .record_result(sweep_id, "JFK", "LHR", date, None, 7, 500.0)
            .await
            .unwrap();
        let mid = ctx.price_graph().get_sweep(sweep_id).await.unwrap().unwrap();
        assert_eq!(mid.completed, 1);
        assert_eq!(mid.status, "pending");

        ctx.price_graph()
            .record_result(sweep_id, "JFK", "LHR", date, Some(date), 7, 420.0)
            .await
            .unwrap();
        let done = ctx.price_graph().get_sweep(sweep_id).await.unwrap().unwrap();
        assert_eq!(done.completed, 2);
        assert_eq!(done.status, "completed");

        let results = ctx.price_graph().list_results(sweep_id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].price, 420.0, "list_results orders by price ascending");
    }
}
