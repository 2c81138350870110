//! BulkSearch persistence and rollup (§3).

use uuid::Uuid;

use crate::db::context::DbContext;
use crate::db::models::BulkSearch;
use crate::error::Result;

pub struct BulkSearchOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> BulkSearchOps<'a> {
    pub fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, total_searches: i32) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO bulk_searches (id, status, total_searches, completed_count, created_at)
            VALUES ($1, 'pending', $2, 0, now())
            "#,
        )
        .bind(id)
        .bind(total_searches)
        .execute(self.ctx.pool())
        .await?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<BulkSearch>> {
        let row = sqlx::query_as::<_, BulkSearch>("SELECT * FROM bulk_searches WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await?;
        Ok(row)
    }

    /// Atomically records one completed leg and rolls min/max/avg price up,
    /// marking the bulk search `completed` once `completed_count` reaches
    /// `total_searches`.
    pub async fn record_completion(&self, id: Uuid, price: f64) -> Result<BulkSearch> {
        let row = sqlx::query_as::<_, BulkSearch>(
            r#"
            UPDATE bulk_searches SET
                completed_count = completed_count + 1,
                min_price = LEAST(COALESCE(min_price, $2), $2),
                max_price = GREATEST(COALESCE(max_price, $2), $2),
                avg_price = (COALESCE(avg_price, 0) * completed_count + $2) / (completed_count + 1),
                status = CASE WHEN completed_count + 1 >= total_searches THEN 'completed' ELSE status END,
                completed_at = CASE WHEN completed_count + 1 >= total_searches THEN now() ELSE completed_at END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(price)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::context::DbContext;
    use crate::events::EventBuffer;

    fn ctx(pool: sqlx::PgPool) -> DbContext {
        DbContext::new(pool, Arc::new(EventBuffer::new(64)))
    }

    #[sqlx::test]
    async fn record_completion_rolls_up_min_max_avg_and_flips_status(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let id = ctx.bulk_searches().create(3).await.unwrap();

        let after_first = ctx.bulk_searches().record_completion(id, 500.0).await.unwrap();
        assert_eq!(after_first.completed_count, 1);
        assert_eq!(after_first.min_price, Some(500.0));
        assert_eq!(after_first.max_price, Some(500.0));
        assert_eq!(after_first.avg_price, Some(500.0));
        assert_eq!(after_first.status, "pending");

        let after_second = ctx.bulk_searches().record_completion(id, 300.0).await.unwrap();
        assert_eq!(after_second.completed_count, 2);
        assert_eq!(after_second.min_price, Some(300.0));
        assert_eq!(after_second.max_price, Some(500.0));
        assert_eq!(after_second.avg_price, Some(400.0));
        assert_eq!(after_second.status, "pending");

        let after_third = ctx.bulk_searches().record_completion(id, 700.0).await.unwrap();
        assert_eq!(after_third.completed_count, 3);
        assert_eq!(after_third.min_price, Some(300.0));
        assert_eq!(after_third.max_price, Some(700.0));
        assert_eq!(after_third.status, "completed");
        assert!(after_third.completed_at.is_some());
    }

    #[sqlx::test]
    async fn get_returns_none_for_unknown_id(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let found = ctx.bulk_searches().get(Uuid::new_v4()).await.unwrap();
        assert!(found.is_none());
    }
}
