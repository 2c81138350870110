//! ScheduledJob + JobDetails CRUD (§3).

use uuid::Uuid;

use crate::db::context::DbContext;
use crate::db::models::{JobDetails, ScheduledJob};
use crate::error::Result;

pub struct ScheduledJobOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> ScheduledJobOps<'a> {
    pub fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, name: &str, cron_expression: &str, details: &JobDetails) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let mut tx = self.ctx.pool().begin().await?;
        sqlx::query(
            "INSERT INTO scheduled_jobs (id, name, cron_expression, enabled, last_run_at) VALUES ($1, $2, $3, true, NULL)",
        )
        .bind(id)
        .bind(name)
        .bind(cron_expression)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO job_details
                (scheduled_job_id, origins, destinations, date_window_start, date_window_end, trip_length_days, travelers, cabin, stops, currency)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(id)
        .bind(&details.origins)
        .bind(&details.destinations)
        .bind(details.date_window_start)
        .bind(details.date_window_end)
        .bind(details.trip_length_days)
        .bind(details.travelers)
        .bind(&details.cabin)
        .bind(details.stops)
        .bind(&details.currency)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ScheduledJob>> {
        let row = sqlx::query_as::<_, ScheduledJob>("SELECT * FROM scheduled_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await?;
        Ok(row)
    }

    pub async fn get_details(&self, scheduled_job_id: Uuid) -> Result<Option<JobDetails>> {
        let row = sqlx::query_as::<_, JobDetails>(
            "SELECT * FROM job_details WHERE scheduled_job_id = $1",
        )
        .bind(scheduled_job_id)
        .fetch_optional(self.ctx.pool())
        .await?;
        Ok(row)
    }

    pub async fn list_enabled(&self) -> Result<Vec<ScheduledJob>> {
        let rows = sqlx::query_as::<_, ScheduledJob>(
            "SELECT * FROM scheduled_jobs WHERE enabled = true ORDER BY name",
        )
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    pub async fn mark_run(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE scheduled_jobs SET last_run_at = now() WHERE id = $1")
            .bind(id)
            .execute(self.ctx.pool())
            .await?;
        Ok(())
    }

    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE scheduled_jobs SET enabled = $2 WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(self.ctx.pool())
            .await?;
        Ok(())
    }

    /// Deletes the schedule; `job_details` cascades via its FK.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM scheduled_jobs WHERE id = $1")
            .bind(id)
            .execute(self.ctx.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;
    use crate::events::EventBuffer;

    fn ctx(pool: sqlx::PgPool) -> DbContext {
        DbContext::new(pool, Arc::new(EventBuffer::new(64)))
    }

    fn details() -> JobDetails {
        JobDetails {
            scheduled_job_id: Uuid::nil(),
            origins: json!(["JFK"]),
            destinations: json!(["LHR"]),
            date_window_start: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            date_window_end: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            trip_length_days: 7,
            travelers: 1,
            cabin: "economy".to_string(),
            stops: Some(0),
            currency: "USD".to_string(),
        }
    }

    #[sqlx::test]
    async fn create_persists_job_and_its_details(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let id = ctx.scheduled_jobs().create("transatlantic watch", "0 6 * * *", &details()).await.unwrap();

        let job = ctx.scheduled_jobs().get(id).await.unwrap().unwrap();
        assert_eq!(job.name, "transatlantic watch");
        assert!(job.enabled);
        assert!(job.last_run_at.is_none());

        let stored_details = ctx.scheduled_jobs().get_details(id).await.unwrap().unwrap();
        assert_eq!(stored_details.cabin, "economy");
        assert_eq!(stored_details.trip_length_days, 7);
    }

    #[sqlx::test]
    async fn list_enabled_excludes_disabled_jobs(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let enabled_id = ctx.scheduled_jobs().create("enabled job", "0 * * * *", &details()).await.unwrap();
        let disabled_id = ctx.scheduled_jobs().create("disabled job", "0 * * * *", &details()).await.unwrap();
        ctx.scheduled_jobs().set_enabled(disabled_id, false).await.unwrap();

        let enabled = ctx.scheduled_jobs().list_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, enabled_id);
    }

    #[sqlx::test]
    async fn mark_run_sets_last_run_at(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let id = ctx.scheduled_jobs().create("watch", "0 * * * *", &details()).await.unwrap();
        ctx.scheduled_jobs().mark_run(id).await.unwrap();
        let job = ctx.scheduled_jobs().get(id).await.unwrap().unwrap();
        assert!(job.last_run_at.is_some());
    }

    #[sqlx::test]
    async fn delete_cascades_to_job_details(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let id = ctx.scheduled_jobs().create("watch", "0 * * * *", &details()).await.unwrap();
        ctx.scheduled_jobs().delete(id).await.unwrap();

        assert!(ctx.scheduled_jobs().get(id).await.unwrap().is_none());
        assert!(ctx.scheduled_jobs().get_details(id).await.unwrap().is_none());
    }
}
