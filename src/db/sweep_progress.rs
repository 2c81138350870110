//! Persisted continuous-sweep cursor and config-shape checksum (§4.2).

use serde_json::json;

use crate::db::context::DbContext;
use crate::db::models::ContinuousSweepProgressRow;
use crate::error::Result;
use crate::sweep::{SweepConfig, SweepCursor};

/// Singleton row id; the continuous sweep has exactly one progress record.
const SINGLETON_ID: i32 = 1;

pub struct SweepProgressOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> SweepProgressOps<'a> {
    pub fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    pub async fn load(&self) -> Result<Option<ContinuousSweepProgressRow>> {
        let row = sqlx::query_as::<_, ContinuousSweepProgressRow>(
            "SELECT * FROM continuous_sweep_progress WHERE id = $1",
        )
        .bind(SINGLETON_ID)
        .fetch_optional(self.ctx.pool())
        .await?;
        Ok(row)
    }

    /// Persists the cursor position only, leaving run/pause flags and config
    /// snapshot untouched. Called on every `tick()`.
    pub async fn save_cursor(&self, cursor: &SweepCursor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO continuous_sweep_progress (id, origin_idx, dest_idx, window_idx, trip_len_idx, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (id) DO UPDATE SET
                origin_idx = EXCLUDED.origin_idx,
                dest_idx = EXCLUDED.dest_idx,
                window_idx = EXCLUDED.window_idx,
                trip_len_idx = EXCLUDED.trip_len_idx,
                updated_at = now()
            "#,
        )
        .bind(SINGLETON_ID)
        .bind(cursor.origin_idx)
        .bind(cursor.dest_idx)
        .bind(cursor.window_idx)
        .bind(cursor.trip_len_idx)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    /// Persists run-state flags and the config snapshot/checksum, used on
    /// start/pause/resume/stop/config-update transitions.
    pub async fn save_state(
        &self,
        is_running: bool,
        is_paused: bool,
        skip_requested: bool,
        config: &SweepConfig,
    ) -> Result<()> {
        let snapshot = json!(config);
        let checksum = config.shape_checksum() as i64;
        sqlx::query(
            r#"
            INSERT INTO continuous_sweep_progress
                (id, origin_idx, dest_idx, window_idx, trip_len_idx,
                 is_running, is_paused, skip_requested, config_snapshot, shape_checksum, updated_at)
            VALUES ($1, 0, 0, 0, 0, $2, $3, $4, $5, $6, now())
            ON CONFLICT (id) DO UPDATE SET
                is_running = EXCLUDED.is_running,
                is_paused = EXCLUDED.is_paused,
                skip_requested = EXCLUDED.skip_requested,
                config_snapshot = EXCLUDED.config_snapshot,
                shape_checksum = EXCLUDED.shape_checksum,
                updated_at = now()
            "#,
        )
        .bind(SINGLETON_ID)
        .bind(is_running)
        .bind(is_paused)
        .bind(skip_requested)
        .bind(snapshot)
        .bind(checksum)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    /// On leader takeover: loads the persisted row and tells the caller
    /// whether the cross-product shape still matches the current config, so
    /// the cursor can be trusted as-is or must reset to the origin.
    pub async fn load_for_takeover(
        &self,
        config: &SweepConfig,
    ) -> Result<Option<(SweepCursor, bool)>> {
        let Some(row) = self.load().await? else {
            return Ok(None);
        };
        let shape_matches = row.shape_checksum == config.shape_checksum() as i64;
        let cursor = SweepCursor {
            origin_idx: row.origin_idx,
            dest_idx: row.dest_idx,
            window_idx: row.window_idx,
            trip_len_idx: row.trip_len_idx,
        };
        Ok(Some((cursor, shape_matches)))
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
    async fn save_state_then_load_for_takeover_reports_a_shape_match(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let config = SweepConfig::default();
        let cursor = SweepCursor { origin_idx: 2, dest_idx: 1, window_idx: 0, trip_len_idx: 1 };

        ctx.sweep_progress().save_cursor(&cursor).await.unwrap();
        ctx.sweep_progress().save_state(true, false, false, &config).await.unwrap();

        let (loaded_cursor, shape_matches) = ctx.sweep_progress().load_for_takeover(&config).await.unwrap().unwrap();
        assert!(shape_matches, "checksum written by save_state must match the same config's checksum");
        assert_eq!(loaded_cursor, cursor, "save_state must not clobber a cursor already persisted by save_cursor");
    }

    #[sqlx::test]
    async fn load_for_takeover_reports_a_mismatch_when_the_config_shape_changed(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        let original = SweepConfig::default();
        ctx.sweep_progress().save_state(true, false, false, &original).await.unwrap();

        let mut changed = SweepConfig::default();
        changed.trip_lengths = vec![3];
        let (_, shape_matches) = ctx.sweep_progress().load_for_takeover(&changed).await.unwrap().unwrap();
        assert!(!shape_matches);
    }

    #[sqlx::test]
    async fn load_for_takeover_returns_none_before_any_state_is_persisted(pool: sqlx::PgPool) {
        let ctx = ctx(pool);
        assert!(ctx.sweep_progress().load_for_takeover(&SweepConfig::default()).await.unwrap().is_none());
    }
}
