//! Airport / Airline reference operations.

use crate::db::context::DbContext;
use crate::db::models::{Airline, Airport};
use crate::error::Result;

pub struct AirportOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> AirportOps<'a> {
    pub fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, iata: &str) -> Result<Option<Airport>> {
        let row = sqlx::query_as::<_, Airport>("SELECT * FROM airports WHERE iata = $1")
            .bind(iata)
            .fetch_optional(self.ctx.pool())
            .await?;
        Ok(row)
    }

    pub async fn list(&self) -> Result<Vec<Airport>> {
        let rows = sqlx::query_as::<_, Airport>("SELECT * FROM airports ORDER BY iata")
            .fetch_all(self.ctx.pool())
            .await?;
        Ok(rows)
    }

    /// Upserts a single airport row; IATA codes are immutable once assigned
    /// but name/city/country may be corrected.
    pub async fn upsert(&self, airport: &Airport) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO airports (iata, name, city, country, lat, lon)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (iata) DO UPDATE SET
                name = EXCLUDED.name,
                city = EXCLUDED.city,
                country = EXCLUDED.country,
                lat = EXCLUDED.lat,
                lon = EXCLUDED.lon
            "#,
        )
        .bind(&airport.iata)
        .bind(&airport.name)
        .bind(&airport.city)
        .bind(&airport.country)
        .bind(airport.lat)
        .bind(airport.lon)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    pub async fn get_airline(&self, code: &str) -> Result<Option<Airline>> {
        let row = sqlx::query_as::<_, Airline>("SELECT * FROM airlines WHERE code = $1")
            .bind(code)
            .fetch_optional(self.ctx.pool())
            .await?;
        Ok(row)
    }

    pub async fn upsert_airline(&self, airline: &Airline) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO airlines (code, name, country)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO UPDATE SET name = EXCLUDED.name, country = EXCLUDED.country
            "#,
        )
        .bind(&airline.code)
        .bind(&airline.name)
        .bind(&airline.country)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }
}
