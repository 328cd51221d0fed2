use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::errors::{PipelineError, ResultExt};

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, PipelineError> {
        // One connection holds the refresh lock, one runs DDL/COPY, and the
        // three analyzers each take one.
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .context("Failed to connect to the database")?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }
}
