//! Utility to inspect the destination table and print its structure.

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;

use wb_loans_pipeline::config::{is_valid_table_name, DEFAULT_LOANS_TABLE};
use wb_loans_pipeline::loader::count_rows;
use wb_loans_pipeline::schema_manager::catalog_name;

/// Main entry point for the table inspection utility.
///
/// Connects to the database and lists the columns and row count of the
/// loans table named by `LOANS_TABLE`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("DB_URL"))
        .map_err(|_| "DATABASE_URL must be set")?;
    let table = env::var("LOANS_TABLE").unwrap_or_else(|_| DEFAULT_LOANS_TABLE.to_string());
    if !is_valid_table_name(&table) {
        return Err(format!("invalid LOANS_TABLE '{}'", table).into());
    }

    let pool = PgPoolOptions::new().connect(&database_url).await?;

    let (schema, name) = catalog_name(&table);

    let columns: Vec<(String, String, Option<i32>)> = sqlx::query_as(
        "SELECT column_name::text, data_type::text, character_maximum_length::int4
         FROM information_schema.columns
         WHERE table_schema = $1 AND table_name = $2
         ORDER BY ordinal_position",
    )
    .bind(&schema)
    .bind(&name)
    .fetch_all(&pool)
    .await?;

    if columns.is_empty() {
        println!("Table {} does not exist", table);
        return Ok(());
    }

    println!("{}:", table);
    for (col, type_, max_len) in columns {
        match max_len {
            Some(len) => println!("  - {}: {}({})", col, type_, len),
            None => println!("  - {}: {}", col, type_),
        }
    }

    let rows = count_rows(&pool, &table).await?;
    println!("  {} rows", rows);

    Ok(())
}
