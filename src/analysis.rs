//! Read-only aggregate queries over the loaded loans table.
//!
//! The three analyzers are independent of each other and may run
//! concurrently once the load step has finished.

use serde::Serialize;
use sqlx::PgPool;

use crate::errors::{PipelineError, ResultExt};
use crate::models::{CountryDebt, CountryLoanCount, RegionDebt, Step, StepReport};

/// Loan status that marks a loan as closed, in its cleaned form.
pub const FULLY_PAID_STATUS: &str = "FULLY PAID";

/// Countries returned by the active-loan ranking.
pub const TOP_COUNTRIES: i64 = 10;

pub fn regional_debt_sql(table: &str) -> String {
    format!(
        r#"
        SELECT region, ROUND(SUM(debt_remaining)::numeric, 2)::float8 AS debt_remaining
        FROM {table}
        GROUP BY region
        ORDER BY debt_remaining DESC NULLS LAST
        "#
    )
}

/// Ties within a region are broken by country name so each region yields a
/// single row.
pub fn top_country_per_region_sql(table: &str) -> String {
    format!(
        r#"
        WITH sum_debt AS (
            SELECT region, country, SUM(debt_remaining) AS debt_remaining
            FROM {table}
            GROUP BY region, country
        ),
        ranked_debt AS (
            SELECT region, country,
                   ROUND(debt_remaining::numeric, 2)::float8 AS debt_remaining,
                   ROW_NUMBER() OVER (
                       PARTITION BY region
                       ORDER BY debt_remaining DESC NULLS LAST, country
                   ) AS debt_rank
            FROM sum_debt
        )
        SELECT region, country, debt_remaining
        FROM ranked_debt
        WHERE debt_rank = 1 AND debt_remaining <> 0
        ORDER BY debt_remaining DESC
        "#
    )
}

pub fn active_loans_sql(table: &str) -> String {
    format!(
        r#"
        SELECT country, COUNT(DISTINCT loan_number) AS count_of_loans
        FROM {table}
        WHERE debt_remaining > 0 AND UPPER(loan_status) <> $1
        GROUP BY country
        ORDER BY count_of_loans DESC, country
        LIMIT $2
        "#
    )
}

/// Regional totals of remaining debt, rounded to cents, largest first.
pub async fn regional_debt(pool: &PgPool, table: &str) -> Result<Vec<RegionDebt>, PipelineError> {
    let rows = sqlx::query_as::<_, RegionDebt>(&regional_debt_sql(table))
        .fetch_all(pool)
        .await
        .context("Regional debt query failed")?;
    Ok(rows)
}

/// The country with the most remaining debt in each region, skipping regions
/// whose top country owes nothing.
pub async fn top_country_per_region(
    pool: &PgPool,
    table: &str,
) -> Result<Vec<CountryDebt>, PipelineError> {
    let rows = sqlx::query_as::<_, CountryDebt>(&top_country_per_region_sql(table))
        .fetch_all(pool)
        .await
        .context("Top country per region query failed")?;
    Ok(rows)
}

/// Countries with the most distinct loans that still carry debt and are not
/// fully paid.
pub async fn top_active_loan_countries(
    pool: &PgPool,
    table: &str,
) -> Result<Vec<CountryLoanCount>, PipelineError> {
    let rows = sqlx::query_as::<_, CountryLoanCount>(&active_loans_sql(table))
        .bind(FULLY_PAID_STATUS)
        .bind(TOP_COUNTRIES)
        .fetch_all(pool)
        .await
        .context("Active loans query failed")?;
    Ok(rows)
}

/// Wraps query rows in a step report whose message carries the row-oriented
/// rendering of the result set.
pub fn render_report<T: Serialize>(step: Step, rows: &[T]) -> Result<StepReport, PipelineError> {
    let results = serde_json::to_value(rows)
        .map_err(|e| PipelineError::DataError(format!("Failed to render results: {}", e)))?;

    Ok(StepReport::new(step, format!("The results of the query are {}", results))
        .with_rows(rows.len() as u64)
        .with_results(results))
}

pub async fn analyze_regions(pool: &PgPool, table: &str) -> Result<StepReport, PipelineError> {
    let rows = regional_debt(pool, table).await?;
    render_report(Step::AnalyzeRegions, &rows)
}

pub async fn analyze_countries(pool: &PgPool, table: &str) -> Result<StepReport, PipelineError> {
    let rows = top_country_per_region(pool, table).await?;
    render_report(Step::AnalyzeCountries, &rows)
}

pub async fn analyze_loans(pool: &PgPool, table: &str) -> Result<StepReport, PipelineError> {
    let rows = top_active_loan_countries(pool, table).await?;
    render_report(Step::AnalyzeLoans, &rows)
}
