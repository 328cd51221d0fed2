use sqlx::PgPool;

use crate::blob_storage::BlobStore;
use crate::errors::{PipelineError, ResultExt};
use crate::models::{Step, StepReport};
use crate::transformer::SILVER_COLUMNS;

/// Bytes per CopyData message.
const COPY_CHUNK_BYTES: usize = 1 << 20;

/// Server-side bulk copy of a silver CSV: header row skipped, `,` between
/// fields, one record per line.
pub fn copy_sql(table: &str) -> String {
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, HEADER true, DELIMITER ',')",
        table,
        SILVER_COLUMNS.join(", ")
    )
}

pub async fn count_rows(pool: &PgPool, table: &str) -> Result<i64, PipelineError> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .with_context(|| format!("Failed to count rows in {}", table))?;
    Ok(count)
}

/// Load step: bulk copy the silver artifact into the destination table, then
/// verify the row count.
pub async fn load(
    pool: &PgPool,
    store: &BlobStore,
    silver_blob: &str,
    table: &str,
) -> Result<StepReport, PipelineError> {
    let silver = store.read_file(silver_blob).await?;

    let mut conn = pool.acquire().await?;
    let mut copy = conn
        .copy_in_raw(&copy_sql(table))
        .await
        .with_context(|| format!("Failed to start bulk copy into {}", table))?;

    for chunk in silver.as_bytes().chunks(COPY_CHUNK_BYTES) {
        let sent = copy.send(chunk).await.map(|_| ());
        if let Err(e) = sent {
            let reason = e.to_string();
            if let Err(abort_err) = copy.abort(reason).await {
                tracing::debug!("Bulk copy abort reported: {}", abort_err);
            }
            return Err(e).with_context(|| {
                format!("Bulk copy of {} failed", store.display_path(silver_blob))
            });
        }
    }

    let copied = copy
        .finish()
        .await
        .with_context(|| format!("Bulk copy of {} failed", store.display_path(silver_blob)))?;
    tracing::info!(
        "Table successfully populated: {} rows copied from {}",
        copied,
        store.display_path(silver_blob)
    );

    let rows = count_rows(pool, table).await?;

    Ok(StepReport::new(
        Step::Load,
        format!("The table was created and contains {} rows", rows),
    )
    .with_rows(rows as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_statement() {
        assert_eq!(
            copy_sql("wb_loans"),
            "COPY wb_loans (loan_number, region, country, loan_status, original_principal_amount, \
             repaid_to_ibrd, repaid_3rd_party, undisbursed_amount, total_repaid, debt_remaining) \
             FROM STDIN WITH (FORMAT csv, HEADER true, DELIMITER ',')"
        );
    }
}
