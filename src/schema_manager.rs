use sqlx::PgPool;

use crate::errors::{PipelineError, ResultExt};
use crate::models::{Step, StepReport};

/// Destination table columns and their SQL types, in silver column order.
pub const TABLE_COLUMNS: [(&str, &str); 10] = [
    ("loan_number", "VARCHAR(10)"),
    ("region", "VARCHAR(30)"),
    ("country", "VARCHAR(30)"),
    ("loan_status", "VARCHAR(15)"),
    ("original_principal_amount", "DOUBLE PRECISION"),
    ("repaid_to_ibrd", "DOUBLE PRECISION"),
    ("repaid_3rd_party", "DOUBLE PRECISION"),
    ("undisbursed_amount", "DOUBLE PRECISION"),
    ("total_repaid", "DOUBLE PRECISION"),
    ("debt_remaining", "DOUBLE PRECISION"),
];

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", table)
}

pub fn create_table_sql(table: &str) -> String {
    let columns = TABLE_COLUMNS
        .iter()
        .map(|(name, ty)| format!("    {:<26}{}", name, ty))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("CREATE TABLE {} (\n{}\n)", table, columns)
}

/// Schema and table name as stored in `information_schema`.
///
/// Unquoted identifiers are folded to lower case by Postgres; an unqualified
/// name lives in `public`.
pub fn catalog_name(table: &str) -> (String, String) {
    let (schema, name) = table.split_once('.').unwrap_or(("public", table));
    (schema.to_ascii_lowercase(), name.to_ascii_lowercase())
}

/// Create-table step: destructive reset of the destination table.
pub async fn recreate_table(pool: &PgPool, table: &str) -> Result<StepReport, PipelineError> {
    sqlx::query(&drop_table_sql(table))
        .execute(pool)
        .await
        .with_context(|| format!("Failed to drop {}", table))?;
    tracing::info!("Table {} successfully dropped or didn't exist", table);

    sqlx::query(&create_table_sql(table))
        .execute(pool)
        .await
        .with_context(|| format!("Failed to create {}", table))?;

    Ok(StepReport::new(
        Step::CreateTable,
        format!("Table {} successfully created", table),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::SILVER_COLUMNS;

    #[test]
    fn test_table_columns_follow_silver_layout() {
        let names: Vec<&str> = TABLE_COLUMNS.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, SILVER_COLUMNS);
    }

    #[test]
    fn test_catalog_name_folds_case() {
        assert_eq!(
            catalog_name("_staging.Loans2"),
            ("_staging".to_string(), "loans2".to_string())
        );
        assert_eq!(
            catalog_name("WB_Loans"),
            ("public".to_string(), "wb_loans".to_string())
        );
        assert_eq!(
            catalog_name("public.wb_loans"),
            ("public".to_string(), "wb_loans".to_string())
        );
    }

    #[test]
    fn test_ddl_statements() {
        assert_eq!(
            drop_table_sql("public.wb_loans"),
            "DROP TABLE IF EXISTS public.wb_loans"
        );

        let create = create_table_sql("public.wb_loans");
        assert!(create.starts_with("CREATE TABLE public.wb_loans (\n"));
        assert!(create.contains("loan_number               VARCHAR(10),"));
        assert!(create.contains("debt_remaining            DOUBLE PRECISION\n)"));
        assert_eq!(create.matches("VARCHAR").count(), 4);
        assert_eq!(create.matches("DOUBLE PRECISION").count(), 6);
    }
}
