use serde::Deserialize;
use std::str::FromStr;

use uuid::Uuid;

use crate::models::Step;

pub const DEFAULT_SOURCE_URL: &str = "https://finances.worldbank.org/resource/zucq-nrc3.json";
pub const DEFAULT_ROW_LIMIT: u32 = 50_000;
pub const DEFAULT_BLOB_STORE_URL: &str = "az://rfd-container";
pub const DEFAULT_BRONZE_BLOB: &str = "WB_Data_Loans__Bronze.csv";
pub const DEFAULT_SILVER_BLOB: &str = "WB_Data_Loans__Silver.csv";
pub const DEFAULT_LOANS_TABLE: &str = "public.wb_loans";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub source_url: String,
    pub row_limit: u32,
    pub blob_store_url: String,
    pub bronze_blob: String,
    pub silver_blob: String,
    pub loans_table: String,
    pub run_scoped_artifacts: bool,
    pub run_id: Option<Uuid>,
    pub start_step: Step,
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            source_url: std::env::var("WB_SOURCE_URL")
                .unwrap_or_else(|_| DEFAULT_SOURCE_URL.to_string())
                .pipe_check(|url| {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("WB_SOURCE_URL must start with http:// or https://");
                    }
                    Ok(())
                })?,
            row_limit: std::env::var("WB_ROW_LIMIT")
                .unwrap_or_else(|_| DEFAULT_ROW_LIMIT.to_string())
                .parse()
                .ok()
                .filter(|limit: &u32| *limit > 0)
                .ok_or_else(|| anyhow::anyhow!("WB_ROW_LIMIT must be a positive number"))?,
            blob_store_url: std::env::var("BLOB_STORE_URL")
                .unwrap_or_else(|_| DEFAULT_BLOB_STORE_URL.to_string())
                .pipe_check(|url| {
                    crate::blob_storage::BlobLocation::parse(url)?;
                    Ok(())
                })?,
            bronze_blob: non_empty_or_default("BRONZE_BLOB", DEFAULT_BRONZE_BLOB)?,
            silver_blob: non_empty_or_default("SILVER_BLOB", DEFAULT_SILVER_BLOB)?,
            loans_table: std::env::var("LOANS_TABLE")
                .unwrap_or_else(|_| DEFAULT_LOANS_TABLE.to_string())
                .pipe_check(|table| {
                    if !is_valid_table_name(table) {
                        anyhow::bail!(
                            "LOANS_TABLE must be a plain identifier such as wb_loans or public.wb_loans"
                        );
                    }
                    Ok(())
                })?,
            run_scoped_artifacts: parse_bool_var("RUN_SCOPED_ARTIFACTS")?,
            run_id: std::env::var("RUN_ID")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|s| Uuid::parse_str(s.trim()))
                .transpose()
                .map_err(|e| anyhow::anyhow!("RUN_ID must be a UUID: {}", e))?,
            start_step: std::env::var("PIPELINE_START_STEP")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|s| Step::from_str(&s))
                .transpose()
                .map_err(|e| anyhow::anyhow!("PIPELINE_START_STEP: {}", e))?
                .unwrap_or(Step::Extract),
            http_timeout_secs: parse_timeout_secs(
                &std::env::var("HTTP_TIMEOUT_SECS").unwrap_or_else(|_| "120".to_string()),
            )?,
        };

        if config.run_scoped_artifacts && config.start_step > Step::Extract && config.run_id.is_none()
        {
            anyhow::bail!(
                "RUN_ID is required to resume at '{}' with RUN_SCOPED_ARTIFACTS enabled",
                config.start_step
            );
        }

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Database URL: {}...", url_prefix(&config.database_url));
        tracing::debug!("Source URL: {} (limit {})", config.source_url, config.row_limit);
        tracing::debug!(
            "Artifacts: {} -> {}, {}",
            config.blob_store_url,
            config.bronze_blob,
            config.silver_blob
        );
        tracing::debug!("Destination table: {}", config.loans_table);
        if config.start_step != Step::Extract {
            tracing::info!("Pipeline will resume at step '{}'", config.start_step);
        }

        Ok(config)
    }
}

/// Runs a validation closure over a value and hands the value back.
trait PipeCheck: Sized {
    fn pipe_check(self, check: impl FnOnce(&Self) -> anyhow::Result<()>) -> anyhow::Result<Self>;
}

impl PipeCheck for String {
    fn pipe_check(self, check: impl FnOnce(&Self) -> anyhow::Result<()>) -> anyhow::Result<Self> {
        if self.trim().is_empty() {
            anyhow::bail!("value cannot be empty");
        }
        check(&self)?;
        Ok(self)
    }
}

fn non_empty_or_default(var: &str, default: &str) -> anyhow::Result<String> {
    match std::env::var(var) {
        Ok(value) if value.trim().is_empty() => anyhow::bail!("{} cannot be empty", var),
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => Ok(default.to_string()),
    }
}

fn parse_bool_var(var: &str) -> anyhow::Result<bool> {
    match std::env::var(var) {
        Ok(value) => parse_bool(&value)
            .ok_or_else(|| anyhow::anyhow!("{} must be true/false, got '{}'", var, value)),
        Err(_) => Ok(false),
    }
}

fn parse_timeout_secs(value: &str) -> anyhow::Result<u64> {
    value
        .trim()
        .parse()
        .ok()
        .filter(|secs: &u64| *secs > 0)
        .ok_or_else(|| anyhow::anyhow!("HTTP_TIMEOUT_SECS must be a positive number of seconds"))
}

/// First 20 characters of the database URL, for logs.
fn url_prefix(url: &str) -> String {
    url.chars().take(20).collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Accepts `table` or `schema.table`, each part a plain SQL identifier.
///
/// The table name is interpolated into DDL and COPY statements, which cannot
/// take bind parameters.
pub fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return false;
    }
    parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                part.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}
