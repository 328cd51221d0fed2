use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::blob_storage::{self, BlobStore};
use crate::errors::PipelineError;
use crate::models::{Step, StepReport};

/// Client for the World Bank finances open-data API.
#[derive(Clone)]
pub struct WorldBankClient {
    client: Client,
    source_url: String,
    row_limit: u32,
}

impl WorldBankClient {
    /// Creates a new `WorldBankClient`.
    ///
    /// # Arguments
    ///
    /// * `source_url` - The dataset's JSON resource URL.
    /// * `row_limit` - Value sent as the `$limit` query parameter.
    /// * `timeout` - Request timeout.
    pub fn new(source_url: String, row_limit: u32, timeout: Duration) -> Result<Self, PipelineError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            PipelineError::ExternalApiError(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            source_url,
            row_limit,
        })
    }

    /// Fetches up to `row_limit` loan records.
    ///
    /// # Returns
    ///
    /// * `Result<Vec<Map<String, Value>>, PipelineError>` - One JSON object per loan.
    pub async fn fetch_loans(&self) -> Result<Vec<Map<String, Value>>, PipelineError> {
        let url = reqwest::Url::parse_with_params(
            &self.source_url,
            &[("$limit", self.row_limit.to_string())],
        )
        .map_err(|e| PipelineError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        tracing::info!("Fetching World Bank loans: {}", url);

        let response =
            self.client.get(url).send().await.map_err(|e| {
                PipelineError::ExternalApiError(format!("World Bank request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("World Bank API returned error {}: {}", status, error_text);
            return Err(PipelineError::ExternalApiError(format!(
                "World Bank API returned status {}: {}",
                status, error_text
            )));
        }

        let payload: Value = response.json().await.map_err(|e| {
            PipelineError::ExternalApiError(format!("Failed to parse World Bank response: {}", e))
        })?;

        let records = into_records(payload)?;
        tracing::info!("Fetched {} loan records", records.len());
        Ok(records)
    }
}

/// Validates that the payload is an array of JSON objects.
fn into_records(payload: Value) -> Result<Vec<Map<String, Value>>, PipelineError> {
    let Value::Array(items) = payload else {
        return Err(PipelineError::DataError(
            "expected a JSON array of loan records".to_string(),
        ));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::Object(map) => Ok(map),
            other => Err(PipelineError::DataError(format!(
                "record {} is not a JSON object: {}",
                idx, other
            ))),
        })
        .collect()
}

/// Renders records as CSV text.
///
/// Columns are the union of all record keys in first-seen order; a record
/// without a given key gets an empty cell. An empty input yields an empty
/// string.
pub fn records_to_csv(records: &[Map<String, Value>]) -> Result<String, PipelineError> {
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    if !columns.is_empty() {
        writer.write_record(&columns)?;
    }
    for record in records {
        writer.write_record(columns.iter().map(|c| cell_text(record.get(*c))))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| PipelineError::DataError(format!("Failed to flush CSV: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| PipelineError::DataError(format!("CSV output is not UTF-8: {}", e)))
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Extract step: fetch the dataset and stage it as the bronze artifact.
pub async fn extract(
    client: &WorldBankClient,
    store: &BlobStore,
    bronze_blob: &str,
) -> Result<StepReport, PipelineError> {
    let records = client.fetch_loans().await?;
    let csv_text = records_to_csv(&records)?;

    store.load_string(&csv_text, bronze_blob, true).await?;

    Ok(StepReport::new(
        Step::Extract,
        format!(
            "Data successfully extracted. Saved in blob storage as {}",
            store.display_path(bronze_blob)
        ),
    )
    .with_rows(records.len() as u64)
    .with_checksum(blob_storage::checksum(&csv_text)))
}
