//! Bronze to silver transformation.
//!
//! Projects the eight loan columns the analysis needs, normalizes the text
//! columns so they load cleanly and compare consistently, and derives
//! `total_repaid` and `debt_remaining`.

use regex::Regex;
use std::sync::LazyLock;

use crate::blob_storage::{self, BlobStore};
use crate::errors::{PipelineError, ResultExt};
use crate::models::{SilverLoan, Step, StepReport, SELECTED_COLUMNS};

/// Column order of the silver artifact and the destination table.
pub const SILVER_COLUMNS: [&str; 10] = [
    "loan_number",
    "region",
    "country",
    "loan_status",
    "original_principal_amount",
    "repaid_to_ibrd",
    "repaid_3rd_party",
    "undisbursed_amount",
    "total_repaid",
    "debt_remaining",
];

static CURRENCY_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\$,]+").expect("valid currency regex"));
static WHITESPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Normalizes a text cell.
///
/// In order: drop `$` and `,`, collapse whitespace runs to one space, drop
/// `'`, trim, upper-case. Dropping a quote that sat between two spaces would
/// leave a double space behind, so runs are collapsed again after it.
pub fn clean_text(value: &str) -> String {
    let without_currency = CURRENCY_CHARS.replace_all(value, "");
    let collapsed = WHITESPACE_RUNS.replace_all(&without_currency, " ");
    let unquoted = collapsed.replace('\'', "");
    let collapsed = WHITESPACE_RUNS.replace_all(&unquoted, " ");
    collapsed.trim().to_uppercase()
}

/// Parses a numeric cell. Empty cells and `NaN` are missing values.
pub fn parse_amount(cell: &str) -> Result<Option<f64>, String> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_nan() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(_) => Err(format!("'{}' is not a number", trimmed)),
    }
}

impl SilverLoan {
    /// Builds a silver record from projected bronze values, deriving the
    /// repayment totals. Missing amounts count as zero in the arithmetic but
    /// stay missing in their own columns.
    #[allow(clippy::too_many_arguments)]
    pub fn derive(
        loan_number: Option<String>,
        region: Option<String>,
        country: Option<String>,
        loan_status: Option<String>,
        original_principal_amount: Option<f64>,
        repaid_to_ibrd: Option<f64>,
        repaid_3rd_party: Option<f64>,
        undisbursed_amount: Option<f64>,
    ) -> Self {
        let total_repaid = repaid_to_ibrd.unwrap_or(0.0) + repaid_3rd_party.unwrap_or(0.0);
        let debt_remaining = original_principal_amount.unwrap_or(0.0) - total_repaid;

        Self {
            loan_number,
            region,
            country,
            loan_status,
            original_principal_amount,
            repaid_to_ibrd,
            repaid_3rd_party,
            undisbursed_amount,
            total_repaid,
            debt_remaining,
        }
    }
}

/// Parses the bronze CSV into silver records.
///
/// Fails if any of the selected columns is absent, or if a numeric cell holds
/// something other than a number.
pub fn parse_bronze(bronze_csv: &str) -> Result<Vec<SilverLoan>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bronze_csv.as_bytes());

    let headers = reader.headers()?.clone();
    let mut index = [0usize; SELECTED_COLUMNS.len()];
    for (slot, column) in index.iter_mut().zip(SELECTED_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| {
                PipelineError::DataError(format!("bronze artifact is missing column '{}'", column))
            })?;
    }

    let mut loans = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let cell = |i: usize| record.get(index[i]).unwrap_or("");

        let text = |i: usize| {
            let raw = cell(i);
            (!raw.is_empty()).then(|| clean_text(raw))
        };
        let amount = |i: usize| {
            parse_amount(cell(i)).map_err(|e| {
                PipelineError::DataError(format!(
                    "row {} column '{}': {}",
                    row + 2,
                    SELECTED_COLUMNS[i],
                    e
                ))
            })
        };

        loans.push(SilverLoan::derive(
            text(0),
            text(1),
            text(2),
            text(3),
            amount(4)?,
            amount(5)?,
            amount(6)?,
            amount(7)?,
        ));
    }

    Ok(loans)
}

/// Renders silver records as CSV with a header row and LF row terminators.
pub fn write_silver(loans: &[SilverLoan]) -> Result<String, PipelineError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(SILVER_COLUMNS)?;
    for loan in loans {
        writer.serialize(loan)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| PipelineError::DataError(format!("Failed to flush CSV: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| PipelineError::DataError(format!("CSV output is not UTF-8: {}", e)))
}

/// Transform step: bronze blob in, silver blob out.
pub async fn transform(
    store: &BlobStore,
    bronze_blob: &str,
    silver_blob: &str,
) -> Result<StepReport, PipelineError> {
    let bronze = store.read_file(bronze_blob).await?;
    let loans = parse_bronze(&bronze)
        .with_context(|| format!("Invalid bronze artifact {}", store.display_path(bronze_blob)))?;
    tracing::info!("Transformed {} loan records", loans.len());

    let silver = write_silver(&loans)?;
    store.load_string(&silver, silver_blob, true).await?;

    Ok(StepReport::new(
        Step::Transform,
        format!(
            "Data successfully transformed. Saved in blob storage as {}",
            store.display_path(silver_blob)
        ),
    )
    .with_rows(loans.len() as u64)
    .with_checksum(blob_storage::checksum(&silver)))
}
