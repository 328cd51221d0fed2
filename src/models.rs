use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============ Pipeline Steps ============

/// The seven steps of a pipeline run, in dependency order.
///
/// The three analysis steps share the same predecessor (`Load`) and run
/// concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Extract,
    Transform,
    CreateTable,
    Load,
    AnalyzeRegions,
    AnalyzeCountries,
    AnalyzeLoans,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Extract => "extract",
            Step::Transform => "transform",
            Step::CreateTable => "create_table",
            Step::Load => "load",
            Step::AnalyzeRegions => "analyze_regions",
            Step::AnalyzeCountries => "analyze_countries",
            Step::AnalyzeLoans => "analyze_loans",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = String;

    /// Parses a step name. Any of the analysis step names resumes at the
    /// analysis fan-out, since the three analyzers always run together.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "extract" => Ok(Step::Extract),
            "transform" => Ok(Step::Transform),
            "create_table" => Ok(Step::CreateTable),
            "load" => Ok(Step::Load),
            "analyze" | "analyze_regions" | "analyze_countries" | "analyze_loans" => {
                Ok(Step::AnalyzeRegions)
            }
            other => Err(format!(
                "unknown step '{}' (expected extract, transform, create_table, load or analyze)",
                other
            )),
        }
    }
}

// ============ Silver Artifact ============

/// Columns projected from the bronze artifact, in output order.
pub const SELECTED_COLUMNS: [&str; 8] = [
    "loan_number",
    "region",
    "country",
    "loan_status",
    "original_principal_amount",
    "repaid_to_ibrd",
    "repaid_3rd_party",
    "undisbursed_amount",
];

/// A cleaned loan record as written to the silver artifact and loaded into
/// the destination table.
///
/// Field order matches the table's column order; the loader relies on it.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct SilverLoan {
    pub loan_number: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub loan_status: Option<String>,
    pub original_principal_amount: Option<f64>,
    pub repaid_to_ibrd: Option<f64>,
    pub repaid_3rd_party: Option<f64>,
    pub undisbursed_amount: Option<f64>,
    pub total_repaid: f64,
    pub debt_remaining: f64,
}

// ============ Analysis Rows ============

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct RegionDebt {
    pub region: Option<String>,
    pub debt_remaining: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct CountryDebt {
    pub region: Option<String>,
    pub country: Option<String>,
    pub debt_remaining: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct CountryLoanCount {
    pub country: Option<String>,
    pub count_of_loans: i64,
}

// ============ Reports ============

/// Outcome of one successful step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step: Step,
    /// Human-readable summary, e.g. where an artifact was written.
    pub message: String,
    /// Records written, rows loaded or result rows, when the step counts any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    /// SHA-256 of the artifact the step wrote.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Row-oriented query result, for analysis steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<serde_json::Value>,
}

impl StepReport {
    pub fn new(step: Step, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
            rows: None,
            checksum: None,
            results: None,
        }
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn with_checksum(mut self, checksum: String) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_results(mut self, results: serde_json::Value) -> Self {
        self.results = Some(results);
        self
    }
}

/// Summary of a complete pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn start(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
        }
    }

    pub fn record(&mut self, report: StepReport) {
        tracing::info!("✓ {}: {}", report.step, report.message);
        self.steps.push(report);
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn step(&self, step: Step) -> Option<&StepReport> {
        self.steps.iter().find(|r| r.step == step)
    }
}
