//! Pipeline orchestration.
//!
//! Runs extract → transform → create table → load strictly in sequence, then
//! fans out to the three analyzers. Every step either returns a report or an
//! error; an error is logged and stops the run, so no step ever works from a
//! predecessor's missing or stale output.

use sqlx::PgPool;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::analysis;
use crate::blob_storage::BlobStore;
use crate::config::Config;
use crate::db::Database;
use crate::errors::{PipelineError, ResultExt};
use crate::extractor::{self, WorldBankClient};
use crate::loader;
use crate::models::{RunReport, Step, StepReport};
use crate::refresh_lock::RefreshLock;
use crate::schema_manager;
use crate::transformer;

/// Blob names used by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    pub bronze: String,
    pub silver: String,
}

impl ArtifactNames {
    /// Configured names, prefixed with `<run_id>/` in run-scoped mode.
    pub fn for_run(config: &Config, run_id: Uuid) -> Self {
        if config.run_scoped_artifacts {
            Self {
                bronze: format!("{}/{}", run_id, config.bronze_blob),
                silver: format!("{}/{}", run_id, config.silver_blob),
            }
        } else {
            Self {
                bronze: config.bronze_blob.clone(),
                silver: config.silver_blob.clone(),
            }
        }
    }
}

pub struct Pipeline {
    config: Config,
    client: WorldBankClient,
    store: BlobStore,
    pool: PgPool,
}

impl Pipeline {
    pub fn new(config: Config, client: WorldBankClient, store: BlobStore, pool: PgPool) -> Self {
        Self {
            config,
            client,
            store,
            pool,
        }
    }

    /// Builds the HTTP client, opens the blob store and connects to the
    /// database described by `config`.
    pub async fn connect(config: Config) -> Result<Self, PipelineError> {
        let client = WorldBankClient::new(
            config.source_url.clone(),
            config.row_limit,
            Duration::from_secs(config.http_timeout_secs),
        )?;
        let store = BlobStore::open(&config.blob_store_url)?;
        let db = Database::new(&config.database_url).await?;
        tracing::info!("Database connection pool established");

        Ok(Self::new(config, client, store, db.pool))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the pipeline from the configured start step.
    ///
    /// The run id comes from the configuration when set, so a resumed run
    /// finds the artifacts of the run it continues.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let run_id = self.config.run_id.unwrap_or_else(Uuid::new_v4);
        let span = tracing::info_span!("run", %run_id);
        self.run_steps(run_id, self.config.start_step)
            .instrument(span)
            .await
    }

    async fn run_steps(&self, run_id: Uuid, start: Step) -> Result<RunReport, PipelineError> {
        let names = ArtifactNames::for_run(&self.config, run_id);
        let table = self.config.loans_table.as_str();
        let mut report = RunReport::start(run_id);
        tracing::info!(
            "Starting pipeline run at '{}' ({} -> {})",
            start,
            self.store.display_path(&names.bronze),
            table
        );

        if start <= Step::Extract {
            report.record(
                run_step(
                    Step::Extract,
                    extractor::extract(&self.client, &self.store, &names.bronze),
                )
                .await?,
            );
        }

        if start <= Step::Transform {
            report.record(
                run_step(
                    Step::Transform,
                    transformer::transform(&self.store, &names.bronze, &names.silver),
                )
                .await?,
            );
        }

        if start <= Step::Load {
            let lock = RefreshLock::acquire(&self.pool, table)
                .await
                .context("Cannot refresh destination table")?;

            let refreshed = self.refresh_table(table, &names, &mut report).await;
            let released = lock.release().await;
            refreshed?;
            released?;
        }

        let (regions, countries, loans) = tokio::try_join!(
            run_step(
                Step::AnalyzeRegions,
                analysis::analyze_regions(&self.pool, table)
            ),
            run_step(
                Step::AnalyzeCountries,
                analysis::analyze_countries(&self.pool, table)
            ),
            run_step(Step::AnalyzeLoans, analysis::analyze_loans(&self.pool, table)),
        )?;
        report.record(regions);
        report.record(countries);
        report.record(loans);

        let report = report.finish();
        tracing::info!("Pipeline run {} finished", run_id);
        Ok(report)
    }

    /// Create-table and load, run under the refresh lock.
    ///
    /// The table is always recreated before loading, also when resuming at
    /// `load`: the silver artifact holds the whole dataset and the table is
    /// only ever replaced, never appended to.
    async fn refresh_table(
        &self,
        table: &str,
        names: &ArtifactNames,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        report.record(
            run_step(
                Step::CreateTable,
                schema_manager::recreate_table(&self.pool, table),
            )
            .await?,
        );

        report.record(
            run_step(
                Step::Load,
                loader::load(&self.pool, &self.store, &names.silver, table),
            )
            .await?,
        );
        Ok(())
    }
}

/// Runs one step, logging its duration or its failure.
async fn run_step<F>(step: Step, fut: F) -> Result<StepReport, PipelineError>
where
    F: Future<Output = Result<StepReport, PipelineError>>,
{
    tracing::info!("▶ {}", step);
    let start = Instant::now();

    match fut.await {
        Ok(report) => {
            tracing::debug!("{} finished in {:?}", step, start.elapsed());
            Ok(report)
        }
        Err(e) => {
            if e.is_missing_artifact() {
                tracing::error!(
                    "Step {} failed: input artifact missing, run the previous step first: {}",
                    step,
                    e
                );
            } else {
                tracing::error!("Step {} failed: {}", step, e);
            }
            Err(e).with_context(|| format!("Step '{}' failed", step))
        }
    }
}
