use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wb_loans_pipeline::config::Config;
use wb_loans_pipeline::pipeline::Pipeline;

/// Main entry point for the pipeline.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - HTTP client, blob store and database connection.
///
/// It then runs the pipeline once and prints the run report as JSON.
///
/// # Returns
///
/// * `anyhow::Result<()>` - Ok if every step succeeded; any failed step ends
///   the process with a non-zero exit code.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wb_loans_pipeline=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    let pipeline = Pipeline::connect(config).await?;

    let report = match pipeline.run().await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Pipeline run failed: {}", e);
            return Err(e.into());
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
