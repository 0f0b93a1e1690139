//! pricekeepd entry point.
//!
//! Loads configuration, wires the price service and runs the refresh
//! scheduler until Ctrl-C. Logs are JSON on stderr.

use anyhow::Result;
use pricekeep_core::AppConfig;
use tracing_subscriber::EnvFilter;

mod app;
mod scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        db_path = %config.db_path.display(),
        backend = config.secondary_backend.as_str(),
        tracked = config.tracked_products.len(),
        "starting pricekeepd"
    );

    let service = app::build(&config).await?;
    let scheduler = scheduler::Scheduler::new(service, &config);

    scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
            }
        })
        .await;

    tracing::info!("pricekeepd stopped");
    Ok(())
}
