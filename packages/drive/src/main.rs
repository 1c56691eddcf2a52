use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::storage::open_blob_store;
use drive::config::AppConfig;
use drive::reconcile;
use drive::repo::open_metadata_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let metadata = open_metadata_store(&config.database.url)
        .await
        .context("Failed to open metadata store")?;
    let blobs = open_blob_store(&config.storage)
        .await
        .context("Failed to open blob store")?;
    info!(backend = ?config.storage.backend, "Stores ready");

    let report = reconcile::sweep(metadata.as_ref(), blobs.as_ref(), &config.reconcile).await?;
    for id in &report.orphaned {
        info!(blob_id = %id, applied = config.reconcile.apply, "Orphaned blob");
    }
    info!(
        "Reconciliation: {} referenced, {} stored, {} orphaned, {} dangling, {} deleted",
        report.referenced,
        report.stored,
        report.orphaned.len(),
        report.dangling.len(),
        report.deleted
    );

    Ok(())
}
