//! Script to re-run interaction history transfers that did not finish.
//!
//! Usage: `retry_history_transfer [TENANT_ID]`

use std::sync::Arc;
use uuid::Uuid;

use lead_conversion_api::config::Config;
use lead_conversion_api::db::Database;
use lead_conversion_api::history::HistoryTransfer;
use lead_conversion_api::store::DocumentStore;

/// Main entry point for the retry script.
///
/// Finds conversion records still flagged `history_transferred = false`,
/// optionally for one tenant, and copies their lead history to the client.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    let tenant_id = match std::env::args().nth(1) {
        Some(raw) => Some(
            Uuid::parse_str(raw.trim())
                .map_err(|_| anyhow::anyhow!("TENANT_ID must be a UUID, got {}", raw))?,
        ),
        None => None,
    };

    let db = Database::new(&config.database_url).await?;
    let store: Arc<dyn DocumentStore> = Arc::new(db.document_store().await?);

    tracing::info!(
        "Connected to database. Retrying pending history transfers{}...",
        tenant_id
            .map(|t| format!(" for tenant {}", t))
            .unwrap_or_default()
    );

    let history = HistoryTransfer::from_config(store, &config);
    let summary = history
        .retry_pending(tenant_id)
        .await
        .map_err(|e| anyhow::anyhow!("failed to list pending transfers: {}", e))?;

    tracing::info!(
        "Retry complete. {} pending, {} transferred, {} failed.",
        summary.pending,
        summary.transferred,
        summary.failed
    );

    if summary.failed > 0 {
        anyhow::bail!("{} history transfer(s) still failing", summary.failed);
    }

    Ok(())
}
