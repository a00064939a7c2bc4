//! Job dispatch

use crate::Command;
use nutriforge_common::{
    config::AppConfig,
    intake,
    retry::RetryScheduler,
    review::ReviewFlagger,
    PipelineStore, Result,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::instrument;

/// Run one job and return its report
#[instrument(skip(store, config))]
pub async fn run(command: Command, store: Arc<dyn PipelineStore>, config: &AppConfig) -> Result<Value> {
    let out = match command {
        Command::Sweep { cooldown_hours } => {
            let cooldown = cooldown_hours
                .map(chrono::Duration::hours)
                .unwrap_or_else(|| config.retry_cooldown());
            let scheduler = RetryScheduler::new(store, config.retry.max_attempts, config.retry.sweep_limit)
                .with_claim_lease(config.claim_lease());
            json!(scheduler.sweep_stale_failures(cooldown).await?)
        }
        Command::Verify { limit } => json!(ReviewFlagger::new(store).verify(limit).await?),
        Command::Duplicates => json!(ReviewFlagger::new(store).detect_duplicates().await?),
        Command::Backfill { limit } => {
            let queued = intake::backfill(store.as_ref(), limit).await?;
            json!({ "queued": queued })
        }
        Command::Review { limit } => {
            let foods = ReviewFlagger::new(store).list_needing_review(limit).await?;
            let rows: Vec<Value> = foods
                .iter()
                .map(|f| {
                    json!({
                        "id": f.id,
                        "name": f.name,
                        "brand": f.brand,
                        "quality_score": f.quality_score,
                        "review_flags": f.review_flags,
                        "enrichment_status": f.enrichment_status,
                        "failed_attempts": f.failed_attempts,
                    })
                })
                .collect();
            json!({ "count": rows.len(), "foods": rows })
        }
    };
    Ok(out)
}
