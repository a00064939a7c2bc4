//! Food registration and queue backfill

use crate::db::models::{EnrichmentStatus, FoodRecord, NewFood};
use crate::db::PipelineStore;
use crate::errors::{AppError, Result};
use crate::review;
use crate::scoring::{self, ACCEPTABLE_QUALITY_SCORE};
use tracing::{info, instrument};

/// Insert a food, score it, and queue it when its data is not yet
/// acceptable
#[instrument(skip(store, input), fields(name = %input.name))]
pub async fn register_food(store: &dyn PipelineStore, input: NewFood) -> Result<FoodRecord> {
    if input.name.trim().is_empty() {
        return Err(AppError::Validation {
            message: "name must not be empty".to_string(),
            field: Some("name".to_string()),
        });
    }

    let mut food = FoodRecord::new(input);
    let report = scoring::score(&food);
    review::apply(&mut food, &report);

    let needs_enrichment = !report.is_acceptable();
    food.set_status(if needs_enrichment {
        EnrichmentStatus::Pending
    } else {
        EnrichmentStatus::Completed
    });

    store.insert_food(&food).await?;
    if needs_enrichment {
        store.enqueue(food.id).await?;
    }

    info!(
        food_id = %food.id,
        score = report.score,
        queued = needs_enrichment,
        "Food registered"
    );
    Ok(food)
}

/// Queue up to `limit` records that still need enrichment and have no
/// active entry; returns how many were queued
#[instrument(skip(store))]
pub async fn backfill(store: &dyn PipelineStore, limit: u64) -> Result<usize> {
    let candidates = store
        .find_enrichment_candidates(ACCEPTABLE_QUALITY_SCORE, limit)
        .await?;

    let mut queued = 0;
    for id in candidates {
        if store.enqueue(id).await? {
            queued += 1;
        }
    }

    info!(queued, "Backfill complete");
    Ok(queued)
}
