//! Review flagging
//!
//! Persists score output onto food records and runs the batch passes
//! over flagged records: listing, duplicate detection, re-verification
//! and manual flag clearing.

mod duplicates;

pub use duplicates::{normalize_name, plan as plan_duplicates, DuplicatePlan};

use crate::db::models::{EnrichmentStatus, FoodRecord};
use crate::db::PipelineStore;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::scoring::{self, QualityReport, ReviewFlag};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Write a score report onto `food`.
///
/// Score-derived flags are replaced wholesale; flags raised by other
/// passes (duplicates, retry exhaustion) are kept.
pub fn apply(food: &mut FoodRecord, report: &QualityReport) {
    let mut flags: Vec<String> = food
        .review_flags
        .iter()
        .filter(|f| {
            ReviewFlag::parse(f)
                .map(|flag| !flag.is_score_derived())
                .unwrap_or(true)
        })
        .cloned()
        .collect();

    for flag in &report.flags {
        if !food.has_flag(flag.as_str()) {
            metrics::record_flag(flag.as_str());
        }
        flags.push(flag.as_str().to_string());
    }

    food.quality_score = Some(report.score);
    food.review_flags = flags;
    food.needs_review = !food.review_flags.is_empty();
}

/// Counts from a duplicate pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub groups: usize,
    pub flagged: usize,
    pub cleared: usize,
}

/// Counts from a re-verification pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub checked: usize,
    pub verified: usize,
    pub flagged: usize,
    pub requeued: usize,
}

/// Batch review operations over the store
pub struct ReviewFlagger {
    store: Arc<dyn PipelineStore>,
}

impl ReviewFlagger {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self { store }
    }

    /// Flagged records, most recently verified first
    pub async fn list_needing_review(&self, limit: u64) -> Result<Vec<FoodRecord>> {
        self.store.list_needing_review(limit).await
    }

    /// Flag every member of a same-name group except the best one.
    ///
    /// Only the flag is written, so a record enriched while the pass runs
    /// keeps its new data.
    #[instrument(skip(self))]
    pub async fn detect_duplicates(&self) -> Result<DuplicateReport> {
        let foods = self.store.list_all().await?;
        let plan = duplicates::plan(&foods);

        let mut report = DuplicateReport {
            groups: plan.groups,
            ..Default::default()
        };

        for id in plan.flag {
            if self.store.add_flag(id, ReviewFlag::DuplicateEntry).await? {
                metrics::record_flag(ReviewFlag::DuplicateEntry.as_str());
                report.flagged += 1;
            }
        }
        for id in plan.clear {
            if self.store.remove_flag(id, ReviewFlag::DuplicateEntry).await? {
                report.cleared += 1;
            }
        }

        info!(
            groups = report.groups,
            flagged = report.flagged,
            cleared = report.cleared,
            "Duplicate detection complete"
        );
        Ok(report)
    }

    /// Rescore up to `limit` records, least recently verified first.
    ///
    /// Clean, acceptable records become `verified`; a verified record that
    /// regressed drops back to `completed`. A record whose score falls
    /// below the acceptable threshold on this pass is queued again. A
    /// record that changed after it was listed is left for the next pass.
    #[instrument(skip(self))]
    pub async fn verify(&self, limit: u64) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();

        for mut food in self.store.list_for_verification(limit).await? {
            let previous = food.quality_score;
            let quality = scoring::score(&food);
            apply(&mut food, &quality);
            food.last_verification = Some(Utc::now());

            let clean = quality.is_acceptable() && food.review_flags.is_empty();
            match food.status() {
                Some(EnrichmentStatus::Completed) if clean => {
                    food.set_status(EnrichmentStatus::Verified);
                }
                Some(EnrichmentStatus::Verified) if !clean => {
                    food.set_status(EnrichmentStatus::Completed);
                }
                _ => {}
            }

            if !self.store.update_food(&food).await? {
                debug!(food_id = %food.id, "Record changed since selection, skipping");
                continue;
            }
            report.checked += 1;
            if food.status() == Some(EnrichmentStatus::Verified) {
                report.verified += 1;
            }
            if food.needs_review {
                report.flagged += 1;
            }

            let dropped = previous
                .map(|s| s >= scoring::ACCEPTABLE_QUALITY_SCORE)
                .unwrap_or(true);
            let requeue = !quality.is_acceptable()
                && dropped
                && food.status() != Some(EnrichmentStatus::Failed)
                && !food.has_flag(ReviewFlag::MaxCorrectionAttemptsExceeded.as_str());
            if requeue && self.store.enqueue(food.id).await? {
                debug!(food_id = %food.id, score = quality.score, "Queued for re-enrichment");
                report.requeued += 1;
            }
        }

        info!(
            checked = report.checked,
            verified = report.verified,
            flagged = report.flagged,
            requeued = report.requeued,
            "Verification pass complete"
        );
        Ok(report)
    }

    /// Manually clear a flag.
    ///
    /// Clearing `MAX_CORRECTION_ATTEMPTS_EXCEEDED` also resets the failure
    /// count so the retry sweep will pick the record up again.
    #[instrument(skip(self))]
    pub async fn clear_flag(&self, food_id: Uuid, flag: ReviewFlag) -> Result<FoodRecord> {
        let not_found = || AppError::FoodNotFound {
            id: food_id.to_string(),
        };

        let food = self.store.get_food(food_id).await?.ok_or_else(not_found)?;
        if !self.store.remove_flag(food_id, flag).await? {
            return Ok(food);
        }

        info!(food_id = %food_id, flag = %flag, "Review flag cleared");
        self.store.get_food(food_id).await?.ok_or_else(not_found)
    }
}
