//! Retry scheduler
//!
//! The only path by which a failed record is retried. Records that keep
//! failing are parked with `MAX_CORRECTION_ATTEMPTS_EXCEEDED` until a
//! human clears the flag.

use crate::db::PipelineStore;
use crate::errors::Result;
use crate::metrics;
use crate::scoring::ReviewFlag;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Records moved back to `pending` and re-queued
    pub reset: usize,
    /// Records parked for human review instead
    pub flagged: usize,
    /// Abandoned claims failed before the sweep ran
    pub released: u64,
}

/// Matches the default worker budget of two minutes, doubled
const DEFAULT_CLAIM_LEASE_SECS: i64 = 240;

pub struct RetryScheduler {
    store: Arc<dyn PipelineStore>,
    max_attempts: i32,
    limit: u64,
    claim_lease: Option<Duration>,
}

impl RetryScheduler {
    pub fn new(store: Arc<dyn PipelineStore>, max_attempts: i32, limit: u64) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            limit,
            claim_lease: Some(Duration::seconds(DEFAULT_CLAIM_LEASE_SECS)),
        }
    }

    /// Claims held longer than `lease` are failed at the start of a sweep.
    /// A lease too long to represent disables that step.
    pub fn with_claim_lease(mut self, lease: std::time::Duration) -> Self {
        self.claim_lease = Duration::from_std(lease).ok();
        self
    }

    /// Reset failed records whose last attempt is older than `cooldown`
    #[instrument(skip(self), fields(cooldown_hours = cooldown.num_hours()))]
    pub async fn sweep_stale_failures(&self, cooldown: Duration) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let lease_cutoff = self
            .claim_lease
            .and_then(|lease| Utc::now().checked_sub_signed(lease));
        if let Some(claimed_before) = lease_cutoff {
            report.released = self
                .store
                .expire_claims(claimed_before, "claim lease expired")
                .await?;
            if report.released > 0 {
                warn!(released = report.released, "Released abandoned claims");
            }
        }

        let cutoff = Utc::now() - cooldown;
        let stale = self.store.find_stale_failures(cutoff, self.limit).await?;

        for food in stale {
            if food.failed_attempts >= self.max_attempts {
                let parked = ReviewFlag::MaxCorrectionAttemptsExceeded;
                if !self.store.add_flag(food.id, parked).await? {
                    continue;
                }
                metrics::record_flag(parked.as_str());
                report.flagged += 1;
                warn!(
                    food_id = %food.id,
                    name = %food.name,
                    failed_attempts = food.failed_attempts,
                    "Retry limit reached, parked for review"
                );
                continue;
            }

            if !self.store.reset_for_retry(food.id).await? {
                debug!(food_id = %food.id, "Record changed since selection, skipping");
                continue;
            }
            self.store.enqueue(food.id).await?;
            report.reset += 1;
        }

        metrics::record_sweep(report.reset, report.flagged);
        info!(
            reset = report.reset,
            flagged = report.flagged,
            released = report.released,
            "Retry sweep complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{EnrichmentStatus, FoodRecord, NewFood};
    use crate::db::testing::InterleavedStore;
    use crate::db::{FoodStore, MemoryStore};
    use crate::queue::EnrichmentQueue;

    fn failed(name: &str, hours_ago: i64, attempts: i32) -> FoodRecord {
        let mut food = FoodRecord::new(NewFood {
            name: name.into(),
            ..Default::default()
        });
        food.set_status(EnrichmentStatus::Failed);
        food.failed_attempts = attempts;
        food.enrichment_error = Some("no match".into());
        food.last_enrichment = Some(Utc::now() - Duration::hours(hours_ago));
        food
    }

    async fn setup(foods: &[FoodRecord]) -> (Arc<MemoryStore>, RetryScheduler) {
        let store = Arc::new(MemoryStore::new());
        for f in foods {
            store.insert_food(f).await.unwrap();
        }
        let scheduler = RetryScheduler::new(store.clone(), 3, 500);
        (store, scheduler)
    }

    #[tokio::test]
    async fn test_resets_only_records_past_cooldown() {
        let stale = failed("Stale", 25, 1);
        let recent = failed("Recent", 1, 1);
        let (store, scheduler) = setup(&[stale.clone(), recent.clone()]).await;

        let report = scheduler.sweep_stale_failures(Duration::hours(24)).await.unwrap();
        assert_eq!(report, SweepReport { reset: 1, ..Default::default() });

        let stale = store.get_food(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.status(), Some(EnrichmentStatus::Pending));
        assert_eq!(stale.last_enrichment, None);
        // failure history is kept for the attempt bound
        assert_eq!(stale.failed_attempts, 1);
        assert_eq!(store.stats().await.unwrap().pending, 1);

        let recent_after = store.get_food(recent.id).await.unwrap().unwrap();
        assert_eq!(recent_after.status(), Some(EnrichmentStatus::Failed));
        assert_eq!(recent_after.last_enrichment, recent.last_enrichment);
    }

    #[tokio::test]
    async fn test_parks_records_at_attempt_limit() {
        let exhausted = failed("Exhausted", 48, 3);
        let (store, scheduler) = setup(&[exhausted.clone()]).await;

        let report = scheduler.sweep_stale_failures(Duration::hours(24)).await.unwrap();
        assert_eq!(report, SweepReport { flagged: 1, ..Default::default() });

        let parked = store.get_food(exhausted.id).await.unwrap().unwrap();
        assert_eq!(parked.status(), Some(EnrichmentStatus::Failed));
        assert!(parked.needs_review);
        assert!(parked.has_flag("MAX_CORRECTION_ATTEMPTS_EXCEEDED"));
        assert!(store.dequeue_batch(5).await.unwrap().is_empty());

        // parked records are skipped by later sweeps
        let report = scheduler.sweep_stale_failures(Duration::hours(24)).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (_store, scheduler) = setup(&[failed("Stale", 30, 0)]).await;
        assert_eq!(scheduler.sweep_stale_failures(Duration::hours(24)).await.unwrap().reset, 1);
        assert_eq!(scheduler.sweep_stale_failures(Duration::hours(24)).await.unwrap().reset, 0);
    }

    #[tokio::test]
    async fn test_parking_keeps_flags_raised_after_selection() {
        let exhausted = failed("Exhausted", 48, 3);
        let memory = Arc::new(MemoryStore::new());
        memory.insert_food(&exhausted).await.unwrap();

        let store = Arc::new(InterleavedStore::new(memory.clone()));
        let flagger = memory.clone();
        let id = exhausted.id;
        store
            .after_next_listing(Box::pin(async move {
                flagger.add_flag(id, ReviewFlag::DuplicateEntry).await.unwrap();
            }))
            .await;

        let scheduler = RetryScheduler::new(store, 3, 500);
        let report = scheduler.sweep_stale_failures(Duration::hours(24)).await.unwrap();
        assert_eq!(report.flagged, 1);

        let parked = memory.get_food(exhausted.id).await.unwrap().unwrap();
        assert!(parked.has_flag("DUPLICATE_ENTRY"));
        assert!(parked.has_flag("MAX_CORRECTION_ATTEMPTS_EXCEEDED"));
        assert_eq!(parked.failed_attempts, 3);
    }

    #[tokio::test]
    async fn test_sweep_recovers_abandoned_claims() {
        let mut food = FoodRecord::new(NewFood {
            name: "Rice".into(),
            ..Default::default()
        });
        food.set_status(EnrichmentStatus::Completed);
        let (store, scheduler) = setup(&[food.clone()]).await;
        store.enqueue(food.id).await.unwrap();
        // claimed by a worker that never came back
        store.dequeue_batch(1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let scheduler = scheduler.with_claim_lease(std::time::Duration::from_millis(1));
        let report = scheduler.sweep_stale_failures(Duration::hours(24)).await.unwrap();
        assert_eq!(report.released, 1);
        // the cooldown starts from the release
        assert_eq!(report.reset, 0);

        let released = store.get_food(food.id).await.unwrap().unwrap();
        assert_eq!(released.status(), Some(EnrichmentStatus::Failed));
        assert_eq!(store.stats().await.unwrap().processing, 0);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let report = scheduler.sweep_stale_failures(Duration::zero()).await.unwrap();
        assert_eq!(report, SweepReport { reset: 1, ..Default::default() });
        assert_eq!(store.stats().await.unwrap().pending, 1);
    }
}
