//! Enrichment worker
//!
//! One invocation claims a bounded batch from the queue, looks each food up
//! with the provider, and commits every item independently. Item failures
//! are recorded on the food and the entry; only losing the store aborts the
//! run.

use crate::config::AppConfig;
use crate::db::models::{EnrichmentStatus, FoodRecord, QueueEntry};
use crate::db::PipelineStore;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::nutrients::Nutrients;
use crate::provider::{FoodQuery, NutrientProvider, ProviderLookup};
use crate::review;
use crate::scoring;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Whole-row writes retried after a concurrent change to the same food
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Result of one `run_once` invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Pending entries left in the queue after the run
    pub remaining: u64,
}

/// Worker tuning
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub concurrency: usize,
    pub provider_timeout: Duration,
    pub time_budget: Duration,
    /// Claims older than this are treated as abandoned by a dead worker
    pub claim_lease: Duration,
    pub force_refresh: bool,
}

impl WorkerOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            concurrency: config.worker.concurrency.max(1),
            provider_timeout: config.provider_timeout(),
            time_budget: config.worker_time_budget(),
            claim_lease: config.claim_lease(),
            force_refresh: config.worker.force_refresh,
        }
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Completed,
    Failed,
}

/// Why a lookup produced no usable data
struct LookupFailure {
    /// Metrics label: no_match, error, timeout
    kind: &'static str,
    reason: String,
}

pub struct EnrichmentWorker {
    store: Arc<dyn PipelineStore>,
    provider: Arc<dyn NutrientProvider>,
    options: WorkerOptions,
}

impl EnrichmentWorker {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        provider: Arc<dyn NutrientProvider>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            store,
            provider,
            options,
        }
    }

    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.options.force_refresh = force;
        self
    }

    /// Claim and process up to `batch_size` entries.
    ///
    /// Claims are taken in chunks no larger than the concurrency limit.
    /// Once the time budget is spent no further chunk is claimed; items
    /// already claimed still finish.
    #[instrument(skip(self), fields(provider = self.provider.name()))]
    pub async fn run_once(&self, batch_size: usize) -> Result<RunSummary> {
        let started = Instant::now();
        let concurrency = self.options.concurrency.max(1);
        let mut summary = RunSummary::default();
        let mut claimed = 0usize;

        self.expire_abandoned_claims().await?;

        while claimed < batch_size {
            if started.elapsed() >= self.options.time_budget {
                warn!(
                    claimed,
                    batch_size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Time budget spent, not claiming more work"
                );
                break;
            }

            let want = concurrency.min(batch_size - claimed);
            let entries = self.store.dequeue_batch(want).await?;
            if entries.is_empty() {
                break;
            }
            claimed += entries.len();

            let results: Vec<(Uuid, Result<ItemOutcome>)> = stream::iter(entries)
                .map(|entry| async move {
                    let id = entry.id;
                    (id, self.process(entry).await)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            for (entry_id, result) in results {
                summary.processed += 1;
                match result {
                    Ok(ItemOutcome::Completed) => summary.successful += 1,
                    Ok(ItemOutcome::Failed) => summary.failed += 1,
                    Err(e) if e.is_store_unavailable() => {
                        error!(error = %e, "Store unavailable, aborting run");
                        return Err(e);
                    }
                    Err(e) => {
                        error!(entry_id = %entry_id, error = %e, "Failed to persist enrichment result");
                        summary.failed += 1;
                        self.release_claim(entry_id, &e).await?;
                    }
                }
            }
        }

        let stats = self.store.stats().await?;
        metrics::record_queue_depth(stats.pending, stats.processing);
        summary.remaining = stats.pending;

        info!(
            processed = summary.processed,
            successful = summary.successful,
            failed = summary.failed,
            remaining = summary.remaining,
            duration_ms = started.elapsed().as_millis() as u64,
            "Enrichment run complete"
        );
        Ok(summary)
    }

    /// Fail claims older than the lease so their foods reach the retry sweep
    async fn expire_abandoned_claims(&self) -> Result<()> {
        let Some(cutoff) = lease_cutoff(self.options.claim_lease) else {
            return Ok(());
        };
        let expired = self.store.expire_claims(cutoff, "claim lease expired").await?;
        if expired > 0 {
            warn!(expired, "Released abandoned claims");
        }
        Ok(())
    }

    /// Best effort: leave the entry failed rather than stuck in processing
    async fn release_claim(&self, entry_id: Uuid, cause: &AppError) -> Result<()> {
        match self.store.fail_claim(entry_id, &cause.to_string()).await {
            Ok(released) => {
                debug!(entry_id = %entry_id, released, "Claim released after persist error");
                Ok(())
            }
            Err(e) if e.is_store_unavailable() => {
                error!(error = %e, "Store unavailable, aborting run");
                Err(e)
            }
            Err(e) => {
                warn!(entry_id = %entry_id, error = %e, "Failed to release claim");
                Ok(())
            }
        }
    }

    async fn process(&self, entry: QueueEntry) -> Result<ItemOutcome> {
        let Some(food) = self.store.get_food(entry.food_id).await? else {
            warn!(entry_id = %entry.id, food_id = %entry.food_id, "Queued food no longer exists");
            self.store
                .mark_failed(entry.id, "food record not found")
                .await?;
            return Ok(ItemOutcome::Failed);
        };

        match self.lookup(&food).await {
            Ok(nutrients) => self.complete(entry, food, nutrients).await,
            Err(failure) => self.fail(entry, food, failure).await,
        }
    }

    /// Exactly one provider call, bounded by the provider timeout
    async fn lookup(&self, food: &FoodRecord) -> std::result::Result<Nutrients, LookupFailure> {
        let query = FoodQuery::from(food);
        // rate limiting is not provider latency
        self.provider.acquire().await;
        let started = Instant::now();
        let provider = self.provider.name();

        let outcome = match tokio::time::timeout(self.options.provider_timeout, self.provider.lookup(&query)).await {
            Ok(Ok(ProviderLookup::Found(nutrients))) => Ok(nutrients),
            Ok(Ok(ProviderLookup::NoMatch)) => Err(LookupFailure {
                kind: "no_match",
                reason: format!("no match from {} for '{}'", provider, query.search_text()),
            }),
            Ok(Err(e)) => Err(LookupFailure {
                kind: "error",
                reason: e.to_string(),
            }),
            Err(_) => Err(LookupFailure {
                kind: "timeout",
                reason: AppError::ProviderTimeout {
                    timeout_ms: self.options.provider_timeout.as_millis() as u64,
                }
                .to_string(),
            }),
        };

        let label = match &outcome {
            Ok(_) => "success",
            Err(f) => f.kind,
        };
        metrics::record_enrichment(provider, label, started.elapsed().as_secs_f64());
        outcome
    }

    async fn complete(&self, entry: QueueEntry, food: FoodRecord, incoming: Nutrients) -> Result<ItemOutcome> {
        let force = self.options.force_refresh;
        let provider = self.provider.name().to_string();

        let (food, (changed, report)) = self
            .write_back(food, |food| {
                let mut nutrients = food.nutrients();
                let changed = nutrients.merge_from(&incoming, force);
                food.set_nutrients(&nutrients);
                if !changed.is_empty() && (food.source.is_none() || force) {
                    food.source = Some(provider.clone());
                }

                let report = scoring::score(food);
                review::apply(food, &report);

                food.set_status(EnrichmentStatus::Completed);
                food.enrichment_error = None;
                food.failed_attempts = 0;
                food.last_enrichment = Some(Utc::now());
                (changed.len(), report)
            })
            .await?;
        metrics::record_quality_score(report.score);
        self.store.mark_completed(entry.id).await?;

        info!(
            food_id = %food.id,
            name = %food.name,
            fields_filled = changed,
            score = report.score,
            needs_review = food.needs_review,
            "Food enriched"
        );
        Ok(ItemOutcome::Completed)
    }

    async fn fail(&self, entry: QueueEntry, food: FoodRecord, failure: LookupFailure) -> Result<ItemOutcome> {
        let (food, ()) = self
            .write_back(food, |food| {
                food.set_status(EnrichmentStatus::Failed);
                food.enrichment_error = Some(failure.reason.clone());
                food.failed_attempts += 1;
                food.last_enrichment = Some(Utc::now());
            })
            .await?;
        self.store.mark_failed(entry.id, &failure.reason).await?;

        warn!(
            food_id = %food.id,
            name = %food.name,
            kind = failure.kind,
            reason = %failure.reason,
            failed_attempts = food.failed_attempts,
            "Enrichment failed"
        );
        Ok(ItemOutcome::Failed)
    }

    /// Apply `edit` and write the row, re-reading and re-applying when a
    /// concurrent pass (a flag, a manual clear) changed it first
    async fn write_back<T, F>(&self, mut food: FoodRecord, mut edit: F) -> Result<(FoodRecord, T)>
    where
        F: FnMut(&mut FoodRecord) -> T + Send,
        T: Send,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut next = food.clone();
            let out = edit(&mut next);
            if self.store.update_food(&next).await? {
                return Ok((next, out));
            }

            debug!(food_id = %food.id, "Food changed during enrichment, reapplying");
            food = self
                .store
                .get_food(food.id)
                .await?
                .ok_or_else(|| AppError::FoodNotFound {
                    id: food.id.to_string(),
                })?;
        }

        Err(AppError::Conflict {
            message: format!("food {} kept changing during enrichment", food.id),
        })
    }
}

fn lease_cutoff(lease: Duration) -> Option<DateTime<Utc>> {
    let lease = chrono::Duration::from_std(lease).ok()?;
    Utc::now().checked_sub_signed(lease)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewFood;
    use crate::db::testing::InterleavedStore;
    use crate::db::{FoodStore, MemoryStore};
    use crate::provider::{MockProvider, RateLimitedProvider};
    use crate::queue::EnrichmentQueue;
    use std::num::NonZeroU32;

    fn options() -> WorkerOptions {
        WorkerOptions {
            concurrency: 2,
            provider_timeout: Duration::from_millis(200),
            time_budget: Duration::from_secs(30),
            claim_lease: Duration::from_secs(60),
            force_refresh: false,
        }
    }

    fn brussels() -> Nutrients {
        Nutrients {
            calories: Some(43.0),
            protein_g: Some(3.4),
            carbs_g: Some(8.9),
            fat_g: Some(0.3),
            fiber_g: Some(3.8),
            vitamin_c_mg: Some(85.0),
            vitamin_k_mcg: Some(177.0),
            potassium_mg: Some(389.0),
            ..Default::default()
        }
    }

    async fn queued(store: &MemoryStore, name: &str, nutrients: Nutrients) -> FoodRecord {
        let food = FoodRecord::new(NewFood {
            name: name.into(),
            nutrients,
            ..Default::default()
        });
        store.insert_food(&food).await.unwrap();
        store.enqueue(food.id).await.unwrap();
        food
    }

    fn worker(store: &Arc<MemoryStore>, provider: MockProvider, options: WorkerOptions) -> EnrichmentWorker {
        EnrichmentWorker::new(store.clone(), Arc::new(provider), options)
    }

    #[tokio::test]
    async fn test_successful_enrichment() {
        let store = Arc::new(MemoryStore::new());
        let food = queued(&store, "Brussels Sprouts", Nutrients::default()).await;
        let w = worker(&store, MockProvider::new().with_food("brussels sprouts", brussels()), options());

        let summary = w.run_once(5).await.unwrap();
        assert_eq!(
            summary,
            RunSummary { processed: 1, successful: 1, failed: 0, remaining: 0 }
        );

        let stored = store.get_food(food.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), Some(EnrichmentStatus::Completed));
        assert_eq!(stored.calories, Some(43.0));
        assert_eq!(stored.source.as_deref(), Some("mock"));
        assert_eq!(stored.quality_score, Some(93));
        assert!(!stored.needs_review);
        assert!(stored.last_enrichment.is_some());

        // completed entries are not handed out again
        assert!(store.dequeue_batch(5).await.unwrap().is_empty());
        assert_eq!(store.stats().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_merge_keeps_known_values_unless_forced() {
        let store = Arc::new(MemoryStore::new());
        let known = Nutrients {
            calories: Some(50.0),
            ..Default::default()
        };
        let food = queued(&store, "Brussels Sprouts", known.clone()).await;
        let provider = || MockProvider::new().with_food("brussels sprouts", brussels());

        worker(&store, provider(), options()).run_once(1).await.unwrap();
        let stored = store.get_food(food.id).await.unwrap().unwrap();
        assert_eq!(stored.calories, Some(50.0));
        assert_eq!(stored.protein_g, Some(3.4));

        store.enqueue(food.id).await.unwrap();
        worker(&store, provider(), options())
            .with_force_refresh(true)
            .run_once(1)
            .await
            .unwrap();
        let stored = store.get_food(food.id).await.unwrap().unwrap();
        assert_eq!(stored.calories, Some(43.0));
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let store = Arc::new(MemoryStore::new());
        let good = queued(&store, "Brussels Sprouts", Nutrients::default()).await;
        let missing = queued(&store, "Mystery Meat", Nutrients::default()).await;
        let broken = queued(&store, "Broken", Nutrients::default()).await;
        let slow = queued(&store, "Slow", Nutrients::default()).await;

        let provider = MockProvider::new()
            .with_food("brussels sprouts", brussels())
            .with_failure("broken", "upstream 500")
            .with_hang("slow");
        let summary = worker(&store, provider, options()).run_once(10).await.unwrap();

        assert_eq!(summary.processed, 4);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 3);

        let good = store.get_food(good.id).await.unwrap().unwrap();
        assert_eq!(good.status(), Some(EnrichmentStatus::Completed));

        for (id, needle) in [(missing.id, "no match"), (broken.id, "upstream 500"), (slow.id, "timeout")] {
            let food = store.get_food(id).await.unwrap().unwrap();
            assert_eq!(food.status(), Some(EnrichmentStatus::Failed));
            assert_eq!(food.failed_attempts, 1);
            assert!(food.enrichment_error.as_deref().unwrap().contains(needle));
            assert_eq!(food.calories, None);
            let entry = store.entry_for(id).await.unwrap();
            assert_eq!(entry.status, "failed");
        }
    }

    #[tokio::test]
    async fn test_one_provider_call_per_item() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..3 {
            queued(&store, &format!("food {i}"), Nutrients::default()).await;
        }
        let provider = Arc::new(MockProvider::new());
        let w = EnrichmentWorker::new(store.clone(), provider.clone(), options());

        let summary = w.run_once(10).await.unwrap();
        assert_eq!(summary.failed, 3);
        assert_eq!(provider.calls(), 3);

        // failed items are left for the retry sweep, not retried here
        let summary = w.run_once(10).await.unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_batch_size_bounds_claims() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..7 {
            queued(&store, &format!("food {i}"), Nutrients::default()).await;
        }
        let summary = worker(&store, MockProvider::new(), options()).run_once(5).await.unwrap();
        assert_eq!(summary.processed, 5);
        assert_eq!(summary.remaining, 2);
    }

    #[tokio::test]
    async fn test_time_budget_stops_claiming() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..6 {
            queued(&store, &format!("food {i}"), Nutrients::default()).await;
        }
        let opts = WorkerOptions {
            concurrency: 2,
            time_budget: Duration::from_millis(20),
            ..options()
        };
        let provider = MockProvider::new().with_delay(Duration::from_millis(50));
        let summary = worker(&store, provider, opts).run_once(6).await.unwrap();

        // first chunk finishes, nothing further is claimed
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.remaining, 4);
        assert_eq!(store.stats().await.unwrap().processing, 0);
    }

    #[tokio::test]
    async fn test_store_outage_aborts_run() {
        let store = Arc::new(MemoryStore::new());
        queued(&store, "Rice", Nutrients::default()).await;
        store.set_unavailable(true);

        let err = worker(&store, MockProvider::new(), options())
            .run_once(5)
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[tokio::test]
    async fn test_rate_limit_wait_is_not_a_timeout() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..3 {
            queued(&store, &format!("food {i}"), Nutrients::default()).await;
        }
        let mut provider = MockProvider::new();
        for i in 0..3 {
            provider = provider.with_food(&format!("food {i}"), brussels());
        }
        let limited = RateLimitedProvider::new(Arc::new(provider), NonZeroU32::new(2).unwrap());
        let opts = WorkerOptions {
            concurrency: 1,
            provider_timeout: Duration::from_millis(150),
            ..options()
        };

        // the third call waits ~500ms for a token, well past the timeout
        let w = EnrichmentWorker::new(store.clone(), Arc::new(limited), opts);
        let summary = w.run_once(3).await.unwrap();
        assert_eq!(summary.successful, 3);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_abandoned_claims_are_released() {
        let store = Arc::new(MemoryStore::new());
        let food = queued(&store, "Rice", Nutrients::default()).await;
        // a worker that died after claiming
        let claimed = store.dequeue_batch(1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let opts = WorkerOptions {
            claim_lease: Duration::from_millis(1),
            ..options()
        };
        let summary = worker(&store, MockProvider::new(), opts).run_once(5).await.unwrap();
        assert_eq!(summary.processed, 0);

        let stored = store.get_food(food.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), Some(EnrichmentStatus::Failed));
        assert_eq!(stored.failed_attempts, 1);
        assert_eq!(stored.enrichment_error.as_deref(), Some("claim lease expired"));
        assert_eq!(store.entry_for(food.id).await.unwrap().status, "failed");
        assert_eq!(store.stats().await.unwrap().processing, 0);
    }

    #[tokio::test]
    async fn test_live_claims_survive_the_lease_check() {
        let store = Arc::new(MemoryStore::new());
        let held = queued(&store, "Held", Nutrients::default()).await;
        store.dequeue_batch(1).await.unwrap();

        worker(&store, MockProvider::new(), options()).run_once(5).await.unwrap();
        let stored = store.get_food(held.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), Some(EnrichmentStatus::Processing));
    }

    #[tokio::test]
    async fn test_persist_error_releases_claim() {
        let memory = Arc::new(MemoryStore::new());
        let food = queued(&memory, "Brussels Sprouts", Nutrients::default()).await;
        let store = Arc::new(InterleavedStore::new(memory.clone()));
        store.reject_updates(true);

        let provider = MockProvider::new().with_food("brussels sprouts", brussels());
        let w = EnrichmentWorker::new(store.clone(), Arc::new(provider), options());
        let summary = w.run_once(5).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 1);

        let entry = memory.entry_for(food.id).await.unwrap();
        assert_eq!(entry.status, "failed");
        assert!(entry.error_reason.as_deref().unwrap().contains("write rejected"));
        let stored = memory.get_food(food.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), Some(EnrichmentStatus::Failed));
        assert_eq!(stored.calories, None);
        assert_eq!(memory.stats().await.unwrap().processing, 0);
    }
}
