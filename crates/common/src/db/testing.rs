//! Test wrapper around [`MemoryStore`] for interleaving scenarios

use super::{FoodStore, MemoryStore};
use crate::db::models::{FoodRecord, QueueEntry};
use crate::errors::{AppError, Result};
use crate::queue::{EnrichmentQueue, QueueStats};
use crate::scoring::ReviewFlag;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Delegates to a shared [`MemoryStore`], running a one-shot hook right
/// after the next listing read and optionally failing whole-row writes.
pub(crate) struct InterleavedStore {
    inner: Arc<MemoryStore>,
    after_listing: Mutex<Option<BoxFuture<'static, ()>>>,
    reject_updates: AtomicBool,
}

impl InterleavedStore {
    pub(crate) fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            after_listing: Mutex::new(None),
            reject_updates: AtomicBool::new(false),
        }
    }

    /// Run `hook` once, between the next listing read and its caller's writes
    pub(crate) async fn after_next_listing(&self, hook: BoxFuture<'static, ()>) {
        *self.after_listing.lock().await = Some(hook);
    }

    pub(crate) fn reject_updates(&self, reject: bool) {
        self.reject_updates.store(reject, Ordering::SeqCst);
    }

    async fn run_hook(&self) {
        let hook = self.after_listing.lock().await.take();
        if let Some(hook) = hook {
            hook.await;
        }
    }
}

#[async_trait]
impl FoodStore for InterleavedStore {
    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn insert_food(&self, food: &FoodRecord) -> Result<()> {
        self.inner.insert_food(food).await
    }

    async fn get_food(&self, id: Uuid) -> Result<Option<FoodRecord>> {
        self.inner.get_food(id).await
    }

    async fn update_food(&self, food: &FoodRecord) -> Result<bool> {
        if self.reject_updates.load(Ordering::SeqCst) {
            return Err(AppError::Internal {
                message: "write rejected".to_string(),
            });
        }
        self.inner.update_food(food).await
    }

    async fn add_flag(&self, id: Uuid, flag: ReviewFlag) -> Result<bool> {
        self.inner.add_flag(id, flag).await
    }

    async fn remove_flag(&self, id: Uuid, flag: ReviewFlag) -> Result<bool> {
        self.inner.remove_flag(id, flag).await
    }

    async fn find_stale_failures(&self, cutoff: DateTime<Utc>, limit: u64) -> Result<Vec<FoodRecord>> {
        let stale = self.inner.find_stale_failures(cutoff, limit).await?;
        self.run_hook().await;
        Ok(stale)
    }

    async fn reset_for_retry(&self, id: Uuid) -> Result<bool> {
        self.inner.reset_for_retry(id).await
    }

    async fn list_needing_review(&self, limit: u64) -> Result<Vec<FoodRecord>> {
        self.inner.list_needing_review(limit).await
    }

    async fn list_for_verification(&self, limit: u64) -> Result<Vec<FoodRecord>> {
        let due = self.inner.list_for_verification(limit).await?;
        self.run_hook().await;
        Ok(due)
    }

    async fn list_all(&self) -> Result<Vec<FoodRecord>> {
        let all = self.inner.list_all().await?;
        self.run_hook().await;
        Ok(all)
    }

    async fn find_enrichment_candidates(&self, threshold: i32, limit: u64) -> Result<Vec<Uuid>> {
        self.inner.find_enrichment_candidates(threshold, limit).await
    }
}

#[async_trait]
impl EnrichmentQueue for InterleavedStore {
    async fn enqueue(&self, food_id: Uuid) -> Result<bool> {
        self.inner.enqueue(food_id).await
    }

    async fn dequeue_batch(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        self.inner.dequeue_batch(limit).await
    }

    async fn mark_completed(&self, entry_id: Uuid) -> Result<()> {
        self.inner.mark_completed(entry_id).await
    }

    async fn mark_failed(&self, entry_id: Uuid, reason: &str) -> Result<()> {
        self.inner.mark_failed(entry_id, reason).await
    }

    async fn fail_claim(&self, entry_id: Uuid, reason: &str) -> Result<bool> {
        self.inner.fail_claim(entry_id, reason).await
    }

    async fn expire_claims(&self, claimed_before: DateTime<Utc>, reason: &str) -> Result<u64> {
        self.inner.expire_claims(claimed_before, reason).await
    }

    async fn stats(&self) -> Result<QueueStats> {
        self.inner.stats().await
    }
}
