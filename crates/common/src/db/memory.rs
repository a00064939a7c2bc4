//! In-memory storage
//!
//! Mirrors the Postgres repository's semantics behind one mutex, so a claim
//! is atomic with respect to every other operation. Used by tests and by
//! the binaries when no database URL is configured.

use crate::db::models::*;
use crate::db::store::FoodStore;
use crate::errors::{AppError, Result};
use crate::queue::{claim_order, EnrichmentQueue, QueueStats};
use crate::scoring::ReviewFlag;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    foods: HashMap<Uuid, FoodRecord>,
    /// Keyed by food id; one entry per food
    queue: HashMap<Uuid, QueueEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the database connection dropped
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseConnection {
                message: "memory store marked unavailable".to_string(),
            });
        }
        Ok(())
    }

    /// Queue entry for a food, if one was ever armed
    pub async fn entry_for(&self, food_id: Uuid) -> Option<QueueEntry> {
        self.state.lock().await.queue.get(&food_id).cloned()
    }

    async fn finish_entry(&self, entry_id: Uuid, status: QueueStatus, reason: Option<&str>) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().await;

        let entry = state
            .queue
            .values_mut()
            .find(|e| e.id == entry_id && e.queue_status() == QueueStatus::Processing)
            .ok_or_else(|| AppError::QueueEntryNotFound {
                id: entry_id.to_string(),
            })?;

        entry.status = status.into();
        entry.error_reason = reason.map(str::to_string);
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn release<F>(&self, reason: &str, selected: F) -> Result<u64>
    where
        F: Fn(&QueueEntry) -> bool + Send,
    {
        self.check()?;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = Utc::now();
        let mut released = 0;

        for entry in state.queue.values_mut() {
            if entry.queue_status() != QueueStatus::Processing || !selected(entry) {
                continue;
            }
            entry.status = QueueStatus::Failed.into();
            entry.error_reason = Some(reason.to_string());
            entry.updated_at = now;
            released += 1;

            if let Some(food) = state.foods.get_mut(&entry.food_id) {
                if food.status() == Some(EnrichmentStatus::Processing) {
                    food.set_status(EnrichmentStatus::Failed);
                    food.enrichment_error = Some(reason.to_string());
                    food.failed_attempts += 1;
                    food.last_enrichment = Some(now);
                    food.updated_at = now;
                }
            }
        }
        Ok(released)
    }
}

fn is_active(entry: Option<&QueueEntry>) -> bool {
    entry.map(|e| e.queue_status().is_active()).unwrap_or(false)
}

#[async_trait]
impl FoodStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn insert_food(&self, food: &FoodRecord) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().await;
        if state.foods.contains_key(&food.id) {
            return Err(AppError::Conflict {
                message: format!("food {} already exists", food.id),
            });
        }
        state.foods.insert(food.id, food.clone());
        Ok(())
    }

    async fn get_food(&self, id: Uuid) -> Result<Option<FoodRecord>> {
        self.check()?;
        Ok(self.state.lock().await.foods.get(&id).cloned())
    }

    async fn update_food(&self, food: &FoodRecord) -> Result<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        let slot = state
            .foods
            .get_mut(&food.id)
            .ok_or_else(|| AppError::FoodNotFound {
                id: food.id.to_string(),
            })?;
        if slot.updated_at != food.updated_at {
            return Ok(false);
        }
        *slot = food.clone();
        slot.updated_at = Utc::now();
        Ok(true)
    }

    async fn add_flag(&self, id: Uuid, flag: ReviewFlag) -> Result<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.foods.get_mut(&id) {
            Some(food) if !food.has_flag(flag.as_str()) => {
                food.review_flags.push(flag.as_str().to_string());
                food.needs_review = true;
                food.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_flag(&self, id: Uuid, flag: ReviewFlag) -> Result<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.foods.get_mut(&id) {
            Some(food) if food.has_flag(flag.as_str()) => {
                food.review_flags.retain(|f| f != flag.as_str());
                food.needs_review = !food.review_flags.is_empty();
                if flag == ReviewFlag::MaxCorrectionAttemptsExceeded {
                    food.failed_attempts = 0;
                }
                food.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_stale_failures(&self, cutoff: DateTime<Utc>, limit: u64) -> Result<Vec<FoodRecord>> {
        self.check()?;
        let state = self.state.lock().await;
        let parked = ReviewFlag::MaxCorrectionAttemptsExceeded.as_str();

        let mut stale: Vec<FoodRecord> = state
            .foods
            .values()
            .filter(|f| f.status() == Some(EnrichmentStatus::Failed))
            .filter(|f| f.last_enrichment.map(|t| t < cutoff).unwrap_or(true))
            .filter(|f| !f.has_flag(parked))
            .cloned()
            .collect();
        stale.sort_by_key(|f| f.last_enrichment);
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn reset_for_retry(&self, id: Uuid) -> Result<bool> {
        self.check()?;
        let mut state = self.state.lock().await;
        match state.foods.get_mut(&id) {
            Some(food) if food.status() == Some(EnrichmentStatus::Failed) => {
                food.set_status(EnrichmentStatus::Pending);
                food.last_enrichment = None;
                food.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_needing_review(&self, limit: u64) -> Result<Vec<FoodRecord>> {
        self.check()?;
        let state = self.state.lock().await;
        let mut flagged: Vec<FoodRecord> = state
            .foods
            .values()
            .filter(|f| f.needs_review)
            .cloned()
            .collect();
        // DESC NULLS LAST
        flagged.sort_by(|a, b| {
            match (a.last_verification, b.last_verification) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then_with(|| a.name.cmp(&b.name))
        });
        flagged.truncate(limit as usize);
        Ok(flagged)
    }

    async fn list_for_verification(&self, limit: u64) -> Result<Vec<FoodRecord>> {
        self.check()?;
        let state = self.state.lock().await;
        let mut due: Vec<FoodRecord> = state
            .foods
            .values()
            .filter(|f| match f.status() {
                Some(EnrichmentStatus::Completed) | Some(EnrichmentStatus::Verified) => true,
                Some(EnrichmentStatus::Failed) => f.needs_review,
                _ => false,
            })
            .filter(|f| !is_active(state.queue.get(&f.id)))
            .cloned()
            .collect();
        due.sort_by_key(|f| (f.last_verification, f.created_at));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn list_all(&self) -> Result<Vec<FoodRecord>> {
        self.check()?;
        let state = self.state.lock().await;
        let mut all: Vec<FoodRecord> = state.foods.values().cloned().collect();
        all.sort_by_key(|f| f.created_at);
        Ok(all)
    }

    async fn find_enrichment_candidates(&self, threshold: i32, limit: u64) -> Result<Vec<Uuid>> {
        self.check()?;
        let state = self.state.lock().await;
        let parked = ReviewFlag::MaxCorrectionAttemptsExceeded.as_str();
        let mut candidates: Vec<&FoodRecord> = state
            .foods
            .values()
            .filter(|f| match f.status() {
                None | Some(EnrichmentStatus::Pending) => true,
                Some(EnrichmentStatus::Completed) | Some(EnrichmentStatus::Verified) => {
                    f.quality_score.map(|s| s < threshold).unwrap_or(true)
                }
                _ => false,
            })
            .filter(|f| !f.has_flag(parked))
            .filter(|f| !is_active(state.queue.get(&f.id)))
            .collect();
        candidates.sort_by_key(|f| (f.quality_score, f.created_at));
        Ok(candidates
            .into_iter()
            .take(limit as usize)
            .map(|f| f.id)
            .collect())
    }
}

#[async_trait]
impl EnrichmentQueue for MemoryStore {
    async fn enqueue(&self, food_id: Uuid) -> Result<bool> {
        self.check()?;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let food = state
            .foods
            .get_mut(&food_id)
            .ok_or_else(|| AppError::FoodNotFound {
                id: food_id.to_string(),
            })?;

        if is_active(state.queue.get(&food_id)) {
            return Ok(false);
        }

        let now = Utc::now();
        let priority = food.quality_score;
        food.set_status(EnrichmentStatus::Pending);
        food.updated_at = now;

        match state.queue.get_mut(&food_id) {
            Some(entry) => {
                entry.status = QueueStatus::Pending.into();
                entry.priority_score = priority;
                entry.error_reason = None;
                entry.updated_at = now;
            }
            None => {
                state.queue.insert(
                    food_id,
                    QueueEntry {
                        id: Uuid::new_v4(),
                        food_id,
                        status: QueueStatus::Pending.into(),
                        priority_score: priority,
                        attempt_count: 0,
                        last_attempt_at: None,
                        error_reason: None,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(true)
    }

    async fn dequeue_batch(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        self.check()?;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let mut pending: Vec<&mut QueueEntry> = state
            .queue
            .values_mut()
            .filter(|e| e.queue_status() == QueueStatus::Pending)
            .collect();
        pending.sort_by(|a, b| claim_order(a, b));

        let now = Utc::now();
        let mut claimed = Vec::new();
        for entry in pending.into_iter().take(limit) {
            entry.status = QueueStatus::Processing.into();
            entry.attempt_count += 1;
            entry.last_attempt_at = Some(now);
            entry.updated_at = now;
            claimed.push(entry.clone());
        }

        for entry in &claimed {
            if let Some(food) = state.foods.get_mut(&entry.food_id) {
                food.set_status(EnrichmentStatus::Processing);
                food.updated_at = now;
            }
        }

        Ok(claimed)
    }

    async fn mark_completed(&self, entry_id: Uuid) -> Result<()> {
        self.finish_entry(entry_id, QueueStatus::Completed, None).await
    }

    async fn mark_failed(&self, entry_id: Uuid, reason: &str) -> Result<()> {
        self.finish_entry(entry_id, QueueStatus::Failed, Some(reason)).await
    }

    async fn fail_claim(&self, entry_id: Uuid, reason: &str) -> Result<bool> {
        Ok(self.release(reason, |e| e.id == entry_id).await? > 0)
    }

    async fn expire_claims(&self, claimed_before: DateTime<Utc>, reason: &str) -> Result<u64> {
        self.release(reason, |e| {
            e.last_attempt_at.map(|t| t < claimed_before).unwrap_or(false)
        })
        .await
    }

    async fn stats(&self) -> Result<QueueStats> {
        self.check()?;
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for entry in state.queue.values() {
            stats.record(&entry.status, 1);
        }
        Ok(stats)
    }
}
