//! Storage contract for food records
//!
//! Implemented by the Postgres [`Repository`](super::Repository) and by
//! the in-memory [`MemoryStore`](super::MemoryStore) used in tests and
//! mock mode.

use crate::db::models::FoodRecord;
use crate::errors::Result;
use crate::queue::EnrichmentQueue;
use crate::scoring::ReviewFlag;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Read/update access to food records
#[async_trait]
pub trait FoodStore: Send + Sync {
    /// Check connectivity
    async fn ping(&self) -> Result<()>;

    async fn insert_food(&self, food: &FoodRecord) -> Result<()>;

    async fn get_food(&self, id: Uuid) -> Result<Option<FoodRecord>>;

    /// Persist every mutable column of `food` if the stored row still has
    /// `food.updated_at`; bumps `updated_at`.
    ///
    /// Returns `false` when the row changed since `food` was read.
    async fn update_food(&self, food: &FoodRecord) -> Result<bool>;

    /// Append `flag` and set `needs_review`, leaving every other column
    /// alone. Returns `false` if the flag was already present.
    async fn add_flag(&self, id: Uuid, flag: ReviewFlag) -> Result<bool>;

    /// Remove `flag`; `needs_review` follows the remaining flags. Removing
    /// `MAX_CORRECTION_ATTEMPTS_EXCEEDED` also zeroes `failed_attempts`.
    /// Returns `false` if the flag was not present.
    async fn remove_flag(&self, id: Uuid, flag: ReviewFlag) -> Result<bool>;

    /// Failed records last attempted before `cutoff` that are not parked
    /// with `MAX_CORRECTION_ATTEMPTS_EXCEEDED`, oldest first
    async fn find_stale_failures(&self, cutoff: DateTime<Utc>, limit: u64) -> Result<Vec<FoodRecord>>;

    /// `failed -> pending` with `last_enrichment` cleared.
    ///
    /// Returns `false` if the record was no longer failed.
    async fn reset_for_retry(&self, id: Uuid) -> Result<bool>;

    /// Flagged records, most recently verified first (never verified last)
    async fn list_needing_review(&self, limit: u64) -> Result<Vec<FoodRecord>>;

    /// Records due for re-verification, least recently verified first.
    ///
    /// Records that are queued or being enriched are left out.
    async fn list_for_verification(&self, limit: u64) -> Result<Vec<FoodRecord>>;

    /// Every record, oldest first
    async fn list_all(&self) -> Result<Vec<FoodRecord>>;

    /// Records with no active queue entry that either have null/pending
    /// status or finished enrichment scoring below `threshold`
    async fn find_enrichment_candidates(&self, threshold: i32, limit: u64) -> Result<Vec<Uuid>>;
}

/// Everything the pipeline needs from its backing store
pub trait PipelineStore: FoodStore + EnrichmentQueue {}

impl<T: FoodStore + EnrichmentQueue> PipelineStore for T {}
