//! Enrichment queue contract
//!
//! The queue only indexes which food records are due for enrichment; it
//! never holds nutrient data. Implementations must make `dequeue_batch`
//! a single atomic claim so concurrent workers never share an entry.

use crate::db::models::QueueEntry;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Durable work queue of food IDs
#[async_trait]
pub trait EnrichmentQueue: Send + Sync {
    /// Arm an entry for `food_id`.
    ///
    /// Returns `false` when the food already has an active entry.
    async fn enqueue(&self, food_id: Uuid) -> Result<bool>;

    /// Atomically claim up to `limit` pending entries, in claim order.
    async fn dequeue_batch(&self, limit: usize) -> Result<Vec<QueueEntry>>;

    /// Terminal success for a claimed entry
    async fn mark_completed(&self, entry_id: Uuid) -> Result<()>;

    /// Terminal failure for a claimed entry
    async fn mark_failed(&self, entry_id: Uuid, reason: &str) -> Result<()>;

    /// Release a claim whose result could not be recorded.
    ///
    /// Fails the entry and, if still `processing`, its food. Returns
    /// `false` when the entry was no longer claimed.
    async fn fail_claim(&self, entry_id: Uuid, reason: &str) -> Result<bool>;

    /// Fail every claim taken before `claimed_before`, the same way as
    /// [`fail_claim`](Self::fail_claim). Returns how many were released.
    async fn expire_claims(&self, claimed_before: DateTime<Utc>, reason: &str) -> Result<u64>;

    /// Entry counts per status
    async fn stats(&self) -> Result<QueueStats>;
}

/// Entry counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn record(&mut self, status: &str, count: u64) {
        match status {
            "pending" => self.pending += count,
            "processing" => self.processing += count,
            "completed" => self.completed += count,
            "failed" => self.failed += count,
            other => tracing::warn!(status = other, "Unknown queue status in stats"),
        }
    }

    pub fn active(&self) -> u64 {
        self.pending + self.processing
    }
}

/// Order in which pending entries are claimed.
///
/// Lowest priority score first (unscored records before everything),
/// then never-attempted before retried, then oldest first.
pub fn claim_order(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    a.priority_score
        .cmp(&b.priority_score)
        .then_with(|| a.last_attempt_at.cmp(&b.last_attempt_at))
        .then_with(|| a.created_at.cmp(&b.created_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::QueueStatus;
    use chrono::{Duration, Utc};

    fn entry(priority: Option<i32>, attempted_ago: Option<i64>) -> QueueEntry {
        let now = Utc::now();
        QueueEntry {
            id: Uuid::new_v4(),
            food_id: Uuid::new_v4(),
            status: QueueStatus::Pending.into(),
            priority_score: priority,
            attempt_count: 0,
            last_attempt_at: attempted_ago.map(|h| now - Duration::hours(h)),
            error_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_unscored_records_claimed_first() {
        let mut entries = vec![entry(Some(40), None), entry(None, None), entry(Some(10), None)];
        entries.sort_by(claim_order);
        let order: Vec<_> = entries.iter().map(|e| e.priority_score).collect();
        assert_eq!(order, vec![None, Some(10), Some(40)]);
    }

    #[test]
    fn test_never_attempted_before_retried() {
        let retried = entry(Some(0), Some(30));
        let fresh = entry(Some(0), None);
        let mut entries = vec![retried.clone(), fresh.clone()];
        entries.sort_by(claim_order);
        assert_eq!(entries[0].id, fresh.id);
        assert_eq!(entries[1].id, retried.id);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = QueueStats::default();
        stats.record("pending", 3);
        stats.record("processing", 2);
        stats.record("failed", 1);
        assert_eq!(stats.active(), 5);
        assert_eq!(stats.failed, 1);
    }
}
