//! Postgres-backed storage
//!
//! Simple lookups go through the SeaORM query builder; the queue claim and
//! re-arm paths are single raw statements so they stay atomic under
//! concurrent workers.

use crate::db::models::*;
use crate::db::store::FoodStore;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::queue::{EnrichmentQueue, QueueStats};
use crate::scoring::ReviewFlag;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{NullOrdering, Order};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, Statement,
};
use uuid::Uuid;

/// Re-arms the food's queue entry unless it is already active, and moves
/// the food back to `pending` in the same statement.
const ENQUEUE_SQL: &str = r#"
WITH armed AS (
    INSERT INTO enrichment_queue (id, food_id, status, priority_score, attempt_count, created_at, updated_at)
    SELECT $1, f.id, 'pending', f.quality_score, 0, NOW(), NOW()
    FROM foods f
    WHERE f.id = $2
    ON CONFLICT (food_id) DO UPDATE
        SET status = 'pending',
            priority_score = EXCLUDED.priority_score,
            error_reason = NULL,
            updated_at = NOW()
        WHERE enrichment_queue.status NOT IN ('pending', 'processing')
    RETURNING food_id
)
UPDATE foods
SET enrichment_status = 'pending', updated_at = NOW()
FROM armed
WHERE foods.id = armed.food_id
RETURNING foods.id
"#;

/// Claims pending entries with row locks; rows locked by another claimer
/// are skipped rather than waited on. Rows come back in claim order, using
/// each entry's `last_attempt_at` from before this claim.
const CLAIM_SQL: &str = r#"
WITH claimable AS (
    SELECT id, last_attempt_at
    FROM enrichment_queue
    WHERE status = 'pending'
    ORDER BY priority_score ASC NULLS FIRST, last_attempt_at ASC NULLS FIRST, created_at ASC
    LIMIT $1
    FOR UPDATE SKIP LOCKED
),
claimed AS (
    UPDATE enrichment_queue q
    SET status = 'processing',
        attempt_count = q.attempt_count + 1,
        last_attempt_at = NOW(),
        updated_at = NOW()
    FROM claimable c
    WHERE q.id = c.id
    RETURNING q.*
),
touched AS (
    UPDATE foods f
    SET enrichment_status = 'processing', updated_at = NOW()
    FROM claimed
    WHERE f.id = claimed.food_id
)
SELECT claimed.*
FROM claimed
JOIN claimable c ON c.id = claimed.id
ORDER BY claimed.priority_score ASC NULLS FIRST, c.last_attempt_at ASC NULLS FIRST, claimed.created_at ASC
"#;

/// Fails claimed entries matching `{filter}` together with their foods.
/// The food only moves if it is still `processing`.
const RELEASE_SQL: &str = r#"
WITH released AS (
    UPDATE enrichment_queue
    SET status = 'failed', error_reason = $1, updated_at = NOW()
    WHERE status = 'processing' AND {filter}
    RETURNING food_id
),
failed_foods AS (
    UPDATE foods f
    SET enrichment_status = 'failed',
        enrichment_error = $1,
        failed_attempts = f.failed_attempts + 1,
        last_enrichment = NOW(),
        updated_at = NOW()
    FROM released
    WHERE f.id = released.food_id AND f.enrichment_status = 'processing'
)
SELECT COUNT(*)::BIGINT FROM released
"#;

/// Queue-aware verification listing: nothing queued or mid-enrichment
const VERIFICATION_SQL: &str = r#"
SELECT f.*
FROM foods f
LEFT JOIN enrichment_queue q ON q.food_id = f.id
WHERE (f.enrichment_status IN ('completed', 'verified')
       OR (f.needs_review AND f.enrichment_status IS NOT NULL))
  AND f.enrichment_status NOT IN ('pending', 'processing')
  AND (q.id IS NULL OR q.status NOT IN ('pending', 'processing'))
ORDER BY f.last_verification ASC NULLS FIRST, f.created_at ASC
LIMIT $1
"#;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.conn()
    }

    async fn finish_entry(&self, entry_id: Uuid, status: QueueStatus, reason: Option<&str>) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE enrichment_queue \
             SET status = $1, error_reason = $2, updated_at = NOW() \
             WHERE id = $3 AND status = 'processing'",
            vec![
                status.as_str().into(),
                reason.map(str::to_string).into(),
                entry_id.into(),
            ],
        );

        let result = self.conn().execute(stmt).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::QueueEntryNotFound {
                id: entry_id.to_string(),
            });
        }
        Ok(())
    }

    async fn release(&self, filter: &str, reason: &str, key: sea_orm::Value) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            RELEASE_SQL.replace("{filter}", filter),
            vec![reason.into(), key],
        );

        let released = match self.conn().query_one(stmt).await? {
            Some(row) => row.try_get_by_index::<i64>(0)?,
            None => 0,
        };
        Ok(released.max(0) as u64)
    }

    async fn food_exists(&self, id: Uuid) -> Result<bool> {
        Ok(FoodEntity::find_by_id(id).one(self.conn()).await?.is_some())
    }
}

#[async_trait]
impl FoodStore for Repository {
    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    async fn insert_food(&self, food: &FoodRecord) -> Result<()> {
        let model = FoodActiveModel::from(food.clone()).reset_all();
        FoodEntity::insert(model).exec(self.conn()).await?;
        Ok(())
    }

    async fn get_food(&self, id: Uuid) -> Result<Option<FoodRecord>> {
        FoodEntity::find_by_id(id)
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn update_food(&self, food: &FoodRecord) -> Result<bool> {
        let mut model = FoodActiveModel::from(food.clone()).reset_all();
        model.updated_at = Set(Utc::now());

        let result = FoodEntity::update_many()
            .set(model)
            .filter(FoodColumn::Id.eq(food.id))
            .filter(FoodColumn::UpdatedAt.eq(food.updated_at))
            .exec(self.conn())
            .await?;

        if result.rows_affected > 0 {
            return Ok(true);
        }
        if !self.food_exists(food.id).await? {
            return Err(AppError::FoodNotFound {
                id: food.id.to_string(),
            });
        }
        Ok(false)
    }

    async fn add_flag(&self, id: Uuid, flag: ReviewFlag) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE foods \
             SET review_flags = array_append(review_flags, $2::TEXT), \
                 needs_review = TRUE, \
                 updated_at = NOW() \
             WHERE id = $1 AND NOT ($2::TEXT = ANY(review_flags))",
            vec![id.into(), flag.as_str().into()],
        );

        let result = self.conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_flag(&self, id: Uuid, flag: ReviewFlag) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE foods \
             SET review_flags = array_remove(review_flags, $2::TEXT), \
                 needs_review = cardinality(array_remove(review_flags, $2::TEXT)) > 0, \
                 failed_attempts = CASE WHEN $3 THEN 0 ELSE failed_attempts END, \
                 updated_at = NOW() \
             WHERE id = $1 AND $2::TEXT = ANY(review_flags)",
            vec![
                id.into(),
                flag.as_str().into(),
                (flag == ReviewFlag::MaxCorrectionAttemptsExceeded).into(),
            ],
        );

        let result = self.conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_stale_failures(&self, cutoff: DateTime<Utc>, limit: u64) -> Result<Vec<FoodRecord>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT * FROM foods \
             WHERE enrichment_status = 'failed' \
               AND (last_enrichment IS NULL OR last_enrichment < $1) \
               AND NOT ($2 = ANY(review_flags)) \
             ORDER BY last_enrichment ASC NULLS FIRST \
             LIMIT $3",
            vec![
                cutoff.into(),
                ReviewFlag::MaxCorrectionAttemptsExceeded.as_str().into(),
                (limit as i64).into(),
            ],
        );

        FoodEntity::find()
            .from_raw_sql(stmt)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn reset_for_retry(&self, id: Uuid) -> Result<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE foods \
             SET enrichment_status = 'pending', last_enrichment = NULL, updated_at = NOW() \
             WHERE id = $1 AND enrichment_status = 'failed'",
            vec![id.into()],
        );

        let result = self.conn().execute(stmt).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_needing_review(&self, limit: u64) -> Result<Vec<FoodRecord>> {
        FoodEntity::find()
            .filter(FoodColumn::NeedsReview.eq(true))
            .order_by_with_nulls(FoodColumn::LastVerification, Order::Desc, NullOrdering::Last)
            .order_by_asc(FoodColumn::Name)
            .limit(limit)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn list_for_verification(&self, limit: u64) -> Result<Vec<FoodRecord>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            VERIFICATION_SQL,
            vec![(limit as i64).into()],
        );

        FoodEntity::find()
            .from_raw_sql(stmt)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn list_all(&self) -> Result<Vec<FoodRecord>> {
        FoodEntity::find()
            .order_by_asc(FoodColumn::CreatedAt)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn find_enrichment_candidates(&self, threshold: i32, limit: u64) -> Result<Vec<Uuid>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT f.id FROM foods f \
             LEFT JOIN enrichment_queue q ON q.food_id = f.id \
             WHERE (f.enrichment_status IS NULL \
                    OR f.enrichment_status = 'pending' \
                    OR (f.enrichment_status IN ('completed', 'verified') \
                        AND (f.quality_score IS NULL OR f.quality_score < $1))) \
               AND NOT ($2 = ANY(f.review_flags)) \
               AND (q.id IS NULL OR q.status NOT IN ('pending', 'processing')) \
             ORDER BY f.quality_score ASC NULLS FIRST, f.created_at ASC \
             LIMIT $3",
            vec![
                threshold.into(),
                ReviewFlag::MaxCorrectionAttemptsExceeded.as_str().into(),
                (limit as i64).into(),
            ],
        );

        let rows = self.conn().query_all(stmt).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get_by_index::<Uuid>(0).ok())
            .collect())
    }
}

#[async_trait]
impl EnrichmentQueue for Repository {
    async fn enqueue(&self, food_id: Uuid) -> Result<bool> {
        if FoodEntity::find_by_id(food_id).one(self.conn()).await?.is_none() {
            return Err(AppError::FoodNotFound {
                id: food_id.to_string(),
            });
        }

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            ENQUEUE_SQL,
            vec![Uuid::new_v4().into(), food_id.into()],
        );

        Ok(self.conn().query_one(stmt).await?.is_some())
    }

    async fn dequeue_batch(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            CLAIM_SQL,
            vec![(limit as i64).into()],
        );

        QueueEntryEntity::find()
            .from_raw_sql(stmt)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn mark_completed(&self, entry_id: Uuid) -> Result<()> {
        self.finish_entry(entry_id, QueueStatus::Completed, None).await
    }

    async fn mark_failed(&self, entry_id: Uuid, reason: &str) -> Result<()> {
        self.finish_entry(entry_id, QueueStatus::Failed, Some(reason)).await
    }

    async fn fail_claim(&self, entry_id: Uuid, reason: &str) -> Result<bool> {
        Ok(self.release("id = $2", reason, entry_id.into()).await? > 0)
    }

    async fn expire_claims(&self, claimed_before: DateTime<Utc>, reason: &str) -> Result<u64> {
        self.release("last_attempt_at < $2", reason, claimed_before.into())
            .await
    }

    async fn stats(&self) -> Result<QueueStats> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT status, COUNT(*)::BIGINT FROM enrichment_queue GROUP BY status",
        );

        let mut stats = QueueStats::default();
        for row in self.conn().query_all(stmt).await? {
            let status = row.try_get_by_index::<String>(0)?;
            let count = row.try_get_by_index::<i64>(1)?;
            stats.record(&status, count.max(0) as u64);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::collections::HashSet;

    /// Fresh schema on the database named by `NUTRIFORGE_TEST_DATABASE_URL`
    async fn repository() -> Option<Repository> {
        let url = std::env::var("NUTRIFORGE_TEST_DATABASE_URL").ok()?;
        let mut config = AppConfig::default().database;
        config.url = url;

        let pool = DbPool::new(&config).await.unwrap();
        pool.run_migrations().await.unwrap();
        pool.conn()
            .execute_unprepared("TRUNCATE enrichment_queue, foods")
            .await
            .unwrap();
        Some(Repository::new(pool))
    }

    async fn insert(repo: &Repository, name: &str, score: Option<i32>) -> FoodRecord {
        let mut food = FoodRecord::new(NewFood {
            name: name.to_string(),
            ..Default::default()
        });
        food.quality_score = score;
        repo.insert_food(&food).await.unwrap();
        food
    }

    #[tokio::test]
    #[ignore = "needs NUTRIFORGE_TEST_DATABASE_URL"]
    async fn test_postgres_queue_semantics() {
        let Some(repo) = repository().await else {
            return;
        };

        // enqueue is idempotent while the entry is active
        let oats = insert(&repo, "Oats", Some(40)).await;
        assert!(repo.enqueue(oats.id).await.unwrap());
        assert!(!repo.enqueue(oats.id).await.unwrap());
        assert_eq!(repo.stats().await.unwrap().pending, 1);
        let claimed = repo.dequeue_batch(5).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(!repo.enqueue(oats.id).await.unwrap());
        repo.mark_failed(claimed[0].id, "no match").await.unwrap();
        assert!(repo.enqueue(oats.id).await.unwrap());

        // unscored first, then low scores, retried entries after fresh ones
        let low = insert(&repo, "Low", Some(10)).await;
        let unscored = insert(&repo, "Unscored", None).await;
        let high = insert(&repo, "High", Some(60)).await;
        let fresh = insert(&repo, "Fresh", Some(40)).await;
        for f in [&high, &low, &unscored, &fresh] {
            repo.enqueue(f.id).await.unwrap();
        }
        let order: Vec<Uuid> = repo
            .dequeue_batch(5)
            .await
            .unwrap()
            .iter()
            .map(|e| e.food_id)
            .collect();
        assert_eq!(order, vec![unscored.id, low.id, fresh.id, oats.id, high.id]);
        let food = repo.get_food(low.id).await.unwrap().unwrap();
        assert_eq!(food.status(), Some(EnrichmentStatus::Processing));

        // abandoned claims are failed with their foods
        let released = repo
            .expire_claims(Utc::now() + chrono::Duration::seconds(5), "claim lease expired")
            .await
            .unwrap();
        assert_eq!(released, 5);
        let food = repo.get_food(low.id).await.unwrap().unwrap();
        assert_eq!(food.status(), Some(EnrichmentStatus::Failed));
        assert_eq!(food.failed_attempts, 1);
        assert_eq!(repo.stats().await.unwrap().processing, 0);

        // concurrent claimers never share an entry
        let mut ids = Vec::new();
        for i in 0..40 {
            ids.push(insert(&repo, &format!("food-{i}"), Some(i)).await.id);
        }
        for id in &ids {
            repo.enqueue(*id).await.unwrap();
        }
        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    let batch = repo.dequeue_batch(3).await.unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    mine.extend(batch.into_iter().map(|e| e.id));
                }
                mine
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "entry claimed twice");
            }
        }
        assert_eq!(seen.len(), 40);

        check_targeted_writes(&repo).await;
    }

    async fn check_targeted_writes(repo: &Repository) {
        let mut food = FoodRecord::new(NewFood {
            name: "Barley".to_string(),
            ..Default::default()
        });
        food.failed_attempts = 3;
        repo.insert_food(&food).await.unwrap();
        let stale = repo.get_food(food.id).await.unwrap().unwrap();

        assert!(repo.add_flag(food.id, ReviewFlag::MaxCorrectionAttemptsExceeded).await.unwrap());
        assert!(!repo.add_flag(food.id, ReviewFlag::MaxCorrectionAttemptsExceeded).await.unwrap());
        // the flag write moved updated_at, so the older snapshot is refused
        assert!(!repo.update_food(&stale).await.unwrap());

        let flagged = repo.get_food(food.id).await.unwrap().unwrap();
        assert!(flagged.needs_review);
        assert_eq!(flagged.review_flags, vec!["MAX_CORRECTION_ATTEMPTS_EXCEEDED".to_string()]);

        let mut edited = flagged.clone();
        edited.category = Some("Grains".into());
        assert!(repo.update_food(&edited).await.unwrap());

        assert!(repo.remove_flag(food.id, ReviewFlag::MaxCorrectionAttemptsExceeded).await.unwrap());
        let cleared = repo.get_food(food.id).await.unwrap().unwrap();
        assert!(!cleared.needs_review);
        assert_eq!(cleared.failed_attempts, 0);
        assert_eq!(cleared.category.as_deref(), Some("Grains"));
    }
}
