//! Retry sweep trigger

use axum::{extract::State, Json};
use serde::Deserialize;
use validator::Validate;

use super::validated;
use crate::AppState;
use nutriforge_common::{
    errors::Result,
    retry::{RetryScheduler, SweepReport},
};

#[derive(Debug, Default, Deserialize, Validate)]
pub struct SweepRequest {
    /// Overrides retry.cooldown_hours
    #[validate(range(min = 0, max = 720))]
    pub cooldown_hours: Option<i64>,
}

pub async fn sweep(
    State(state): State<AppState>,
    body: Option<Json<SweepRequest>>,
) -> Result<Json<SweepReport>> {
    let request = validated(body.map(|Json(r)| r).unwrap_or_default())?;
    let cooldown = request
        .cooldown_hours
        .map(chrono::Duration::hours)
        .unwrap_or_else(|| state.config.retry_cooldown());

    let scheduler = RetryScheduler::new(
        state.store.clone(),
        state.config.retry.max_attempts,
        state.config.retry.sweep_limit,
    )
    .with_claim_lease(state.config.claim_lease());
    Ok(Json(scheduler.sweep_stale_failures(cooldown).await?))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{send, state_with};
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use nutriforge_common::db::models::{EnrichmentStatus, FoodRecord, NewFood};
    use nutriforge_common::provider::MockProvider;
    use nutriforge_common::{FoodStore, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweep_with_cooldown_override() {
        let store = Arc::new(MemoryStore::new());
        let mut food = FoodRecord::new(NewFood {
            name: "Dragonfruit Chips".into(),
            ..Default::default()
        });
        food.set_status(EnrichmentStatus::Failed);
        food.failed_attempts = 1;
        food.last_enrichment = Some(Utc::now() - Duration::hours(3));
        store.insert_food(&food).await.unwrap();

        let state = state_with(store, MockProvider::new());

        // default 24h cooldown leaves it alone
        let (status, body) = send(state.clone(), "POST", "/v1/retry/sweep", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reset"], 0);

        let (_, body) = send(
            state,
            "POST",
            "/v1/retry/sweep",
            Some(json!({ "cooldown_hours": 2 })),
        )
        .await;
        assert_eq!(body["reset"], 1);
    }
}
