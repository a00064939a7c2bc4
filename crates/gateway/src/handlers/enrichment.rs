//! Enrichment trigger handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::validated;
use crate::AppState;
use nutriforge_common::{
    enrichment::{EnrichmentWorker, RunSummary, WorkerOptions},
    errors::Result,
    metrics,
    queue::QueueStats,
};

/// Optional overrides for one worker run
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RunRequest {
    #[validate(range(min = 1, max = 500))]
    pub batch_size: Option<usize>,

    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EnqueueRequest {
    #[validate(length(min = 1, max = 1000))]
    pub food_ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct EnqueueResponse {
    /// Entries newly armed
    pub queued: usize,
    /// Foods that already had an active entry
    pub already_queued: usize,
}

/// Run one worker batch in-process and return its summary
pub async fn run(
    State(state): State<AppState>,
    body: Option<Json<RunRequest>>,
) -> Result<Json<RunSummary>> {
    let request = validated(body.map(|Json(r)| r).unwrap_or_default())?;
    let batch_size = request.batch_size.unwrap_or(state.config.worker.batch_size);

    let worker = EnrichmentWorker::new(
        state.store.clone(),
        state.provider.clone(),
        WorkerOptions::from_config(&state.config),
    )
    .with_force_refresh(request.force_refresh || state.config.worker.force_refresh);

    let summary = worker.run_once(batch_size).await?;
    Ok(Json(summary))
}

/// Queue specific foods; unknown ids fail the whole request
pub async fn enqueue(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>> {
    let request = validated(request)?;
    let mut response = EnqueueResponse {
        queued: 0,
        already_queued: 0,
    };

    for id in request.food_ids {
        if state.store.enqueue(id).await? {
            response.queued += 1;
        } else {
            response.already_queued += 1;
        }
    }

    Ok(Json(response))
}

/// Queue depth by status
pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>> {
    let stats = state.store.stats().await?;
    metrics::record_queue_depth(stats.pending, stats.processing);
    Ok(Json(stats))
}
