//! Review dashboard handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::validated;
use crate::AppState;
use nutriforge_common::{
    db::models::FoodRecord,
    errors::{AppError, Result},
    review::{DuplicateReport, ReviewFlagger, VerifyReport},
    scoring::ReviewFlag,
};

#[derive(Debug, Deserialize, Validate)]
pub struct ListParams {
    #[validate(range(min = 1, max = 500))]
    #[serde(default = "default_list_limit")]
    pub limit: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRequest {
    #[validate(range(min = 1, max = 5000))]
    #[serde(default = "default_verify_limit")]
    pub limit: u64,
}

impl Default for VerifyRequest {
    fn default() -> Self {
        Self {
            limit: default_verify_limit(),
        }
    }
}

fn default_list_limit() -> u64 { 50 }
fn default_verify_limit() -> u64 { 500 }

#[derive(Serialize)]
pub struct ReviewListResponse {
    pub count: usize,
    pub foods: Vec<FoodRecord>,
}

/// Records waiting on a human, most recently verified first
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ReviewListResponse>> {
    let params = validated(params)?;
    let foods = ReviewFlagger::new(state.store.clone())
        .list_needing_review(params.limit)
        .await?;
    Ok(Json(ReviewListResponse {
        count: foods.len(),
        foods,
    }))
}

pub async fn verify(
    State(state): State<AppState>,
    body: Option<Json<VerifyRequest>>,
) -> Result<Json<VerifyReport>> {
    let request = validated(body.map(|Json(r)| r).unwrap_or_default())?;
    let report = ReviewFlagger::new(state.store.clone())
        .verify(request.limit)
        .await?;
    Ok(Json(report))
}

pub async fn duplicates(State(state): State<AppState>) -> Result<Json<DuplicateReport>> {
    let report = ReviewFlagger::new(state.store.clone())
        .detect_duplicates()
        .await?;
    Ok(Json(report))
}

/// Manually clear one flag from a record
pub async fn clear_flag(
    State(state): State<AppState>,
    Path((food_id, flag)): Path<(Uuid, String)>,
) -> Result<Json<FoodRecord>> {
    let flag = ReviewFlag::parse(&flag).ok_or_else(|| AppError::Validation {
        message: format!("unknown review flag {}", flag),
        field: Some("flag".to_string()),
    })?;

    let food = ReviewFlagger::new(state.store.clone())
        .clear_flag(food_id, flag)
        .await?;
    Ok(Json(food))
}
