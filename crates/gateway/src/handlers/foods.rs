//! Food registration and lookup handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::validated;
use crate::AppState;
use nutriforge_common::{
    db::models::{FoodRecord, NewFood},
    errors::{AppError, Result},
    intake,
    nutrients::Nutrients,
};

/// Request to register a food
#[derive(Debug, Deserialize, Validate)]
pub struct CreateFoodRequest {
    #[validate(length(min = 1, max = 300))]
    pub name: String,

    #[validate(length(max = 300))]
    pub brand: Option<String>,

    #[validate(length(max = 200))]
    pub serving_description: Option<String>,

    #[validate(length(max = 100))]
    pub category: Option<String>,

    #[validate(length(max = 100))]
    pub source: Option<String>,

    /// Any known per-serving values, same field names as the record
    #[serde(default, flatten)]
    pub nutrients: Nutrients,
}

impl From<CreateFoodRequest> for NewFood {
    fn from(req: CreateFoodRequest) -> Self {
        NewFood {
            name: req.name,
            brand: req.brand,
            serving_description: req.serving_description,
            category: req.category,
            source: req.source,
            nutrients: req.nutrients,
        }
    }
}

/// Register a food; incomplete records are queued for enrichment
pub async fn create_food(
    State(state): State<AppState>,
    Json(request): Json<CreateFoodRequest>,
) -> Result<(StatusCode, Json<FoodRecord>)> {
    let request = validated(request)?;
    let food = intake::register_food(state.store.as_ref(), request.into()).await?;
    Ok((StatusCode::CREATED, Json(food)))
}

pub async fn get_food(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FoodRecord>> {
    let food = state
        .store
        .get_food(id)
        .await?
        .ok_or_else(|| AppError::FoodNotFound { id: id.to_string() })?;
    Ok(Json(food))
}
