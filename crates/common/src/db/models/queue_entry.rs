//! Enrichment queue entry entity
//!
//! One row per food: an entry is re-armed rather than duplicated, which
//! keeps "at most one active entry per food" a table constraint.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Queue entry status enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    /// Active entries block a second enqueue of the same food
    pub fn is_active(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Processing)
    }
}

impl From<String> for QueueStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => QueueStatus::Pending,
            "processing" => QueueStatus::Processing,
            "completed" => QueueStatus::Completed,
            "failed" => QueueStatus::Failed,
            _ => QueueStatus::Pending,
        }
    }
}

impl From<QueueStatus> for String {
    fn from(status: QueueStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "enrichment_queue")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub food_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    /// Food quality score when the entry was armed; lowest is claimed first
    pub priority_score: Option<i32>,

    pub attempt_count: i32,

    pub last_attempt_at: Option<DateTimeUtc>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_reason: Option<String>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Get the entry status as an enum
    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus::from(self.status.clone())
    }

    /// Check if the entry is in a terminal state
    pub fn is_terminal(&self) -> bool {
        !self.queue_status().is_active()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::food::Entity",
        from = "Column::FoodId",
        to = "super::food::Column::Id"
    )]
    Food,
}

impl Related<super::food::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Food.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
