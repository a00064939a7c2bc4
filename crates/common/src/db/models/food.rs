//! Food record entity
//!
//! Nutrient columns are nullable; the queue never copies them.

use crate::nutrients::Nutrients;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Enrichment lifecycle of a food record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Verified,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentStatus::Pending => "pending",
            EnrichmentStatus::Processing => "processing",
            EnrichmentStatus::Completed => "completed",
            EnrichmentStatus::Failed => "failed",
            EnrichmentStatus::Verified => "verified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EnrichmentStatus::Pending),
            "processing" => Some(EnrichmentStatus::Processing),
            "completed" => Some(EnrichmentStatus::Completed),
            "failed" => Some(EnrichmentStatus::Failed),
            "verified" => Some(EnrichmentStatus::Verified),
            _ => None,
        }
    }
}

impl From<EnrichmentStatus> for String {
    fn from(status: EnrichmentStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "foods")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub brand: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub serving_description: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub category: Option<String>,

    /// Where the nutrient data came from (usda, ai, manual, ...)
    #[sea_orm(column_type = "Text", nullable)]
    pub source: Option<String>,

    pub calories: Option<f64>,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub fiber_g: Option<f64>,
    pub sugar_g: Option<f64>,

    pub sodium_mg: Option<f64>,
    pub potassium_mg: Option<f64>,
    pub calcium_mg: Option<f64>,
    pub iron_mg: Option<f64>,
    pub magnesium_mg: Option<f64>,
    pub phosphorus_mg: Option<f64>,
    pub zinc_mg: Option<f64>,
    pub vitamin_a_mcg: Option<f64>,
    pub vitamin_c_mg: Option<f64>,
    pub vitamin_d_mcg: Option<f64>,
    pub vitamin_e_mg: Option<f64>,
    pub vitamin_k_mcg: Option<f64>,
    pub vitamin_b6_mg: Option<f64>,
    pub vitamin_b12_mcg: Option<f64>,
    pub folate_mcg: Option<f64>,

    #[sea_orm(column_type = "Text", nullable)]
    pub enrichment_status: Option<String>,

    /// Written only by the quality scorer
    pub quality_score: Option<i32>,

    pub needs_review: bool,

    pub review_flags: Vec<String>,

    /// Reason recorded by the last failed enrichment
    #[sea_orm(column_type = "Text", nullable)]
    pub enrichment_error: Option<String>,

    /// Consecutive failed enrichments; reset by a success
    pub failed_attempts: i32,

    pub last_enrichment: Option<DateTimeUtc>,

    pub last_verification: Option<DateTimeUtc>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Get the enrichment status as an enum (None for null or unknown)
    pub fn status(&self) -> Option<EnrichmentStatus> {
        self.enrichment_status.as_deref().and_then(EnrichmentStatus::parse)
    }

    pub fn set_status(&mut self, status: EnrichmentStatus) {
        self.enrichment_status = Some(status.into());
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.review_flags.iter().any(|f| f == flag)
    }

    /// Snapshot of the nutrient columns
    pub fn nutrients(&self) -> Nutrients {
        Nutrients {
            calories: self.calories,
            protein_g: self.protein_g,
            carbs_g: self.carbs_g,
            fat_g: self.fat_g,
            fiber_g: self.fiber_g,
            sugar_g: self.sugar_g,
            sodium_mg: self.sodium_mg,
            potassium_mg: self.potassium_mg,
            calcium_mg: self.calcium_mg,
            iron_mg: self.iron_mg,
            magnesium_mg: self.magnesium_mg,
            phosphorus_mg: self.phosphorus_mg,
            zinc_mg: self.zinc_mg,
            vitamin_a_mcg: self.vitamin_a_mcg,
            vitamin_c_mg: self.vitamin_c_mg,
            vitamin_d_mcg: self.vitamin_d_mcg,
            vitamin_e_mg: self.vitamin_e_mg,
            vitamin_k_mcg: self.vitamin_k_mcg,
            vitamin_b6_mg: self.vitamin_b6_mg,
            vitamin_b12_mcg: self.vitamin_b12_mcg,
            folate_mcg: self.folate_mcg,
        }
    }

    /// Write all nutrient columns from `n`
    pub fn set_nutrients(&mut self, n: &Nutrients) {
        self.calories = n.calories;
        self.protein_g = n.protein_g;
        self.carbs_g = n.carbs_g;
        self.fat_g = n.fat_g;
        self.fiber_g = n.fiber_g;
        self.sugar_g = n.sugar_g;
        self.sodium_mg = n.sodium_mg;
        self.potassium_mg = n.potassium_mg;
        self.calcium_mg = n.calcium_mg;
        self.iron_mg = n.iron_mg;
        self.magnesium_mg = n.magnesium_mg;
        self.phosphorus_mg = n.phosphorus_mg;
        self.zinc_mg = n.zinc_mg;
        self.vitamin_a_mcg = n.vitamin_a_mcg;
        self.vitamin_c_mg = n.vitamin_c_mg;
        self.vitamin_d_mcg = n.vitamin_d_mcg;
        self.vitamin_e_mg = n.vitamin_e_mg;
        self.vitamin_k_mcg = n.vitamin_k_mcg;
        self.vitamin_b6_mg = n.vitamin_b6_mg;
        self.vitamin_b12_mcg = n.vitamin_b12_mcg;
        self.folate_mcg = n.folate_mcg;
    }

    /// Build a fresh record (no id collision checks, no score yet)
    pub fn new(input: NewFood) -> Self {
        let now = chrono::Utc::now();
        let mut food = Self {
            id: Uuid::new_v4(),
            name: input.name,
            brand: input.brand,
            serving_description: input.serving_description,
            category: input.category,
            source: input.source,
            calories: None,
            protein_g: None,
            carbs_g: None,
            fat_g: None,
            fiber_g: None,
            sugar_g: None,
            sodium_mg: None,
            potassium_mg: None,
            calcium_mg: None,
            iron_mg: None,
            magnesium_mg: None,
            phosphorus_mg: None,
            zinc_mg: None,
            vitamin_a_mcg: None,
            vitamin_c_mg: None,
            vitamin_d_mcg: None,
            vitamin_e_mg: None,
            vitamin_k_mcg: None,
            vitamin_b6_mg: None,
            vitamin_b12_mcg: None,
            folate_mcg: None,
            enrichment_status: None,
            quality_score: None,
            needs_review: false,
            review_flags: Vec::new(),
            enrichment_error: None,
            failed_attempts: 0,
            last_enrichment: None,
            last_verification: None,
            created_at: now,
            updated_at: now,
        };
        food.set_nutrients(&input.nutrients);
        food
    }
}

/// Input for registering a food
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewFood {
    pub name: String,
    pub brand: Option<String>,
    pub serving_description: Option<String>,
    pub category: Option<String>,
    pub source: Option<String>,
    #[serde(default, flatten)]
    pub nutrients: Nutrients,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::queue_entry::Entity")]
    QueueEntry,
}

impl Related<super::queue_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QueueEntry.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        for status in [
            EnrichmentStatus::Pending,
            EnrichmentStatus::Processing,
            EnrichmentStatus::Completed,
            EnrichmentStatus::Failed,
            EnrichmentStatus::Verified,
        ] {
            assert_eq!(EnrichmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EnrichmentStatus::parse("discarded"), None);
    }

    #[test]
    fn test_new_food_copies_nutrients() {
        let food = Model::new(NewFood {
            name: "Brussels Sprouts".into(),
            nutrients: Nutrients {
                calories: Some(43.0),
                fat_g: Some(0.3),
                ..Default::default()
            },
            ..Default::default()
        });

        assert_eq!(food.calories, Some(43.0));
        assert_eq!(food.fat_g, Some(0.3));
        assert_eq!(food.protein_g, None);
        assert_eq!(food.status(), None);
        assert_eq!(food.nutrients().calories, Some(43.0));
    }
}
