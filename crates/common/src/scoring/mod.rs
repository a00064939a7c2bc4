//! Quality scoring for food records
//!
//! `score` is a pure function of a record's nutrient fields (and its
//! category): the same record always yields the same score and flags.
//!
//! # Checks
//! - **Completeness**: calories and the three macros must be known. A
//!   record without them scores at the floor and gets `INCOMPLETE_MACROS`.
//! - **Atwater**: `|calories - (4p + 4c + 9f)| <= 25% of calories`.
//! - **Physics**: fiber and sugar cannot exceed carbs; nothing is negative.
//! - **Category**: macro energy split must fit the category (see
//!   [`category`]).
//!
//! A check whose operands are missing is not applicable and does not
//! penalize; the missing field is already accounted for by completeness.
//!
//! # Scoring
//! Complete records start at 90 and lose a fixed penalty per failed
//! check. Records with at least 3 known micronutrients earn one point per
//! micronutrient, up to 10. The result is clamped to `[0, 100]`.

pub mod category;

use crate::db::models::FoodRecord;
use crate::nutrients::{Nutrient, Nutrients};
use serde::{Deserialize, Serialize};

/// Score at or above which a record no longer needs enrichment
pub const ACCEPTABLE_QUALITY_SCORE: i32 = 70;

/// Lowest possible score; records with incomplete macros sit here
pub const SCORE_FLOOR: i32 = 0;

/// Highest possible score
pub const SCORE_CEILING: i32 = 100;

const BASE_SCORE: i32 = 90;

/// Allowed relative deviation between stated and Atwater calories
pub const ATWATER_TOLERANCE: f64 = 0.25;

const ATWATER_PENALTY: i32 = 30;
const PHYSICS_PENALTY: i32 = 25;
const CATEGORY_PENALTY: i32 = 15;

const MICRO_BONUS_MIN_COUNT: usize = 3;
const MICRO_BONUS_CAP: i32 = 10;

/// Review flag tags as stored in `foods.review_flags`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewFlag {
    IncompleteMacros,
    AtwaterMismatch,
    PhysicsViolation,
    CategoryMismatch,
    DuplicateEntry,
    MaxCorrectionAttemptsExceeded,
}

impl ReviewFlag {
    pub const ALL: [ReviewFlag; 6] = [
        ReviewFlag::IncompleteMacros,
        ReviewFlag::AtwaterMismatch,
        ReviewFlag::PhysicsViolation,
        ReviewFlag::CategoryMismatch,
        ReviewFlag::DuplicateEntry,
        ReviewFlag::MaxCorrectionAttemptsExceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewFlag::IncompleteMacros => "INCOMPLETE_MACROS",
            ReviewFlag::AtwaterMismatch => "ATWATER_MISMATCH",
            ReviewFlag::PhysicsViolation => "PHYSICS_VIOLATION",
            ReviewFlag::CategoryMismatch => "CATEGORY_MISMATCH",
            ReviewFlag::DuplicateEntry => "DUPLICATE_ENTRY",
            ReviewFlag::MaxCorrectionAttemptsExceeded => "MAX_CORRECTION_ATTEMPTS_EXCEEDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        ReviewFlag::ALL.into_iter().find(|f| f.as_str() == s)
    }

    /// Flags produced by the score computation itself.
    ///
    /// Other flags are set by separate passes and survive rescoring.
    pub fn is_score_derived(&self) -> bool {
        matches!(
            self,
            ReviewFlag::IncompleteMacros
                | ReviewFlag::AtwaterMismatch
                | ReviewFlag::PhysicsViolation
                | ReviewFlag::CategoryMismatch
        )
    }
}

impl std::fmt::Display for ReviewFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a score computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: i32,
    pub flags: Vec<ReviewFlag>,
}

impl QualityReport {
    pub fn is_acceptable(&self) -> bool {
        self.score >= ACCEPTABLE_QUALITY_SCORE
    }

    pub fn has_flag(&self, flag: ReviewFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// Score a stored food record
pub fn score(food: &FoodRecord) -> QualityReport {
    score_nutrients(&food.nutrients(), food.category.as_deref())
}

/// Score raw nutrient values
pub fn score_nutrients(nutrients: &Nutrients, category: Option<&str>) -> QualityReport {
    let mut flags = Vec::new();

    let complete = nutrients.has_complete_macros();
    if !complete {
        flags.push(ReviewFlag::IncompleteMacros);
    }

    let mut score = BASE_SCORE;

    if check_atwater(nutrients) == CheckOutcome::Failed {
        flags.push(ReviewFlag::AtwaterMismatch);
        score -= ATWATER_PENALTY;
    }

    if check_physics(nutrients) == CheckOutcome::Failed {
        flags.push(ReviewFlag::PhysicsViolation);
        score -= PHYSICS_PENALTY;
    }

    if category::check(nutrients, category) == CheckOutcome::Failed {
        flags.push(ReviewFlag::CategoryMismatch);
        score -= CATEGORY_PENALTY;
    }

    score += micronutrient_bonus(nutrients);

    let score = if complete {
        score.clamp(SCORE_FLOOR, SCORE_CEILING)
    } else {
        SCORE_FLOOR
    };

    QualityReport { score, flags }
}

/// Result of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed,
    Failed,
    NotApplicable,
}

/// Stated calories must sit within 25% of the Atwater estimate
pub fn check_atwater(nutrients: &Nutrients) -> CheckOutcome {
    let (Some(calories), Some(estimate)) = (nutrients.calories, nutrients.atwater_calories()) else {
        return CheckOutcome::NotApplicable;
    };

    let tolerance = ATWATER_TOLERANCE * calories.abs();
    if (calories - estimate).abs() <= tolerance + f64::EPSILON {
        CheckOutcome::Passed
    } else {
        CheckOutcome::Failed
    }
}

/// Sub-components cannot exceed their parent; no value is negative
pub fn check_physics(nutrients: &Nutrients) -> CheckOutcome {
    let mut applicable = false;

    for nutrient in Nutrient::ALL {
        if let Some(value) = nutrients.get(nutrient) {
            applicable = true;
            if value < 0.0 || !value.is_finite() {
                return CheckOutcome::Failed;
            }
        }
    }

    if let Some(carbs) = nutrients.carbs_g {
        for part in [nutrients.fiber_g, nutrients.sugar_g].into_iter().flatten() {
            if part > carbs {
                return CheckOutcome::Failed;
            }
        }
    }

    if applicable {
        CheckOutcome::Passed
    } else {
        CheckOutcome::NotApplicable
    }
}

fn micronutrient_bonus(nutrients: &Nutrients) -> i32 {
    let count = nutrients.micronutrient_count();
    if count < MICRO_BONUS_MIN_COUNT {
        return 0;
    }
    (count as i32).min(MICRO_BONUS_CAP)
}
