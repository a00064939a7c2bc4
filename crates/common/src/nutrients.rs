//! Nutrient values carried by a food record
//!
//! Every field is optional: `None` means "not yet known", `Some(0.0)`
//! means "known to be zero".

use serde::{Deserialize, Serialize};

/// Macronutrients plus the tracked micronutrients, per serving.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nutrients {
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
}

/// Field identifiers, in column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nutrient {
    Calories,
    Protein,
    Carbs,
    Fat,
    Fiber,
    Sugar,
    Sodium,
    Potassium,
    Calcium,
    Iron,
    Magnesium,
    Phosphorus,
    Zinc,
    VitaminA,
    VitaminC,
    VitaminD,
    VitaminE,
    VitaminK,
    VitaminB6,
    VitaminB12,
    Folate,
}

impl Nutrient {
    pub const ALL: [Nutrient; 21] = [
        Nutrient::Calories,
        Nutrient::Protein,
        Nutrient::Carbs,
        Nutrient::Fat,
        Nutrient::Fiber,
        Nutrient::Sugar,
        Nutrient::Sodium,
        Nutrient::Potassium,
        Nutrient::Calcium,
        Nutrient::Iron,
        Nutrient::Magnesium,
        Nutrient::Phosphorus,
        Nutrient::Zinc,
        Nutrient::VitaminA,
        Nutrient::VitaminC,
        Nutrient::VitaminD,
        Nutrient::VitaminE,
        Nutrient::VitaminK,
        Nutrient::VitaminB6,
        Nutrient::VitaminB12,
        Nutrient::Folate,
    ];

    pub const MACROS: [Nutrient; 4] = [
        Nutrient::Calories,
        Nutrient::Protein,
        Nutrient::Carbs,
        Nutrient::Fat,
    ];

    pub const MICROS: [Nutrient; 15] = [
        Nutrient::Sodium,
        Nutrient::Potassium,
        Nutrient::Calcium,
        Nutrient::Iron,
        Nutrient::Magnesium,
        Nutrient::Phosphorus,
        Nutrient::Zinc,
        Nutrient::VitaminA,
        Nutrient::VitaminC,
        Nutrient::VitaminD,
        Nutrient::VitaminE,
        Nutrient::VitaminK,
        Nutrient::VitaminB6,
        Nutrient::VitaminB12,
        Nutrient::Folate,
    ];

    /// Column / JSON key for this nutrient
    pub fn column(&self) -> &'static str {
        match self {
            Nutrient::Calories => "calories",
            Nutrient::Protein => "protein_g",
            Nutrient::Carbs => "carbs_g",
            Nutrient::Fat => "fat_g",
            Nutrient::Fiber => "fiber_g",
            Nutrient::Sugar => "sugar_g",
            Nutrient::Sodium => "sodium_mg",
            Nutrient::Potassium => "potassium_mg",
            Nutrient::Calcium => "calcium_mg",
            Nutrient::Iron => "iron_mg",
            Nutrient::Magnesium => "magnesium_mg",
            Nutrient::Phosphorus => "phosphorus_mg",
            Nutrient::Zinc => "zinc_mg",
            Nutrient::VitaminA => "vitamin_a_mcg",
            Nutrient::VitaminC => "vitamin_c_mg",
            Nutrient::VitaminD => "vitamin_d_mcg",
            Nutrient::VitaminE => "vitamin_e_mg",
            Nutrient::VitaminK => "vitamin_k_mcg",
            Nutrient::VitaminB6 => "vitamin_b6_mg",
            Nutrient::VitaminB12 => "vitamin_b12_mcg",
            Nutrient::Folate => "folate_mcg",
        }
    }

    pub fn from_column(column: &str) -> Option<Nutrient> {
        Nutrient::ALL.into_iter().find(|n| n.column() == column)
    }
}

impl Nutrients {
    pub fn get(&self, nutrient: Nutrient) -> Option<f64> {
        *self.slot(nutrient)
    }

    pub fn set(&mut self, nutrient: Nutrient, value: Option<f64>) {
        *self.slot_mut(nutrient) = value;
    }

    fn slot(&self, nutrient: Nutrient) -> &Option<f64> {
        match nutrient {
            Nutrient::Calories => &self.calories,
            Nutrient::Protein => &self.protein_g,
            Nutrient::Carbs => &self.carbs_g,
            Nutrient::Fat => &self.fat_g,
            Nutrient::Fiber => &self.fiber_g,
            Nutrient::Sugar => &self.sugar_g,
            Nutrient::Sodium => &self.sodium_mg,
            Nutrient::Potassium => &self.potassium_mg,
            Nutrient::Calcium => &self.calcium_mg,
            Nutrient::Iron => &self.iron_mg,
            Nutrient::Magnesium => &self.magnesium_mg,
            Nutrient::Phosphorus => &self.phosphorus_mg,
            Nutrient::Zinc => &self.zinc_mg,
            Nutrient::VitaminA => &self.vitamin_a_mcg,
            Nutrient::VitaminC => &self.vitamin_c_mg,
            Nutrient::VitaminD => &self.vitamin_d_mcg,
            Nutrient::VitaminE => &self.vitamin_e_mg,
            Nutrient::VitaminK => &self.vitamin_k_mcg,
            Nutrient::VitaminB6 => &self.vitamin_b6_mg,
            Nutrient::VitaminB12 => &self.vitamin_b12_mcg,
            Nutrient::Folate => &self.folate_mcg,
        }
    }

    fn slot_mut(&mut self, nutrient: Nutrient) -> &mut Option<f64> {
        match nutrient {
            Nutrient::Calories => &mut self.calories,
            Nutrient::Protein => &mut self.protein_g,
            Nutrient::Carbs => &mut self.carbs_g,
            Nutrient::Fat => &mut self.fat_g,
            Nutrient::Fiber => &mut self.fiber_g,
            Nutrient::Sugar => &mut self.sugar_g,
            Nutrient::Sodium => &mut self.sodium_mg,
            Nutrient::Potassium => &mut self.potassium_mg,
            Nutrient::Calcium => &mut self.calcium_mg,
            Nutrient::Iron => &mut self.iron_mg,
            Nutrient::Magnesium => &mut self.magnesium_mg,
            Nutrient::Phosphorus => &mut self.phosphorus_mg,
            Nutrient::Zinc => &mut self.zinc_mg,
            Nutrient::VitaminA => &mut self.vitamin_a_mcg,
            Nutrient::VitaminC => &mut self.vitamin_c_mg,
            Nutrient::VitaminD => &mut self.vitamin_d_mcg,
            Nutrient::VitaminE => &mut self.vitamin_e_mg,
            Nutrient::VitaminK => &mut self.vitamin_k_mcg,
            Nutrient::VitaminB6 => &mut self.vitamin_b6_mg,
            Nutrient::VitaminB12 => &mut self.vitamin_b12_mcg,
            Nutrient::Folate => &mut self.folate_mcg,
        }
    }

    /// True when calories and all three macros are known
    pub fn has_complete_macros(&self) -> bool {
        Nutrient::MACROS.iter().all(|n| self.get(*n).is_some())
    }

    /// Number of known micronutrients
    pub fn micronutrient_count(&self) -> usize {
        Nutrient::MICROS.iter().filter(|n| self.get(**n).is_some()).count()
    }

    /// Calories implied by the macros (4/4/9), when all three are known
    pub fn atwater_calories(&self) -> Option<f64> {
        Some(self.protein_g? * 4.0 + self.carbs_g? * 4.0 + self.fat_g? * 9.0)
    }

    /// Merge provider values into this record.
    ///
    /// Known values are kept unless `force` is set; provider `None`s never
    /// erase anything. Returns the nutrients that changed.
    pub fn merge_from(&mut self, incoming: &Nutrients, force: bool) -> Vec<Nutrient> {
        let mut changed = Vec::new();
        for nutrient in Nutrient::ALL {
            let Some(value) = incoming.get(nutrient) else {
                continue;
            };
            let current = self.get(nutrient);
            let should_write = match current {
                None => true,
                Some(existing) => force && existing != value,
            };
            if should_write {
                self.set(nutrient, Some(value));
                changed.push(nutrient);
            }
        }
        changed
    }
}
