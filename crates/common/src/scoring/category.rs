//! Category plausibility rules
//!
//! Each rule bounds the share of macro energy (Atwater) one macro may
//! contribute for foods in a category. Categories are matched on lowercase
//! word tokens, so "Beef Products" and "beef" hit the same rule.

use super::CheckOutcome;
use crate::nutrients::Nutrients;

/// Which macro a rule constrains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Macro {
    Protein,
    Carbs,
    Fat,
}

/// Energy-share bound for one macro
#[derive(Debug, Clone, Copy)]
pub enum ShareBound {
    AtMost(Macro, f64),
    AtLeast(Macro, f64),
}

#[derive(Debug, Clone, Copy)]
pub struct CategoryRule {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub bound: ShareBound,
}

pub const RULES: &[CategoryRule] = &[
    CategoryRule {
        name: "meat",
        keywords: &[
            "meat", "meats", "beef", "pork", "lamb", "veal", "poultry", "chicken", "turkey",
            "fish", "seafood", "shellfish",
        ],
        bound: ShareBound::AtMost(Macro::Carbs, 0.20),
    },
    CategoryRule {
        name: "fats_oils",
        keywords: &["oil", "oils", "fats", "lard", "shortening"],
        bound: ShareBound::AtLeast(Macro::Fat, 0.80),
    },
    CategoryRule {
        name: "sweeteners",
        keywords: &["sweetener", "sweeteners", "syrup", "syrups", "honey"],
        bound: ShareBound::AtLeast(Macro::Carbs, 0.80),
    },
];

/// Find the rule for a category label
pub fn rule_for(category: &str) -> Option<&'static CategoryRule> {
    let lowered = category.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|k| tokens.contains(k)))
}

/// Check a record against its category rule
pub fn check(nutrients: &Nutrients, category: Option<&str>) -> CheckOutcome {
    let Some(rule) = category.and_then(rule_for) else {
        return CheckOutcome::NotApplicable;
    };
    let Some(total) = nutrients.atwater_calories() else {
        return CheckOutcome::NotApplicable;
    };
    if total <= 0.0 {
        return CheckOutcome::NotApplicable;
    }

    let energy = |m: Macro| -> f64 {
        match m {
            Macro::Protein => nutrients.protein_g.unwrap_or(0.0) * 4.0,
            Macro::Carbs => nutrients.carbs_g.unwrap_or(0.0) * 4.0,
            Macro::Fat => nutrients.fat_g.unwrap_or(0.0) * 9.0,
        }
    };

    let within = match rule.bound {
        ShareBound::AtMost(m, share) => energy(m) / total <= share,
        ShareBound::AtLeast(m, share) => energy(m) / total >= share,
    };

    if within {
        CheckOutcome::Passed
    } else {
        CheckOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn macros(protein: f64, carbs: f64, fat: f64) -> Nutrients {
        Nutrients {
            calories: Some(protein * 4.0 + carbs * 4.0 + fat * 9.0),
            protein_g: Some(protein),
            carbs_g: Some(carbs),
            fat_g: Some(fat),
            ..Default::default()
        }
    }

    #[test]
    fn test_rule_lookup_by_token() {
        assert_eq!(rule_for("Beef Products").map(|r| r.name), Some("meat"));
        assert_eq!(rule_for("Fats & Oils").map(|r| r.name), Some("fats_oils"));
        assert_eq!(rule_for("Maple syrup").map(|r| r.name), Some("sweeteners"));
        assert!(rule_for("Vegetables").is_none());
        // token match, not substring
        assert!(rule_for("Boiled snacks").is_none());
    }

    #[test]
    fn test_meat_with_high_carbs_fails() {
        // breaded chicken nuggets labeled as plain chicken
        let n = macros(15.0, 30.0, 15.0);
        assert_eq!(check(&n, Some("Chicken")), CheckOutcome::Failed);

        let breast = macros(31.0, 0.0, 3.6);
        assert_eq!(check(&breast, Some("Chicken")), CheckOutcome::Passed);
    }

    #[test]
    fn test_oil_must_be_mostly_fat() {
        assert_eq!(check(&macros(0.0, 0.0, 14.0), Some("Oils")), CheckOutcome::Passed);
        assert_eq!(check(&macros(5.0, 20.0, 3.0), Some("Oils")), CheckOutcome::Failed);
    }

    #[test]
    fn test_not_applicable_without_category_or_energy() {
        assert_eq!(check(&macros(1.0, 1.0, 1.0), None), CheckOutcome::NotApplicable);
        assert_eq!(
            check(&macros(0.0, 0.0, 0.0), Some("Honey")),
            CheckOutcome::NotApplicable
        );
        assert_eq!(
            check(&Nutrients::default(), Some("Beef")),
            CheckOutcome::NotApplicable
        );
    }
}
