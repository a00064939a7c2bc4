//! Duplicate detection by normalized name

use crate::db::models::FoodRecord;
use crate::scoring::ReviewFlag;
use regex_lite::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use uuid::Uuid;

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static pattern"))
}

/// Case-folded, trimmed, whitespace-collapsed name
pub fn normalize_name(name: &str) -> String {
    whitespace()
        .replace_all(name.trim(), " ")
        .to_lowercase()
}

/// Which records gain and which lose `DUPLICATE_ENTRY`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DuplicatePlan {
    pub groups: usize,
    pub flag: Vec<Uuid>,
    pub clear: Vec<Uuid>,
}

/// Group `foods` by normalized name and decide flag changes.
///
/// In each group the highest score is kept (unscored counts lowest, ties
/// go to the earliest record); every other member is flagged. Records that
/// carry the flag but are no longer duplicates are cleared.
pub fn plan(foods: &[FoodRecord]) -> DuplicatePlan {
    let mut groups: BTreeMap<String, Vec<&FoodRecord>> = BTreeMap::new();
    for food in foods {
        groups.entry(normalize_name(&food.name)).or_default().push(food);
    }

    let flag_name = ReviewFlag::DuplicateEntry.as_str();
    let mut out = DuplicatePlan::default();

    for members in groups.values() {
        let keeper = members
            .iter()
            .copied()
            .min_by(|a, b| {
                b.quality_score
                    .cmp(&a.quality_score)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|f| f.id);

        if members.len() > 1 {
            out.groups += 1;
        }

        for member in members {
            let flagged = member.has_flag(flag_name);
            let is_keeper = Some(member.id) == keeper;
            if !is_keeper && !flagged {
                out.flag.push(member.id);
            } else if is_keeper && flagged {
                out.clear.push(member.id);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewFood;
    use chrono::Duration;

    fn food(name: &str, score: Option<i32>, age_minutes: i64) -> FoodRecord {
        let mut f = FoodRecord::new(NewFood {
            name: name.into(),
            ..Default::default()
        });
        f.quality_score = score;
        f.created_at -= Duration::minutes(age_minutes);
        f
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Brussels   Sprouts\t"), "brussels sprouts");
        assert_eq!(normalize_name("BRUSSELS sprouts"), "brussels sprouts");
    }

    #[test]
    fn test_keeps_highest_score() {
        let best = food("Greek Yogurt", Some(95), 0);
        let worse = food("greek  yogurt", Some(60), 10);
        let unscored = food("GREEK YOGURT", None, 20);
        let unrelated = food("Skyr", Some(10), 0);

        let plan = plan(&[worse.clone(), best.clone(), unscored.clone(), unrelated]);
        assert_eq!(plan.groups, 1);
        assert_eq!(plan.flag.len(), 2);
        assert!(plan.flag.contains(&worse.id));
        assert!(plan.flag.contains(&unscored.id));
        assert!(plan.clear.is_empty());
    }

    #[test]
    fn test_tie_goes_to_oldest() {
        let older = food("Oats", Some(80), 60);
        let newer = food("Oats", Some(80), 1);
        let plan = plan(&[newer.clone(), older]);
        assert_eq!(plan.flag, vec![newer.id]);
    }

    #[test]
    fn test_clears_flag_from_keeper() {
        let mut keeper = food("Rice", Some(90), 5);
        keeper
            .review_flags
            .push(ReviewFlag::DuplicateEntry.as_str().to_string());
        let other = food("rice", Some(50), 0);

        let plan = plan(&[keeper.clone(), other.clone()]);
        assert_eq!(plan.clear, vec![keeper.id]);
        assert_eq!(plan.flag, vec![other.id]);

        // already-flagged losers are left alone
        let mut flagged_other = other.clone();
        flagged_other
            .review_flags
            .push(ReviewFlag::DuplicateEntry.as_str().to_string());
        let plan = super::plan(&[food("Rice", Some(90), 5), flagged_other]);
        assert!(plan.flag.is_empty());
    }
}
