//! Smart-link target selection
//!
//! 1. Conditional targets in ascending priority; the first match wins.
//! 2. Otherwise a weighted random pick among unconditional targets with `weight > 0`.
//! 3. Otherwise the link's fallback URL.

use rand::Rng;
use serde_json::Value;
use uuid::Uuid;

use crate::models::smart_link::{SmartLink, SmartTarget};
use crate::rules::matches_all;

/// Destination chosen for a click
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub url: String,
    pub offer_id: Option<Uuid>,
    pub fallback: bool,
}

impl ResolvedTarget {
    fn from_target(target: &SmartTarget) -> Self {
        Self {
            url: target.url.clone(),
            offer_id: target.offer_id,
            fallback: false,
        }
    }
}

/// Resolves a smart link with a random weighted pick
pub fn resolve_smart_link(link: &SmartLink, context: &Value) -> ResolvedTarget {
    let mut rng = rand::thread_rng();
    resolve_with_roll(link, context, |total| rng.gen_range(0..total))
}

/// Resolves a smart link, drawing the weighted pick from `roll`
///
/// `roll` receives the total weight (always > 0) and must return a value in
/// `0..total`.
pub fn resolve_with_roll(
    link: &SmartLink,
    context: &Value,
    roll: impl FnOnce(u64) -> u64,
) -> ResolvedTarget {
    let mut conditional: Vec<&SmartTarget> =
        link.targets.iter().filter(|t| !t.conditions.is_empty()).collect();
    conditional.sort_by_key(|t| t.priority);

    if let Some(target) = conditional
        .into_iter()
        .find(|t| matches_all(t.logic, &t.conditions, context))
    {
        return ResolvedTarget::from_target(target);
    }

    let weighted: Vec<&SmartTarget> = link
        .targets
        .iter()
        .filter(|t| t.conditions.is_empty() && t.weight > 0)
        .collect();
    let total: u64 = weighted.iter().map(|t| u64::from(t.weight)).sum();

    if total > 0 {
        let mut point = roll(total).min(total - 1);
        for target in weighted {
            let weight = u64::from(target.weight);
            if point < weight {
                return ResolvedTarget::from_target(target);
            }
            point -= weight;
        }
    }

    ResolvedTarget {
        url: link.fallback_url.clone(),
        offer_id: None,
        fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Condition, Logic, Operator};
    use chrono::Utc;
    use serde_json::json;
    use sqlx::types::Json;

    fn target(url: &str, weight: u32, priority: i32, conditions: Vec<Condition>) -> SmartTarget {
        SmartTarget {
            url: url.to_string(),
            offer_id: None,
            weight,
            priority,
            logic: Logic::And,
            conditions,
        }
    }

    fn link(targets: Vec<SmartTarget>) -> SmartLink {
        SmartLink {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "geo split".to_string(),
            fallback_url: "https://fallback.example".to_string(),
            targets: Json(targets),
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn country(code: &str) -> Condition {
        Condition::new("country", Operator::Equals, json!(code))
    }

    #[test]
    fn test_conditional_targets_by_priority() {
        let link = link(vec![
            target("https://late.example", 1, 20, vec![country("US")]),
            target("https://early.example", 1, 10, vec![country("US")]),
            target("https://any.example", 1, 0, vec![]),
        ]);

        let resolved = resolve_with_roll(&link, &json!({"country": "us"}), |_| 0);
        assert_eq!(resolved.url, "https://early.example");
        assert!(!resolved.fallback);
    }

    #[test]
    fn test_weighted_pick() {
        let link = link(vec![
            target("https://a.example", 1, 0, vec![]),
            target("https://zero.example", 0, 0, vec![]),
            target("https://b.example", 3, 0, vec![]),
            target("https://de.example", 5, 0, vec![country("DE")]),
        ]);
        let ctx = json!({"country": "FR"});

        assert_eq!(resolve_with_roll(&link, &ctx, |total| { assert_eq!(total, 4); 0 }).url, "https://a.example");
        assert_eq!(resolve_with_roll(&link, &ctx, |_| 1).url, "https://b.example");
        assert_eq!(resolve_with_roll(&link, &ctx, |_| 3).url, "https://b.example");
        assert_eq!(resolve_with_roll(&link, &ctx, |_| 99).url, "https://b.example");
    }

    #[test]
    fn test_fallback() {
        let link = link(vec![
            target("https://de.example", 1, 0, vec![country("DE")]),
            target("https://off.example", 0, 0, vec![]),
        ]);

        let resolved = resolve_with_roll(&link, &json!({"country": "US"}), |_| 0);
        assert_eq!(resolved.url, "https://fallback.example");
        assert!(resolved.fallback);
        assert!(resolved.offer_id.is_none());
    }

    #[test]
    fn test_random_pick_stays_in_range() {
        let link = link(vec![
            target("https://a.example", 2, 0, vec![]),
            target("https://b.example", 2, 0, vec![]),
        ]);

        for _ in 0..50 {
            let url = resolve_smart_link(&link, &json!({})).url;
            assert!(url == "https://a.example" || url == "https://b.example");
        }
    }
}
