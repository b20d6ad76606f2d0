//! Commission math
//!
//! All amounts are integer minor units. Revshare uses basis points and rounds
//! half-up; the affiliate's `commission_rate_bps` overrides the offer's rate.

use crate::models::affiliate::Affiliate;
use crate::models::offer::{Offer, PayoutType};

/// `amount_cents * bps / 10000`, rounded half-up (away from zero for negatives)
pub fn revshare_cents(amount_cents: i64, bps: i32) -> i64 {
    let product = i128::from(amount_cents) * i128::from(bps);
    let rounded = if product >= 0 {
        (product + 5_000) / 10_000
    } else {
        (product - 5_000) / 10_000
    };
    i64::try_from(rounded).unwrap_or(if rounded > 0 { i64::MAX } else { i64::MIN })
}

/// Revshare rate for this affiliate on this offer
pub fn effective_revshare_bps(offer: &Offer, affiliate: &Affiliate) -> i32 {
    affiliate.commission_rate_bps.unwrap_or(offer.revshare_bps)
}

/// Commission owed for an order of `amount_cents`
pub fn compute_commission(offer: &Offer, affiliate: &Affiliate, amount_cents: i64) -> i64 {
    let bps = effective_revshare_bps(offer, affiliate);

    match offer.payout_type {
        PayoutType::Cpa => offer.payout_amount_cents,
        PayoutType::Revshare => revshare_cents(amount_cents, bps),
        PayoutType::Hybrid => offer
            .payout_amount_cents
            .saturating_add(revshare_cents(amount_cents, bps)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::affiliate::AffiliateStatus;
    use crate::models::offer::OfferStatus;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn offer(payout_type: PayoutType, payout_amount_cents: i64, revshare_bps: i32) -> Offer {
        Offer {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            name: "Trail Shoes".to_string(),
            description: None,
            landing_url: "https://shop.example/shoes".to_string(),
            status: OfferStatus::Active,
            payout_type,
            payout_amount_cents,
            revshare_bps,
            currency: "USD".to_string(),
            daily_conversion_cap: None,
            require_approval: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn affiliate(commission_rate_bps: Option<i32>) -> Affiliate {
        Affiliate {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            user_id: None,
            name: "Jordan".to_string(),
            email: "jordan@example.com".to_string(),
            company: None,
            status: AffiliateStatus::Active,
            tier: "standard".to_string(),
            commission_rate_bps,
            referral_code: "JORDAN01".to_string(),
            payment_method: None,
            payment_details: json!({}),
            postback_url: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_revshare_rounding() {
        assert_eq!(revshare_cents(10_000, 1_500), 1_500);
        assert_eq!(revshare_cents(333, 1_500), 50); // 49.95
        assert_eq!(revshare_cents(330, 1_500), 50); // 49.5
        assert_eq!(revshare_cents(329, 1_500), 49); // 49.35
        assert_eq!(revshare_cents(0, 1_500), 0);
        assert_eq!(revshare_cents(-330, 1_500), -50);
    }

    #[test]
    fn test_cpa_ignores_amount() {
        assert_eq!(compute_commission(&offer(PayoutType::Cpa, 2_500, 0), &affiliate(None), 99_999), 2_500);
    }

    #[test]
    fn test_revshare_with_override() {
        let offer = offer(PayoutType::Revshare, 0, 1_000);

        assert_eq!(compute_commission(&offer, &affiliate(None), 12_999), 1_300);
        assert_eq!(compute_commission(&offer, &affiliate(Some(2_000)), 12_999), 2_600);
    }

    #[test]
    fn test_hybrid_sums_both() {
        let offer = offer(PayoutType::Hybrid, 500, 500);
        assert_eq!(compute_commission(&offer, &affiliate(None), 10_000), 1_000);
    }
}
