//! Conversion attribution
//!
//! Order of precedence: explicit `click_id`, then coupon code, then
//! `referral_code` plus `offer_id`. A method that resolves nothing falls
//! through to the next one.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::TrackingError;
use crate::models::affiliate::Affiliate;
use crate::models::click::Click;
use crate::models::coupon::Coupon;
use crate::models::offer::Offer;

/// Attribution hints carried by a conversion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionRequest {
    pub click_id: Option<Uuid>,
    pub coupon: Option<String>,
    pub referral_code: Option<String>,

    /// Required with `referral_code`; also fills in for clicks or coupons without an offer
    pub offer_id: Option<Uuid>,
}

impl AttributionRequest {
    pub fn is_empty(&self) -> bool {
        self.click_id.is_none()
            && self.coupon.as_deref().map_or(true, |c| c.trim().is_empty())
            && self.referral_code.as_deref().map_or(true, |c| c.trim().is_empty())
    }
}

/// How a conversion was attributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMethod {
    Click,
    Coupon,
    ReferralCode,
}

/// Resolved affiliate and offer
#[derive(Debug, Clone)]
pub struct Attribution {
    pub method: AttributionMethod,
    pub affiliate: Affiliate,
    pub offer: Offer,
    pub click: Option<Click>,
    pub coupon: Option<Coupon>,
}

async fn load(
    pool: &PgPool,
    tenant_id: Uuid,
    affiliate_id: Uuid,
    offer_id: Uuid,
) -> Result<Option<(Affiliate, Offer)>, sqlx::Error> {
    let Some(affiliate) = Affiliate::find_by_id(pool, tenant_id, affiliate_id).await? else {
        return Ok(None);
    };
    let Some(offer) = Offer::find_by_id(pool, tenant_id, offer_id).await? else {
        return Ok(None);
    };
    Ok(Some((affiliate, offer)))
}

/// Resolves a conversion to an affiliate and offer
///
/// The coupon is only checked here; redemption happens when the conversion
/// is stored.
///
/// # Errors
///
/// - [`TrackingError::CouponUnavailable`] for an inactive, expired or used-up coupon
/// - [`TrackingError::Unattributed`] when no method resolves
pub async fn attribute(
    pool: &PgPool,
    tenant_id: Uuid,
    request: &AttributionRequest,
) -> Result<Attribution, TrackingError> {
    if let Some(click_id) = request.click_id {
        if let Some(click) = Click::find_by_id(pool, tenant_id, click_id).await? {
            if let Some(offer_id) = click.offer_id.or(request.offer_id) {
                if let Some((affiliate, offer)) = load(pool, tenant_id, click.affiliate_id, offer_id).await? {
                    return Ok(Attribution {
                        method: AttributionMethod::Click,
                        affiliate,
                        offer,
                        click: Some(click),
                        coupon: None,
                    });
                }
            }
        } else {
            tracing::debug!(tenant_id = %tenant_id, click_id = %click_id, "Unknown click_id on conversion");
        }
    }

    if let Some(code) = request.coupon.as_deref().filter(|c| !c.trim().is_empty()) {
        if let Some(coupon) = Coupon::find_by_code(pool, tenant_id, code).await? {
            if !coupon.is_redeemable(Utc::now()) {
                return Err(TrackingError::CouponUnavailable(coupon.code));
            }
            if let Some(offer_id) = coupon.offer_id.or(request.offer_id) {
                if let Some((affiliate, offer)) = load(pool, tenant_id, coupon.affiliate_id, offer_id).await? {
                    return Ok(Attribution {
                        method: AttributionMethod::Coupon,
                        affiliate,
                        offer,
                        click: None,
                        coupon: Some(coupon),
                    });
                }
            }
        }
    }

    if let (Some(code), Some(offer_id)) = (
        request.referral_code.as_deref().filter(|c| !c.trim().is_empty()),
        request.offer_id,
    ) {
        if let Some(affiliate) = Affiliate::find_by_referral_code(pool, tenant_id, code).await? {
            if let Some(offer) = Offer::find_by_id(pool, tenant_id, offer_id).await? {
                return Ok(Attribution {
                    method: AttributionMethod::ReferralCode,
                    affiliate,
                    offer,
                    click: None,
                    coupon: None,
                });
            }
        }
    }

    Err(TrackingError::Unattributed)
}
