//! Conversion pipeline
//!
//! dedupe order -> attribute -> daily cap -> fraud and quality rules ->
//! commission -> store, redeem coupon and queue deliveries in one transaction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::attribution::{attribute, Attribution, AttributionRequest};
use super::commission::compute_commission;
use super::context::{conversion_context, ConversionFacts};
use super::TrackingError;
use crate::events::postback::{conversion_macros, expand_macros};
use crate::events::{publish, EventType};
use crate::models::conversion::{
    Conversion, ConversionSource, ConversionStatus, NewConversion, ORDER_ID_CONSTRAINT,
};
use crate::models::coupon::Coupon;
use crate::models::delivery::{Delivery, DeliveryKind, NewDelivery};
use crate::models::offer::Offer;
use crate::models::rule_set::{RuleKind, RuleSet};
use crate::rules::{evaluate, Verdict};

/// A conversion to record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub attribution: AttributionRequest,
    pub amount_cents: i64,
    pub order_id: Option<String>,

    /// Defaults to the offer currency
    pub currency: Option<String>,

    pub source: ConversionSource,
    pub metadata: Option<Value>,
}

/// Status decided by rules, before storage
pub fn decide_status(verdict: &Verdict, require_approval: bool) -> ConversionStatus {
    if verdict.reject {
        ConversionStatus::Rejected
    } else if verdict.flagged {
        ConversionStatus::Pending
    } else if verdict.approve {
        ConversionStatus::Approved
    } else if require_approval {
        ConversionStatus::Pending
    } else {
        ConversionStatus::Approved
    }
}

/// Start of the UTC day containing `now`
pub fn utc_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

fn is_order_conflict(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.constraint() == Some(ORDER_ID_CONSTRAINT))
}

async fn duplicate_order(pool: &PgPool, tenant_id: Uuid, order_id: &str) -> Result<TrackingError, sqlx::Error> {
    let existing_id = Conversion::find_id_by_order(pool, tenant_id, order_id).await?;
    Ok(match existing_id {
        Some(existing_id) => TrackingError::DuplicateOrder {
            order_id: order_id.to_string(),
            existing_id,
        },
        None => TrackingError::Database(sqlx::Error::RowNotFound),
    })
}

/// Records a conversion
///
/// # Errors
///
/// - [`TrackingError::DuplicateOrder`] with the existing ID when `order_id` was seen
/// - [`TrackingError::Unattributed`] when no affiliate can be credited
/// - [`TrackingError::CouponUnavailable`] when the coupon cannot be redeemed
pub async fn record_conversion(
    pool: &PgPool,
    tenant_id: Uuid,
    request: ConversionRequest,
) -> Result<Conversion, TrackingError> {
    let now = Utc::now();

    if request.amount_cents < 0 {
        return Err(TrackingError::InvalidAmount(request.amount_cents.to_string()));
    }

    let order_id = request
        .order_id
        .as_deref()
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string);

    if let Some(order_id) = &order_id {
        if Conversion::find_id_by_order(pool, tenant_id, order_id).await?.is_some() {
            return Err(duplicate_order(pool, tenant_id, order_id).await?);
        }
    }

    let Attribution {
        method,
        affiliate,
        offer,
        click,
        coupon,
    } = attribute(pool, tenant_id, &request.attribution).await?;

    let currency = request
        .currency
        .as_deref()
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| offer.currency.clone());

    let mut metadata = match request.metadata {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    metadata.insert("attribution".to_string(), json!(method));

    let fraud_rules = RuleSet::list_active(pool, tenant_id, RuleKind::Fraud).await?;
    let quality_rules = RuleSet::list_active(pool, tenant_id, RuleKind::Quality).await?;

    let mut tx = pool.begin().await?;

    // Capped offers are serialized until this insert commits; nothing below
    // takes a second connection while the lock is held
    let over_cap = match offer.daily_conversion_cap {
        Some(cap) => {
            Offer::lock(&mut *tx, tenant_id, offer.id).await?;
            let today =
                Conversion::count_for_offer_since(&mut *tx, tenant_id, offer.id, utc_day_start(now)).await?;
            today >= i64::from(cap)
        }
        None => false,
    };

    let (status, fraud_score) = if over_cap {
        metadata.insert("reason".to_string(), json!("cap_exceeded"));
        (ConversionStatus::Rejected, 0)
    } else {
        let metadata_value = Value::Object(metadata.clone());
        let facts = ConversionFacts {
            amount_cents: request.amount_cents,
            currency: &currency,
            affiliate_id: affiliate.id,
            offer_id: offer.id,
            order_id: order_id.as_deref(),
            source: request.source.as_str(),
            click: click.as_ref(),
            coupon: coupon.as_ref(),
            metadata: Some(&metadata_value),
        };
        let context = conversion_context(&facts, now);

        let mut verdict = evaluate(&fraud_rules, &context);
        verdict.merge(evaluate(&quality_rules, &context));

        if !verdict.reasons.is_empty() {
            metadata.insert("rule_reasons".to_string(), json!(verdict.reasons));
        }
        if !verdict.matched_rule_ids.is_empty() {
            metadata.insert("matched_rules".to_string(), json!(verdict.matched_rule_ids));
        }

        (decide_status(&verdict, offer.require_approval), verdict.score)
    };

    let commission_cents = compute_commission(&offer, &affiliate, request.amount_cents);

    let inserted = Conversion::insert(
        &mut *tx,
        NewConversion {
            tenant_id,
            click_id: click.as_ref().map(|c| c.id),
            affiliate_id: affiliate.id,
            offer_id: offer.id,
            coupon_id: coupon.as_ref().map(|c| c.id),
            order_id: order_id.clone(),
            amount_cents: request.amount_cents,
            commission_cents,
            currency,
            status,
            fraud_score,
            source: request.source,
            metadata: Value::Object(metadata),
        },
    )
    .await;

    let conversion = match inserted {
        Ok(conversion) => conversion,
        Err(e) if is_order_conflict(&e) => {
            drop(tx);
            let order_id = order_id.unwrap_or_default();
            return Err(duplicate_order(pool, tenant_id, &order_id).await?);
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(coupon) = &coupon {
        if !Coupon::redeem(&mut *tx, coupon.id).await? {
            return Err(TrackingError::CouponUnavailable(coupon.code.clone()));
        }
    }

    let data = json!(conversion);
    publish(&mut *tx, tenant_id, EventType::ConversionCreated, data.clone()).await?;
    if conversion.status == ConversionStatus::Approved {
        publish(&mut *tx, tenant_id, EventType::ConversionApproved, data).await?;
    }

    if conversion.status != ConversionStatus::Rejected {
        if let Some(template) = affiliate.postback_url.as_deref().filter(|u| !u.trim().is_empty()) {
            let sub_ids = click.as_ref().map(|c| c.sub_ids.clone()).unwrap_or(Value::Null);
            let url = expand_macros(template, &conversion_macros(&conversion, &sub_ids));

            Delivery::enqueue(
                &mut *tx,
                NewDelivery {
                    tenant_id,
                    webhook_id: None,
                    affiliate_id: Some(affiliate.id),
                    kind: DeliveryKind::Postback,
                    event_type: EventType::ConversionCreated.as_str().to_string(),
                    url,
                    payload: json!({}),
                },
            )
            .await?;
        }
    }

    tx.commit().await?;

    tracing::info!(
        tenant_id = %tenant_id,
        conversion_id = %conversion.id,
        affiliate_id = %conversion.affiliate_id,
        status = conversion.status.as_str(),
        commission_cents = conversion.commission_cents,
        "Conversion recorded"
    );

    Ok(conversion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decide_status() {
        let clean = Verdict::default();
        assert_eq!(decide_status(&clean, false), ConversionStatus::Approved);
        assert_eq!(decide_status(&clean, true), ConversionStatus::Pending);

        let approve = Verdict { approve: true, ..Default::default() };
        assert_eq!(decide_status(&approve, true), ConversionStatus::Approved);

        let flagged = Verdict { approve: true, flagged: true, ..Default::default() };
        assert_eq!(decide_status(&flagged, false), ConversionStatus::Pending);

        let reject = Verdict { reject: true, approve: true, flagged: true, ..Default::default() };
        assert_eq!(decide_status(&reject, false), ConversionStatus::Rejected);
    }

    #[tokio::test]
    async fn test_record_conversion_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let pool = PgPool::connect_lazy("postgres://localhost/trackdesk_test").unwrap();
        let request = ConversionRequest {
            attribution: AttributionRequest::default(),
            amount_cents: 4_999,
            order_id: Some("ORD-1".to_string()),
            currency: None,
            source: ConversionSource::Postback,
            metadata: None,
        };

        let future = record_conversion(&pool, Uuid::new_v4(), request);
        assert_send(&future);
    }

    #[test]
    fn test_utc_day_start() {
        let now = Utc.with_ymd_and_hms(2026, 5, 12, 23, 59, 30).unwrap();
        assert_eq!(utc_day_start(now), Utc.with_ymd_and_hms(2026, 5, 12, 0, 0, 0).unwrap());
    }
}
