//! Click pipeline for `GET /t/{code}`
//!
//! resolve link -> build context -> traffic rules -> fraud rules ->
//! uniqueness -> store click -> redirect with `click_id`

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::PgPool;
use url::form_urlencoded::byte_serialize;
use url::Url;
use uuid::Uuid;

use super::context::{click_context, detect_device, Visitor, SUB_ID_KEYS};
use super::smart_link::resolve_smart_link;
use super::TrackingError;
use crate::events::{publish, EventType};
use crate::models::affiliate::{Affiliate, AffiliateStatus};
use crate::models::click::{Click, ClickStatus, NewClick};
use crate::models::offer::{Offer, OfferStatus};
use crate::models::rule_set::{RuleKind, RuleSet};
use crate::models::smart_link::SmartLink;
use crate::models::tracking_link::TrackingLink;
use crate::redis::RedisClient;
use crate::rules::evaluate;

/// Window in which repeat clicks from one IP on one link are not unique
pub const UNIQUE_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Incoming click
#[derive(Debug, Clone)]
pub struct ClickRequest {
    pub code: String,
    pub visitor: Visitor,
}

/// What the tracking endpoint should answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// 302 to `location`
    Redirect {
        click_id: Uuid,
        location: String,
        status: ClickStatus,
        is_unique: bool,
    },

    /// Stored as blocked; 403, or 302 when a redirect action applied
    Blocked {
        click_id: Uuid,
        redirect_url: Option<String>,
    },

    /// Link not serving traffic; 302 without recording a click
    Fallback { location: String },
}

/// Where a resolved link sends traffic before rules run
struct Target {
    offer_id: Option<Uuid>,
    destination: TargetDestination,
}

enum TargetDestination {
    Fixed(String),
    Smart(SmartLink),
}

/// Runs the click pipeline
///
/// # Errors
///
/// - [`TrackingError::LinkNotFound`] for an unknown code
/// - [`TrackingError::LinkInactive`] when the affiliate or offer is not active
///   and there is no fallback
pub async fn track_click(
    pool: &PgPool,
    redis: Option<&RedisClient>,
    request: ClickRequest,
) -> Result<ClickOutcome, TrackingError> {
    let now = Utc::now();

    let link = TrackingLink::find_by_code(pool, &request.code)
        .await?
        .ok_or(TrackingError::LinkNotFound)?;
    let tenant_id = link.tenant_id;

    let affiliate = Affiliate::find_by_id(pool, tenant_id, link.affiliate_id)
        .await?
        .ok_or(TrackingError::LinkNotFound)?;
    let affiliate_active = affiliate.status == AffiliateStatus::Active;

    let target = match (link.offer_id, link.smart_link_id) {
        (Some(offer_id), _) => {
            let offer = Offer::find_by_id(pool, tenant_id, offer_id)
                .await?
                .ok_or(TrackingError::LinkNotFound)?;
            if !affiliate_active || offer.status != OfferStatus::Active {
                tracing::debug!(code = %link.code, "Click on inactive affiliate or offer");
                return Err(TrackingError::LinkInactive);
            }
            Target {
                offer_id: Some(offer.id),
                destination: TargetDestination::Fixed(
                    link.destination_url.clone().unwrap_or(offer.landing_url),
                ),
            }
        }
        (None, Some(smart_link_id)) => {
            let smart_link = SmartLink::find_by_id(pool, tenant_id, smart_link_id)
                .await?
                .ok_or(TrackingError::LinkNotFound)?;
            if !affiliate_active || !smart_link.active {
                return Ok(ClickOutcome::Fallback {
                    location: smart_link.fallback_url,
                });
            }
            Target {
                offer_id: None,
                destination: TargetDestination::Smart(smart_link),
            }
        }
        (None, None) => return Err(TrackingError::LinkNotFound),
    };

    let visitor = request.visitor;
    let device = detect_device(visitor.user_agent.as_deref());

    let base_context = click_context(&visitor, device, affiliate.id, target.offer_id, link.id, now);
    let (mut destination, offer_id) = match target.destination {
        TargetDestination::Fixed(url) => (url, target.offer_id),
        TargetDestination::Smart(smart_link) => {
            let resolved = resolve_smart_link(&smart_link, &base_context);
            (resolved.url, resolved.offer_id)
        }
    };
    let mut context = base_context;
    if let (Value::Object(map), Some(offer_id)) = (&mut context, offer_id) {
        map.insert("offer_id".to_string(), Value::String(offer_id.to_string()));
    }

    let click_id = Uuid::new_v4();
    let new_click = |destination_url: String, is_unique: bool, fraud_score: i32, status: ClickStatus| NewClick {
        id: click_id,
        tenant_id,
        link_id: link.id,
        affiliate_id: affiliate.id,
        offer_id,
        ip: visitor.ip.clone(),
        user_agent: visitor.user_agent.clone(),
        referrer: visitor.referrer.clone(),
        country: visitor.country.clone(),
        device: device.as_str().to_string(),
        sub_ids: Value::Object(visitor.sub_ids.clone()),
        destination_url,
        is_unique,
        fraud_score,
        status,
    };

    let traffic_rules = RuleSet::list_active(pool, tenant_id, RuleKind::Traffic).await?;
    let traffic = evaluate(&traffic_rules, &context);

    if traffic.blocked {
        Click::insert(pool, new_click(String::new(), false, traffic.score, ClickStatus::Blocked)).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            click_id = %click_id,
            reasons = ?traffic.reasons,
            "Click blocked by traffic rules"
        );
        return Ok(ClickOutcome::Blocked {
            click_id,
            redirect_url: traffic.redirect_url,
        });
    }
    if let Some(reroute) = traffic.redirect_url {
        destination = reroute;
    }

    let fraud_rules = RuleSet::list_active(pool, tenant_id, RuleKind::Fraud).await?;
    let fraud = evaluate(&fraud_rules, &context);
    let status = if fraud.flagged {
        ClickStatus::Flagged
    } else {
        ClickStatus::Valid
    };

    let is_unique = is_unique_click(pool, redis, tenant_id, link.id, &visitor.ip, now).await?;

    let location = render_destination(
        &destination,
        click_id,
        affiliate.id,
        offer_id,
        &Value::Object(visitor.sub_ids.clone()),
    );

    let click = Click::insert(pool, new_click(location.clone(), is_unique, fraud.score, status)).await?;

    if status == ClickStatus::Flagged {
        let data = serde_json::json!({
            "click": click,
            "score": fraud.score,
            "reasons": fraud.reasons,
        });
        let queued = match pool.acquire().await {
            Ok(mut conn) => publish(&mut conn, tenant_id, EventType::ClickFlagged, data).await,
            Err(e) => Err(e),
        };
        if let Err(e) = queued {
            tracing::warn!(click_id = %click_id, error = %e, "Failed to queue click.flagged");
        }
    }

    tracing::debug!(
        tenant_id = %tenant_id,
        click_id = %click_id,
        status = status.as_str(),
        is_unique,
        "Click recorded"
    );

    Ok(ClickOutcome::Redirect {
        click_id,
        location,
        status,
        is_unique,
    })
}

/// First click from `ip` on `link_id` in the last 24 hours
///
/// Uses a Redis `SET NX EX` marker when Redis is available and falls back to
/// the clicks table otherwise or on Redis errors.
pub async fn is_unique_click(
    pool: &PgPool,
    redis: Option<&RedisClient>,
    tenant_id: Uuid,
    link_id: Uuid,
    ip: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    if let Some(redis) = redis {
        let key = format!("uniq:{}:{}:{}", tenant_id, link_id, ip);
        match redis.set_once(&key, UNIQUE_WINDOW_SECS).await {
            Ok(created) => return Ok(created),
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable for unique-click check, using database");
            }
        }
    }

    let since = now - Duration::seconds(UNIQUE_WINDOW_SECS as i64);
    Ok(!Click::seen_since(pool, tenant_id, link_id, ip, since).await?)
}

/// Fills `{click_id}`, `{affiliate_id}`, `{offer_id}` and `{sub1}`..`{sub5}`
/// and appends `click_id` to the query string
pub fn render_destination(
    template: &str,
    click_id: Uuid,
    affiliate_id: Uuid,
    offer_id: Option<Uuid>,
    sub_ids: &Value,
) -> String {
    let encode = |value: &str| -> String { byte_serialize(value.as_bytes()).collect() };

    let mut rendered = template
        .replace("{click_id}", &click_id.to_string())
        .replace("{affiliate_id}", &affiliate_id.to_string())
        .replace(
            "{offer_id}",
            &offer_id.map(|id| id.to_string()).unwrap_or_default(),
        );

    for key in SUB_ID_KEYS {
        let placeholder = format!("{{{}}}", key);
        if rendered.contains(&placeholder) {
            let value = sub_ids.get(key).and_then(Value::as_str).unwrap_or_default();
            rendered = rendered.replace(&placeholder, &encode(value));
        }
    }

    match Url::parse(&rendered) {
        Ok(mut url) => {
            let already_set = url.query_pairs().any(|(k, _)| k == "click_id");
            if !already_set {
                url.query_pairs_mut().append_pair("click_id", &click_id.to_string());
            }
            url.to_string()
        }
        Err(_) => {
            let separator = if rendered.contains('?') { '&' } else { '?' };
            format!("{}{}click_id={}", rendered, separator, click_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_destination_appends_click_id() {
        let click_id = Uuid::new_v4();
        let url = render_destination("https://shop.example/shoes", click_id, Uuid::nil(), None, &json!({}));

        assert_eq!(url, format!("https://shop.example/shoes?click_id={}", click_id));
    }

    #[test]
    fn test_render_destination_macros() {
        let click_id = Uuid::new_v4();
        let affiliate_id = Uuid::new_v4();
        let url = render_destination(
            "https://shop.example/p?utm_source=aff&aff={affiliate_id}&s1={sub1}&s2={sub2}",
            click_id,
            affiliate_id,
            None,
            &json!({"sub1": "spring sale"}),
        );

        assert_eq!(
            url,
            format!(
                "https://shop.example/p?utm_source=aff&aff={}&s1=spring+sale&s2=&click_id={}",
                affiliate_id, click_id
            )
        );
    }

    #[test]
    fn test_render_destination_keeps_explicit_click_id() {
        let click_id = Uuid::new_v4();
        let url = render_destination(
            "https://shop.example/?click_id={click_id}",
            click_id,
            Uuid::nil(),
            None,
            &json!({}),
        );

        assert_eq!(url, format!("https://shop.example/?click_id={}", click_id));
    }
}
