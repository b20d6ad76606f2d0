//! Rule evaluation contexts
//!
//! Rules and smart-link conditions address these JSON documents with dotted
//! field paths, so the key names here are part of the public rule format.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::models::click::Click;
use crate::models::coupon::Coupon;

/// Sub-ID keys accepted on tracking URLs
pub const SUB_ID_KEYS: [&str; 5] = ["sub1", "sub2", "sub3", "sub4", "sub5"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Mobile,
    Tablet,
    Desktop,
    Bot,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Mobile => "mobile",
            Device::Tablet => "tablet",
            Device::Desktop => "desktop",
            Device::Bot => "bot",
        }
    }
}

const BOT_MARKERS: [&str; 10] = [
    "bot", "crawler", "spider", "slurp", "curl", "wget", "python-requests", "headless",
    "phantomjs", "go-http-client",
];

/// Classifies a user agent; a missing one counts as a bot
pub fn detect_device(user_agent: Option<&str>) -> Device {
    let Some(ua) = user_agent.map(str::to_lowercase).filter(|ua| !ua.trim().is_empty()) else {
        return Device::Bot;
    };

    if BOT_MARKERS.iter().any(|marker| ua.contains(marker)) {
        Device::Bot
    } else if ua.contains("ipad") || ua.contains("tablet") || (ua.contains("android") && !ua.contains("mobile")) {
        Device::Tablet
    } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
        Device::Mobile
    } else {
        Device::Desktop
    }
}

/// Visitor details taken from a click request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Visitor {
    pub ip: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,

    /// ISO 3166-1 alpha-2, uppercased
    pub country: Option<String>,

    /// `sub1`..`sub5`; other keys are dropped
    pub sub_ids: Map<String, Value>,
}

impl Visitor {
    /// Keeps only non-empty `sub1`..`sub5` values
    pub fn with_sub_ids<'a>(mut self, params: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        for (key, value) in params {
            if SUB_ID_KEYS.contains(&key) && !value.is_empty() {
                self.sub_ids.insert(key.to_string(), Value::String(value.to_string()));
            }
        }
        self
    }
}

/// Context for traffic and fraud rules on a click
pub fn click_context(
    visitor: &Visitor,
    device: Device,
    affiliate_id: Uuid,
    offer_id: Option<Uuid>,
    link_id: Uuid,
    now: DateTime<Utc>,
) -> Value {
    let mut context = json!({
        "ip": visitor.ip,
        "user_agent": visitor.user_agent,
        "referrer": visitor.referrer,
        "country": visitor.country,
        "device": device.as_str(),
        "affiliate_id": affiliate_id,
        "offer_id": offer_id,
        "link_id": link_id,
        "hour": now.hour(),
        "weekday": now.format("%A").to_string().to_lowercase(),
        "weekday_number": now.weekday().number_from_monday(),
    });

    if let Value::Object(map) = &mut context {
        for key in SUB_ID_KEYS {
            map.insert(
                key.to_string(),
                visitor.sub_ids.get(key).cloned().unwrap_or(Value::Null),
            );
        }
    }

    context
}

/// Facts about a conversion used by fraud and quality rules
#[derive(Debug, Clone, Default)]
pub struct ConversionFacts<'a> {
    pub amount_cents: i64,
    pub currency: &'a str,
    pub affiliate_id: Uuid,
    pub offer_id: Uuid,
    pub order_id: Option<&'a str>,
    pub source: &'a str,
    pub click: Option<&'a Click>,
    pub coupon: Option<&'a Coupon>,
    pub metadata: Option<&'a Value>,
}

/// Context for fraud and quality rules on a conversion
///
/// `click_age_seconds` is the time between the click and `now`; click fields
/// are null for clickless conversions.
pub fn conversion_context(facts: &ConversionFacts<'_>, now: DateTime<Utc>) -> Value {
    let click = facts.click;

    json!({
        "amount": facts.amount_cents,
        "amount_cents": facts.amount_cents,
        "currency": facts.currency,
        "affiliate_id": facts.affiliate_id,
        "offer_id": facts.offer_id,
        "order_id": facts.order_id,
        "source": facts.source,
        "click_id": click.map(|c| c.id),
        "click_age_seconds": click.map(|c| (now - c.created_at).num_seconds().max(0)),
        "click_status": click.map(|c| c.status.as_str()),
        "ip": click.map(|c| c.ip.as_str()),
        "country": click.and_then(|c| c.country.as_deref()),
        "device": click.map(|c| c.device.as_str()),
        "sub_ids": click.map(|c| c.sub_ids.clone()),
        "coupon": facts.coupon.map(|c| c.code.as_str()),
        "hour": now.hour(),
        "metadata": facts.metadata.cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::click::ClickStatus;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_detect_device() {
        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148";
        let ipad = "Mozilla/5.0 (iPad; CPU OS 16_0 like Mac OS X)";
        let android_phone = "Mozilla/5.0 (Linux; Android 14; Pixel 8) Mobile Safari/537.36";
        let android_tablet = "Mozilla/5.0 (Linux; Android 13; SM-X700) Safari/537.36";
        let desktop = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0";

        assert_eq!(detect_device(Some(iphone)), Device::Mobile);
        assert_eq!(detect_device(Some(ipad)), Device::Tablet);
        assert_eq!(detect_device(Some(android_phone)), Device::Mobile);
        assert_eq!(detect_device(Some(android_tablet)), Device::Tablet);
        assert_eq!(detect_device(Some(desktop)), Device::Desktop);
        assert_eq!(detect_device(Some("Googlebot/2.1")), Device::Bot);
        assert_eq!(detect_device(Some("curl/8.4.0")), Device::Bot);
        assert_eq!(detect_device(None), Device::Bot);
        assert_eq!(detect_device(Some("  ")), Device::Bot);
    }

    #[test]
    fn test_visitor_sub_ids() {
        let visitor = Visitor::default().with_sub_ids([("sub1", "fb"), ("sub2", ""), ("utm_source", "x")]);

        assert_eq!(visitor.sub_ids.len(), 1);
        assert_eq!(visitor.sub_ids["sub1"], "fb");
    }

    #[test]
    fn test_click_context() {
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 14, 5, 0).unwrap();
        let visitor = Visitor {
            ip: "198.51.100.4".to_string(),
            country: Some("DE".to_string()),
            ..Default::default()
        }
        .with_sub_ids([("sub3", "spring")]);

        let ctx = click_context(&visitor, Device::Mobile, Uuid::nil(), None, Uuid::nil(), now);

        assert_eq!(ctx["ip"], "198.51.100.4");
        assert_eq!(ctx["device"], "mobile");
        assert_eq!(ctx["hour"], 14);
        assert_eq!(ctx["weekday"], "saturday");
        assert_eq!(ctx["weekday_number"], 6);
        assert_eq!(ctx["sub3"], "spring");
        assert!(ctx["sub1"].is_null());
        assert!(ctx["offer_id"].is_null());
    }

    #[test]
    fn test_conversion_context_click_age() {
        let now = Utc::now();
        let click = Click {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            link_id: Uuid::nil(),
            affiliate_id: Uuid::nil(),
            offer_id: None,
            ip: "203.0.113.9".to_string(),
            user_agent: None,
            referrer: None,
            country: Some("US".to_string()),
            device: "desktop".to_string(),
            sub_ids: json!({}),
            destination_url: "https://shop.example".to_string(),
            is_unique: true,
            fraud_score: 0,
            status: ClickStatus::Flagged,
            created_at: now - Duration::seconds(4),
        };

        let facts = ConversionFacts {
            amount_cents: 2500,
            currency: "USD",
            click: Some(&click),
            ..Default::default()
        };
        let ctx = conversion_context(&facts, now);

        assert_eq!(ctx["click_age_seconds"], 4);
        assert_eq!(ctx["click_status"], "flagged");
        assert_eq!(ctx["amount"], 2500);
        assert_eq!(ctx["country"], "US");
        assert!(ctx["coupon"].is_null());
    }
}
