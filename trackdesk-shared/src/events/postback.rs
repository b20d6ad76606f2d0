//! Affiliate postback URLs
//!
//! Affiliates register a URL template such as
//! `https://tracker.example/cb?cid={click_id}&payout={commission}` and get a
//! GET request per conversion with the macros filled in.

use std::collections::HashMap;

use url::form_urlencoded::byte_serialize;

use crate::models::conversion::Conversion;

/// Macros recognised in postback templates
pub const POSTBACK_MACROS: [&str; 14] = [
    "click_id",
    "conversion_id",
    "order_id",
    "amount",
    "commission",
    "currency",
    "status",
    "offer_id",
    "affiliate_id",
    "sub1",
    "sub2",
    "sub3",
    "sub4",
    "sub5",
];

/// Formats minor units as a decimal string (`1999` -> `19.99`)
pub fn format_minor_units(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Macro values for a conversion
///
/// `sub_ids` are the `sub1`..`sub5` values of the attributed click.
pub fn conversion_macros(
    conversion: &Conversion,
    sub_ids: &serde_json::Value,
) -> HashMap<&'static str, String> {
    let mut values = HashMap::new();

    values.insert(
        "click_id",
        conversion.click_id.map(|id| id.to_string()).unwrap_or_default(),
    );
    values.insert("conversion_id", conversion.id.to_string());
    values.insert("order_id", conversion.order_id.clone().unwrap_or_default());
    values.insert("amount", format_minor_units(conversion.amount_cents));
    values.insert("commission", format_minor_units(conversion.commission_cents));
    values.insert("currency", conversion.currency.clone());
    values.insert("status", conversion.status.as_str().to_string());
    values.insert("offer_id", conversion.offer_id.to_string());
    values.insert("affiliate_id", conversion.affiliate_id.to_string());

    for key in ["sub1", "sub2", "sub3", "sub4", "sub5"] {
        let value = sub_ids
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        values.insert(key, value);
    }

    values
}

/// Replaces `{macro}` placeholders with URL-encoded values
///
/// Unknown placeholders are left untouched. Known macros without a value
/// become empty strings.
pub fn expand_macros(template: &str, values: &HashMap<&'static str, String>) -> String {
    let mut out = template.to_string();

    for name in POSTBACK_MACROS {
        let placeholder = format!("{{{}}}", name);
        if out.contains(&placeholder) {
            let value = values.get(name).map(String::as_str).unwrap_or_default();
            let encoded: String = byte_serialize(value.as_bytes()).collect();
            out = out.replace(&placeholder, &encoded);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversion::{ConversionSource, ConversionStatus};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn conversion() -> Conversion {
        Conversion {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            click_id: Some(Uuid::new_v4()),
            affiliate_id: Uuid::new_v4(),
            offer_id: Uuid::new_v4(),
            coupon_id: None,
            order_id: Some("ORD 1001&x".to_string()),
            amount_cents: 12999,
            commission_cents: 1950,
            currency: "USD".to_string(),
            status: ConversionStatus::Approved,
            fraud_score: 0,
            source: ConversionSource::Postback,
            payout_id: None,
            metadata: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_format_minor_units() {
        assert_eq!(format_minor_units(1999), "19.99");
        assert_eq!(format_minor_units(5), "0.05");
        assert_eq!(format_minor_units(0), "0.00");
        assert_eq!(format_minor_units(-250), "-2.50");
    }

    #[test]
    fn test_expand_macros() {
        let conversion = conversion();
        let values = conversion_macros(&conversion, &json!({"sub1": "fb ads", "sub2": "a/b"}));

        let url = expand_macros(
            "https://tracker.example/cb?cid={click_id}&oid={order_id}&p={commission}&s={status}&s1={sub1}&s2={sub2}&s3={sub3}&x={unknown}",
            &values,
        );

        assert_eq!(
            url,
            format!(
                "https://tracker.example/cb?cid={}&oid=ORD+1001%26x&p=19.50&s=approved&s1=fb+ads&s2=a%2Fb&s3=&x={{unknown}}",
                conversion.click_id.unwrap()
            )
        );
    }

    #[test]
    fn test_missing_click_gives_empty_value() {
        let mut conversion = conversion();
        conversion.click_id = None;
        let values = conversion_macros(&conversion, &json!({}));

        assert_eq!(expand_macros("cid={click_id}", &values), "cid=");
    }
}
