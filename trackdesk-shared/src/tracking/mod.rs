/// Click and conversion tracking
///
/// # Modules
///
/// - [`context`]: device detection and rule evaluation contexts
/// - [`smart_link`]: smart-link target selection
/// - [`click`]: the `/t/{code}` click pipeline
/// - [`attribution`]: resolving a conversion to an affiliate and offer
/// - [`commission`]: commission math
/// - [`conversion`]: the conversion pipeline

pub mod attribution;
pub mod click;
pub mod commission;
pub mod context;
pub mod conversion;
pub mod smart_link;

use thiserror::Error;
use uuid::Uuid;

pub use attribution::{attribute, Attribution, AttributionRequest};
pub use click::{track_click, ClickOutcome, ClickRequest};
pub use commission::compute_commission;
pub use context::{detect_device, Device};
pub use conversion::{record_conversion, ConversionRequest};
pub use smart_link::resolve_smart_link;

/// Tracking pipeline error
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("Tracking link not found")]
    LinkNotFound,

    #[error("Tracking link is not active")]
    LinkInactive,

    #[error("Conversion could not be attributed to an affiliate")]
    Unattributed,

    #[error("Coupon '{0}' cannot be redeemed")]
    CouponUnavailable(String),

    #[error("Order '{order_id}' was already recorded")]
    DuplicateOrder { order_id: String, existing_id: Uuid },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Parses a decimal major-unit amount (`"19.99"`) into minor units, rounding half-up
pub fn parse_amount_to_cents(amount: &str) -> Result<i64, TrackingError> {
    let trimmed = amount.trim();
    let invalid = || TrackingError::InvalidAmount(amount.to_string());

    if trimmed.is_empty() || trimmed.starts_with('-') {
        return Err(invalid());
    }

    let (whole, frac) = match trimmed.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (trimmed, ""),
    };

    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
    let digits: Vec<u32> = frac.chars().filter_map(|c| c.to_digit(10)).collect();

    let mut cents = i64::from(digits.first().copied().unwrap_or(0)) * 10
        + i64::from(digits.get(1).copied().unwrap_or(0));
    if digits.get(2).copied().unwrap_or(0) >= 5 {
        cents += 1;
    }

    whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(cents))
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_to_cents() {
        assert_eq!(parse_amount_to_cents("19.99").unwrap(), 1999);
        assert_eq!(parse_amount_to_cents("19.9").unwrap(), 1990);
        assert_eq!(parse_amount_to_cents("20").unwrap(), 2000);
        assert_eq!(parse_amount_to_cents("0.005").unwrap(), 1);
        assert_eq!(parse_amount_to_cents("10.994").unwrap(), 1099);
        assert_eq!(parse_amount_to_cents(".5").unwrap(), 50);
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert!(parse_amount_to_cents("").is_err());
        assert!(parse_amount_to_cents("-5").is_err());
        assert!(parse_amount_to_cents("12,50").is_err());
        assert!(parse_amount_to_cents("abc").is_err());
        assert!(parse_amount_to_cents(".").is_err());
    }
}
