/// HMAC-SHA256 request signing and verification
///
/// - Outbound webhooks: `X-Trackdesk-Signature: t=<unix>,v1=<hex>` over `"<t>.<body>"`
/// - Stripe: `Stripe-Signature: t=<unix>,v1=<hex>[,v1=...]` over `"<t>.<body>"`, 5 minute tolerance
/// - Shopify: `X-Shopify-Hmac-Sha256: <base64>` over the raw body
///
/// # Example
///
/// ```
/// use trackdesk_shared::signing::{sign_payload, verify_trackdesk_signature};
///
/// let header = sign_payload("whsec_secret", 1_760_000_000, br#"{"id":"evt"}"#);
/// assert!(verify_trackdesk_signature("whsec_secret", &header, br#"{"id":"evt"}"#, 1_760_000_030, 300).is_ok());
/// ```
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the outbound webhook signature
pub const SIGNATURE_HEADER: &str = "X-Trackdesk-Signature";

/// Replay window for timestamped signatures
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Malformed signature header")]
    Malformed,

    #[error("Signature timestamp outside tolerance")]
    Expired,

    #[error("Signature mismatch")]
    Mismatch,

    #[error("Invalid signing key")]
    InvalidKey,
}

fn mac_for(secret: &str) -> Result<HmacSha256, SignatureError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)
}

fn timestamped_mac(secret: &str, timestamp: i64, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = mac_for(secret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Hex HMAC-SHA256 of `"<timestamp>.<body>"`
pub fn compute_signature(secret: &str, timestamp: i64, body: &[u8]) -> String {
    match timestamped_mac(secret, timestamp, body) {
        Ok(mac) => hex::encode(mac.finalize().into_bytes()),
        Err(_) => String::new(),
    }
}

/// Full `X-Trackdesk-Signature` header value
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> String {
    format!("t={},v1={}", timestamp, compute_signature(secret, timestamp, body))
}

/// Parsed `t=...,v1=...` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedSignature {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

/// Parses `t=<unix>,v1=<hex>` (extra `v1` entries and unknown keys allowed)
pub fn parse_timestamped_header(header: &str) -> Result<TimestampedSignature, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(TimestampedSignature {
            timestamp,
            signatures,
        }),
        _ => Err(SignatureError::Malformed),
    }
}

fn verify_timestamped(
    secret: &str,
    header: &str,
    body: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let parsed = parse_timestamped_header(header)?;

    if (now - parsed.timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let mac = timestamped_mac(secret, parsed.timestamp, body)?;
    let matched = parsed
        .signatures
        .iter()
        .any(|sig| mac.clone().verify_slice(sig).is_ok());

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Verifies an `X-Trackdesk-Signature` header
pub fn verify_trackdesk_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    verify_timestamped(secret, header, body, now, tolerance_secs)
}

/// Verifies a `Stripe-Signature` header
pub fn verify_stripe_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    now: i64,
) -> Result<(), SignatureError> {
    verify_timestamped(secret, header, body, now, DEFAULT_TOLERANCE_SECS)
}

/// Base64 HMAC-SHA256 of the body, as Shopify sends it
pub fn compute_shopify_hmac(secret: &str, body: &[u8]) -> String {
    match mac_for(secret) {
        Ok(mut mac) => {
            mac.update(body);
            BASE64.encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Verifies an `X-Shopify-Hmac-Sha256` header
pub fn verify_shopify_hmac(secret: &str, header: &str, body: &[u8]) -> Result<(), SignatureError> {
    let expected = BASE64
        .decode(header.trim())
        .map_err(|_| SignatureError::Malformed)?;

    let mut mac = mac_for(secret)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"type":"conversion.created"}"#;

    #[test]
    fn test_signature_is_deterministic_hex() {
        let a = compute_signature(SECRET, 1_700_000_000, BODY);
        let b = compute_signature(SECRET, 1_700_000_000, BODY);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, compute_signature(SECRET, 1_700_000_001, BODY));
    }

    #[test]
    fn test_sign_and_verify() {
        let header = sign_payload(SECRET, 1_700_000_000, BODY);
        assert!(header.starts_with("t=1700000000,v1="));

        assert_eq!(verify_trackdesk_signature(SECRET, &header, BODY, 1_700_000_100, 300), Ok(()));
        assert_eq!(
            verify_trackdesk_signature("other", &header, BODY, 1_700_000_100, 300),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_trackdesk_signature(SECRET, &header, b"tampered", 1_700_000_100, 300),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stripe_tolerance_and_multiple_signatures() {
        let t = 1_700_000_000;
        let good = compute_signature(SECRET, t, BODY);
        let header = format!("t={},v1={},v1={}", t, "00".repeat(32), good);

        assert_eq!(verify_stripe_signature(SECRET, &header, BODY, t + 299), Ok(()));
        assert_eq!(
            verify_stripe_signature(SECRET, &header, BODY, t + 301),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn test_malformed_headers() {
        assert_eq!(parse_timestamped_header("garbage"), Err(SignatureError::Malformed));
        assert_eq!(parse_timestamped_header("t=12"), Err(SignatureError::Malformed));
        assert_eq!(parse_timestamped_header("v1=abcd"), Err(SignatureError::Malformed));
    }

    #[test]
    fn test_shopify_hmac() {
        let header = compute_shopify_hmac(SECRET, BODY);

        assert_eq!(verify_shopify_hmac(SECRET, &header, BODY), Ok(()));
        assert_eq!(verify_shopify_hmac(SECRET, &header, b"{}"), Err(SignatureError::Mismatch));
        assert_eq!(verify_shopify_hmac(SECRET, "%%%", BODY), Err(SignatureError::Malformed));
    }
}
