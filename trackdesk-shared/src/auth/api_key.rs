/// API key and random token utilities
///
/// Key generation and hashing used by `models::api_key`, plus the base62
/// generator shared by referral codes, link codes and webhook secrets.
///
/// # Key Format
///
/// `tdk_` followed by 32 base62 characters ([A-Za-z0-9]), 36 characters in
/// total. Only the SHA-256 hex digest is stored; the first
/// [`DISPLAY_PREFIX_LENGTH`] characters are kept separately for listings.
///
/// # Example
///
/// ```
/// use trackdesk_shared::auth::api_key::{generate_api_key, hash_api_key, validate_api_key_format};
///
/// let (key, hash) = generate_api_key();
/// assert!(key.starts_with("tdk_"));
/// assert_eq!(key.len(), 36);
/// assert!(validate_api_key_format(&key));
/// assert_eq!(hash, hash_api_key(&key));
/// ```

use rand::Rng;
use sha2::{Digest, Sha256};

/// Length of the random part of the API key (characters)
const KEY_RANDOM_LENGTH: usize = 32;

/// API key prefix
pub const KEY_PREFIX: &str = "tdk_";

/// Total length of an API key (prefix + random)
pub const API_KEY_LENGTH: usize = KEY_PREFIX.len() + KEY_RANDOM_LENGTH;

/// Number of leading characters stored as the display prefix
pub const DISPLAY_PREFIX_LENGTH: usize = 10;

const BASE62: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generates a new API key
///
/// # Returns
///
/// Tuple of (plaintext_key, sha256_hash)
pub fn generate_api_key() -> (String, String) {
    let key = format!("{}{}", KEY_PREFIX, generate_random_string(KEY_RANDOM_LENGTH));
    let hash = hash_api_key(&key);

    (key, hash)
}

/// Generates a random base62 string of `length` characters
///
/// ```
/// use trackdesk_shared::auth::api_key::generate_random_string;
///
/// let code = generate_random_string(8);
/// assert_eq!(code.len(), 8);
/// assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
/// ```
pub fn generate_random_string(length: usize) -> String {
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| BASE62[rng.gen_range(0..BASE62.len())] as char)
        .collect()
}

/// Hashes an API key using SHA-256, hex-encoded (64 characters)
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Returns the display prefix of a key (`tdk_` plus the first six random characters)
pub fn extract_prefix(key: &str) -> String {
    key.chars().take(DISPLAY_PREFIX_LENGTH).collect()
}

/// Checks the `tdk_` prefix, the length and the base62 body
pub fn validate_api_key_format(key: &str) -> bool {
    if key.len() != API_KEY_LENGTH || !key.starts_with(KEY_PREFIX) {
        return false;
    }

    key[KEY_PREFIX.len()..].chars().all(|c| c.is_ascii_alphanumeric())
}

/// Validates an API key against a stored hash in constant time
pub fn verify_api_key(key: &str, stored_hash: &str) -> bool {
    constant_time_compare(&hash_api_key(key), stored_hash)
}

/// Constant-time string comparison
///
/// Length differences return early; equal-length inputs are always compared in full.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Parses scopes from a comma-separated string
///
/// ```
/// use trackdesk_shared::auth::api_key::parse_scopes;
///
/// assert_eq!(
///     parse_scopes("conversions:write, affiliates:read"),
///     vec!["conversions:write", "affiliates:read"]
/// );
/// ```
pub fn parse_scopes(scopes_str: &str) -> Vec<String> {
    scopes_str
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Checks if a scope list grants `required`
///
/// `*` grants everything and `resource:*` grants every action on `resource`.
///
/// ```
/// use trackdesk_shared::auth::api_key::has_scope;
///
/// let scopes = vec!["conversions:write".to_string(), "affiliates:*".to_string()];
/// assert!(has_scope(&scopes, "conversions:write"));
/// assert!(has_scope(&scopes, "affiliates:delete"));
/// assert!(!has_scope(&scopes, "payouts:read"));
/// ```
pub fn has_scope(scopes: &[String], required: &str) -> bool {
    scopes.iter().any(|scope| {
        if scope == "*" || scope == required {
            return true;
        }

        match scope.strip_suffix('*') {
            Some(prefix) if prefix.ends_with(':') => required.starts_with(prefix),
            _ => false,
        }
    })
}
