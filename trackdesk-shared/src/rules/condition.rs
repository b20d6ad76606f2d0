//! Condition matching against a JSON evaluation context
//!
//! Conditions address the context with dotted paths (`click.country`,
//! `sub_ids.sub1`, `items.0.sku`). String comparisons ignore case; numeric
//! comparisons accept numbers and numeric strings on either side.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Logic, RuleError};

/// Compiled patterns, dropped wholesale past this many entries
const REGEX_CACHE_CAPACITY: usize = 512;

static REGEX_CACHE: Lazy<RwLock<HashMap<String, Regex>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    In,
    NotIn,
    Regex,
    Exists,
    NotExists,
}

impl Operator {
    fn is_numeric(&self) -> bool {
        matches!(
            self,
            Operator::GreaterThan
                | Operator::GreaterThanOrEqual
                | Operator::LessThan
                | Operator::LessThanOrEqual
        )
    }
}

/// `{field, operator, value}` predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted path into the context
    pub field: String,

    pub operator: Operator,

    /// Ignored by `exists` / `not_exists`
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Checks that the condition can be evaluated
    ///
    /// Regex patterns must compile, `in`/`not_in` need an array and numeric
    /// operators need a numeric value.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.field.trim().is_empty() {
            return Err(RuleError::InvalidCondition {
                field: self.field.clone(),
                message: "field must not be empty".to_string(),
            });
        }

        match self.operator {
            Operator::Regex => {
                let pattern = self.value.as_str().ok_or_else(|| RuleError::InvalidCondition {
                    field: self.field.clone(),
                    message: "regex value must be a string".to_string(),
                })?;
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| RuleError::InvalidRegex {
                        field: self.field.clone(),
                        message: e.to_string(),
                    })?;
            }
            Operator::In | Operator::NotIn if !self.value.is_array() => {
                return Err(RuleError::InvalidCondition {
                    field: self.field.clone(),
                    message: "in/not_in value must be an array".to_string(),
                });
            }
            op if op.is_numeric() && as_number(&self.value).is_none() => {
                return Err(RuleError::InvalidCondition {
                    field: self.field.clone(),
                    message: "numeric comparison needs a numeric value".to_string(),
                });
            }
            _ => {}
        }

        Ok(())
    }

    /// Evaluates the condition against `context`
    ///
    /// A missing or null field fails every positive operator and satisfies
    /// `not_equals`, `not_contains`, `not_in` and `not_exists`.
    pub fn matches(&self, context: &Value) -> bool {
        let actual = lookup(context, &self.field).filter(|v| !v.is_null());

        let Some(actual) = actual else {
            return matches!(
                self.operator,
                Operator::NotEquals | Operator::NotContains | Operator::NotIn | Operator::NotExists
            );
        };

        let expected = &self.value;

        match self.operator {
            Operator::Exists => true,
            Operator::NotExists => false,
            Operator::Equals => loose_eq(actual, expected),
            Operator::NotEquals => !loose_eq(actual, expected),
            Operator::Contains => contains(actual, expected),
            Operator::NotContains => !contains(actual, expected),
            Operator::StartsWith => string_pair(actual, expected)
                .map_or(false, |(a, e)| a.starts_with(&e)),
            Operator::EndsWith => string_pair(actual, expected)
                .map_or(false, |(a, e)| a.ends_with(&e)),
            Operator::GreaterThan => compare(actual, expected, |a, e| a > e),
            Operator::GreaterThanOrEqual => compare(actual, expected, |a, e| a >= e),
            Operator::LessThan => compare(actual, expected, |a, e| a < e),
            Operator::LessThanOrEqual => compare(actual, expected, |a, e| a <= e),
            Operator::In => in_list(actual, expected),
            Operator::NotIn => expected.is_array() && !in_list(actual, expected),
            Operator::Regex => regex_match(actual, expected),
        }
    }
}

/// Evaluates conditions under `logic`
///
/// An empty list matches under `and` and never under `or`.
pub fn matches_all(logic: Logic, conditions: &[Condition], context: &Value) -> bool {
    match logic {
        Logic::And => conditions.iter().all(|c| c.matches(context)),
        Logic::Or => conditions.iter().any(|c| c.matches(context)),
    }
}

/// Resolves a dotted path; numeric segments index arrays
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Number or numeric string as f64
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Lowercased text form of scalars
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_lowercase()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_pair(actual: &Value, expected: &Value) -> Option<(String, String)> {
    Some((as_text(actual)?, as_text(expected)?))
}

fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(e)) = (as_number(actual), as_number(expected)) {
        return a == e;
    }

    match (actual, expected) {
        (Value::String(a), Value::String(e)) => a.to_lowercase() == e.to_lowercase(),
        (Value::Bool(a), Value::String(e)) | (Value::String(e), Value::Bool(a)) => {
            e.eq_ignore_ascii_case(if *a { "true" } else { "false" })
        }
        _ => actual == expected,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, expected)),
        _ => string_pair(actual, expected).map_or(false, |(a, e)| a.contains(&e)),
    }
}

fn compare(actual: &Value, expected: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(e)) => op(a, e),
        _ => false,
    }
}

fn in_list(actual: &Value, expected: &Value) -> bool {
    expected
        .as_array()
        .map_or(false, |items| items.iter().any(|item| loose_eq(actual, item)))
}

fn regex_match(actual: &Value, expected: &Value) -> bool {
    let (Some(text), Some(pattern)) = (as_text(actual), expected.as_str()) else {
        return false;
    };

    match cached_regex(pattern) {
        Ok(re) => re.is_match(&text),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "Skipping condition with invalid regex");
            false
        }
    }
}

/// Case-insensitive `pattern`, compiled once per process
fn cached_regex(pattern: &str) -> Result<Regex, regex::Error> {
    if let Ok(cache) = REGEX_CACHE.read() {
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }
    }

    let re = RegexBuilder::new(pattern).case_insensitive(true).build()?;

    if let Ok(mut cache) = REGEX_CACHE.write() {
        if cache.len() >= REGEX_CACHE_CAPACITY {
            cache.clear();
        }
        cache.insert(pattern.to_string(), re.clone());
    }

    Ok(re)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "ip": "203.0.113.7",
            "country": "US",
            "device": "mobile",
            "user_agent": "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0) HeadlessChrome",
            "amount": 4999,
            "amount_str": "49.99",
            "click": {"age_seconds": 3, "status": "valid"},
            "tags": ["promo", "Summer"],
            "coupon": null
        })
    }

    fn check(field: &str, operator: Operator, value: Value) -> bool {
        Condition::new(field, operator, value).matches(&ctx())
    }

    #[test]
    fn test_lookup() {
        let c = ctx();
        assert_eq!(lookup(&c, "click.status"), Some(&json!("valid")));
        assert_eq!(lookup(&c, "tags.1"), Some(&json!("Summer")));
        assert_eq!(lookup(&c, "tags.9"), None);
        assert_eq!(lookup(&c, "click.missing.deeper"), None);
    }

    #[test]
    fn test_equality_is_case_insensitive_and_numeric() {
        assert!(check("country", Operator::Equals, json!("us")));
        assert!(check("amount", Operator::Equals, json!("4999")));
        assert!(check("amount_str", Operator::Equals, json!(49.99)));
        assert!(check("country", Operator::NotEquals, json!("CA")));
        assert!(!check("country", Operator::NotEquals, json!("Us")));
    }

    #[test]
    fn test_string_operators() {
        assert!(check("user_agent", Operator::Contains, json!("headless")));
        assert!(check("user_agent", Operator::NotContains, json!("android")));
        assert!(check("ip", Operator::StartsWith, json!("203.0.113.")));
        assert!(check("user_agent", Operator::EndsWith, json!("CHROME")));
        assert!(check("tags", Operator::Contains, json!("summer")));
    }

    #[test]
    fn test_numeric_operators() {
        assert!(check("amount", Operator::GreaterThan, json!(1000)));
        assert!(check("amount_str", Operator::LessThan, json!("50")));
        assert!(check("click.age_seconds", Operator::LessThanOrEqual, json!(3)));
        assert!(check("click.age_seconds", Operator::GreaterThanOrEqual, json!(3)));
        assert!(!check("country", Operator::GreaterThan, json!(1)));
    }

    #[test]
    fn test_membership_operators() {
        assert!(check("country", Operator::In, json!(["ca", "us"])));
        assert!(!check("country", Operator::In, json!(["ca", "mx"])));
        assert!(check("device", Operator::NotIn, json!(["bot", "tablet"])));
        assert!(check("amount", Operator::In, json!([4999])));
    }

    #[test]
    fn test_regex_and_existence() {
        assert!(check("ip", Operator::Regex, json!(r"^203\.0\.113\.\d+$")));
        assert!(check("user_agent", Operator::Regex, json!("iphone")));
        assert!(!check("ip", Operator::Regex, json!("(unclosed")));
        assert!(check("country", Operator::Exists, Value::Null));
        assert!(check("coupon", Operator::NotExists, Value::Null));
        assert!(check("nope", Operator::NotExists, Value::Null));
    }

    #[test]
    fn test_missing_field_semantics() {
        assert!(!check("referrer", Operator::Equals, json!("x")));
        assert!(!check("referrer", Operator::Contains, json!("x")));
        assert!(!check("referrer", Operator::GreaterThan, json!(1)));
        assert!(check("referrer", Operator::NotEquals, json!("x")));
        assert!(check("referrer", Operator::NotIn, json!(["x"])));
    }

    #[test]
    fn test_logic() {
        let us = Condition::new("country", Operator::Equals, json!("US"));
        let bot = Condition::new("device", Operator::Equals, json!("bot"));

        assert!(matches_all(Logic::And, &[], &ctx()));
        assert!(!matches_all(Logic::Or, &[], &ctx()));
        assert!(!matches_all(Logic::And, &[us.clone(), bot.clone()], &ctx()));
        assert!(matches_all(Logic::Or, &[us, bot], &ctx()));
    }

    #[test]
    fn test_validate() {
        assert!(Condition::new("ip", Operator::Regex, json!("^10\\.")).validate().is_ok());
        assert!(matches!(
            Condition::new("ip", Operator::Regex, json!("(unclosed")).validate(),
            Err(RuleError::InvalidRegex { .. })
        ));
        assert!(Condition::new("country", Operator::In, json!("US")).validate().is_err());
        assert!(Condition::new("amount", Operator::GreaterThan, json!("lots")).validate().is_err());
        assert!(Condition::new("", Operator::Exists, Value::Null).validate().is_err());
    }

    #[test]
    fn test_operator_serde() {
        let c: Condition = serde_json::from_str(
            r#"{"field": "amount", "operator": "greater_than_or_equal", "value": 100}"#,
        )
        .unwrap();
        assert_eq!(c.operator, Operator::GreaterThanOrEqual);

        let c: Condition = serde_json::from_str(r#"{"field": "x", "operator": "exists"}"#).unwrap();
        assert_eq!(c.value, Value::Null);
    }

    #[test]
    fn test_regex_compiled_once() {
        let pattern = r"^cached-\d+$";
        let first = cached_regex(pattern).unwrap();
        let second = cached_regex(pattern).unwrap();

        assert_eq!(first.as_str(), second.as_str());
        assert!(second.is_match("CACHED-42"));
        assert!(REGEX_CACHE.read().unwrap().contains_key(pattern));
        assert!(cached_regex("(unclosed").is_err());
    }
}
