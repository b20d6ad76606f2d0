/// Rule engine for fraud, quality and traffic control
///
/// A rule is a list of [`Condition`]s combined under a [`Logic`], plus the
/// [`Action`]s it contributes when it matches. Smart links reuse the same
/// condition format for routing.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use trackdesk_shared::rules::{matches_all, Condition, Logic, Operator};
///
/// let conditions = vec![
///     Condition::new("country", Operator::In, json!(["US", "CA"])),
///     Condition::new("device", Operator::Equals, json!("mobile")),
/// ];
///
/// let context = json!({"country": "ca", "device": "Mobile"});
/// assert!(matches_all(Logic::And, &conditions, &context));
/// ```

pub mod condition;
pub mod engine;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use condition::{lookup, matches_all, Condition, Operator};
pub use engine::{evaluate, Verdict};

/// Fraud score at or above which a click or conversion is flagged
pub const FLAG_SCORE_THRESHOLD: i32 = 100;

/// How a rule combines its conditions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "rule_logic", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    #[default]
    And,
    Or,
}

/// Effect of a matching rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Refuse the click
    Block,

    /// Accept and stop evaluating further rules
    Allow,

    /// Mark for review
    Flag,

    /// Approve a conversion
    Approve,

    /// Reject a conversion
    Reject,

    /// Add to the fraud score
    Score { points: i32 },

    /// Send blocked or rerouted traffic elsewhere
    Redirect { url: String },

    /// Keep a conversion pending with a reason
    Hold { reason: String },
}

/// Rule validation error
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("Invalid condition on '{field}': {message}")]
    InvalidCondition { field: String, message: String },

    #[error("Invalid regex on '{field}': {message}")]
    InvalidRegex { field: String, message: String },

    #[error("Invalid action: {0}")]
    InvalidAction(String),
}

/// Validates every condition of a rule or smart-link target
pub fn validate_conditions(conditions: &[Condition]) -> Result<(), RuleError> {
    conditions.iter().try_for_each(Condition::validate)
}

/// Validates a rule's actions
///
/// Redirect targets must be absolute http(s) URLs.
pub fn validate_actions(actions: &[Action]) -> Result<(), RuleError> {
    if actions.is_empty() {
        return Err(RuleError::InvalidAction(
            "a rule needs at least one action".to_string(),
        ));
    }

    for action in actions {
        match action {
            Action::Redirect { url } => {
                let parsed = url::Url::parse(url)
                    .map_err(|e| RuleError::InvalidAction(format!("redirect url: {}", e)))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(RuleError::InvalidAction(
                        "redirect url must be http or https".to_string(),
                    ));
                }
            }
            Action::Hold { reason } if reason.trim().is_empty() => {
                return Err(RuleError::InvalidAction("hold needs a reason".to_string()));
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_serde() {
        let actions: Vec<Action> = serde_json::from_value(json!([
            {"type": "block"},
            {"type": "score", "points": 40},
            {"type": "redirect", "url": "https://example.com/blocked"},
            {"type": "hold", "reason": "manual review"}
        ]))
        .unwrap();

        assert_eq!(actions[0], Action::Block);
        assert_eq!(actions[1], Action::Score { points: 40 });
        assert_eq!(
            serde_json::to_value(&actions[2]).unwrap(),
            json!({"type": "redirect", "url": "https://example.com/blocked"})
        );
    }

    #[test]
    fn test_validate_actions() {
        assert!(validate_actions(&[Action::Flag]).is_ok());
        assert!(validate_actions(&[]).is_err());
        assert!(validate_actions(&[Action::Redirect {
            url: "javascript:alert(1)".to_string()
        }])
        .is_err());
        assert!(validate_actions(&[Action::Redirect { url: "not a url".to_string() }]).is_err());
        assert!(validate_actions(&[Action::Hold { reason: " ".to_string() }]).is_err());
    }

    #[test]
    fn test_validate_conditions() {
        let good = vec![Condition::new("ip", Operator::Regex, json!("^10\\."))];
        let bad = vec![Condition::new("ip", Operator::Regex, json!("[a-"))];

        assert!(validate_conditions(&good).is_ok());
        assert!(validate_conditions(&bad).is_err());
    }
}
