//! Rule set evaluation
//!
//! Rules run in ascending priority (ties broken by name). Every matching
//! active rule contributes its actions to one [`Verdict`]; an `allow` action
//! stops evaluation after the rule that carries it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{condition::matches_all, Action, FLAG_SCORE_THRESHOLD};
use crate::models::rule_set::RuleSet;

/// Combined outcome of a rule evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub matched_rule_ids: Vec<Uuid>,
    pub blocked: bool,
    pub flagged: bool,
    pub approve: bool,
    pub reject: bool,
    pub allowed: bool,
    pub score: i32,

    /// First `redirect` target seen
    pub redirect_url: Option<String>,

    /// One entry per contributing rule action
    pub reasons: Vec<String>,
}

impl Verdict {
    /// Folds another verdict into this one
    pub fn merge(&mut self, other: Verdict) {
        self.matched_rule_ids.extend(other.matched_rule_ids);
        self.blocked |= other.blocked;
        self.flagged |= other.flagged;
        self.approve |= other.approve;
        self.reject |= other.reject;
        self.allowed |= other.allowed;
        self.score = self.score.saturating_add(other.score);
        if self.redirect_url.is_none() {
            self.redirect_url = other.redirect_url;
        }
        self.reasons.extend(other.reasons);
        self.flagged |= self.score >= FLAG_SCORE_THRESHOLD;
    }
}

/// Evaluates `rules` against `context`
pub fn evaluate(rules: &[RuleSet], context: &Value) -> Verdict {
    let mut ordered: Vec<&RuleSet> = rules.iter().filter(|r| r.active).collect();
    ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

    let mut verdict = Verdict::default();

    for rule in ordered {
        if !matches_all(rule.logic, &rule.conditions, context) {
            continue;
        }

        verdict.matched_rule_ids.push(rule.id);
        let mut stop = false;

        for action in rule.actions.iter() {
            match action {
                Action::Block => {
                    verdict.blocked = true;
                    verdict.reasons.push(format!("{}: blocked", rule.name));
                }
                Action::Allow => {
                    verdict.allowed = true;
                    stop = true;
                }
                Action::Flag => {
                    verdict.flagged = true;
                    verdict.reasons.push(format!("{}: flagged", rule.name));
                }
                Action::Approve => verdict.approve = true,
                Action::Reject => {
                    verdict.reject = true;
                    verdict.reasons.push(format!("{}: rejected", rule.name));
                }
                Action::Score { points } => {
                    verdict.score = verdict.score.saturating_add(*points);
                    verdict.reasons.push(format!("{}: +{} score", rule.name, points));
                }
                Action::Redirect { url } => {
                    if verdict.redirect_url.is_none() {
                        verdict.redirect_url = Some(url.clone());
                    }
                }
                Action::Hold { reason } => {
                    verdict.flagged = true;
                    verdict.reasons.push(format!("{}: {}", rule.name, reason));
                }
            }
        }

        if stop {
            tracing::debug!(rule_id = %rule.id, rule = %rule.name, "Allow rule matched, stopping evaluation");
            break;
        }
    }

    verdict.flagged |= verdict.score >= FLAG_SCORE_THRESHOLD;
    verdict
}
