//! Eligibility decision policy.
//!
//! Fuses the deterministic numeric rule set with the upstream decision
//! model's verdict. Evaluation is an ordered rule list: numeric rules fire
//! first, the model verdict is accepted only above the auto-approval
//! confidence, and everything else lands in needs-review. Monetary values
//! are currency minor units throughout.

use serde::{Deserialize, Serialize};

use crate::entities::DecisionOutcome;

pub const REASON_INSUFFICIENT_DATA: &str = "insufficient_data";
pub const REASON_WITHIN_THRESHOLDS: &str = "income_and_balance_within_thresholds";
pub const REASON_INCOME_ABOVE_THRESHOLD: &str = "income_above_threshold";
pub const REASON_LOW_MODEL_CONFIDENCE: &str = "model_confidence_below_auto_approval";

/// Business-rule knobs. Defaults mirror the production policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityConfig {
    /// Monthly income ceiling for approval.
    pub income_threshold: i64,
    /// Closing balance ceiling for approval.
    pub balance_threshold: i64,
    /// Below this model confidence the verdict is never trusted.
    pub confidence_min: f64,
    /// At or above this model confidence an approve/reject verdict is
    /// accepted verbatim.
    pub auto_approve_min: f64,
    /// Maximum benefit granted by the numeric rule.
    pub benefit_cap: i64,
    /// Flat component of the numeric benefit formula.
    pub benefit_base: i64,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            income_threshold: 4000_00,
            balance_threshold: 1500_00,
            confidence_min: 0.7,
            auto_approve_min: 0.8,
            benefit_cap: 2500_00,
            benefit_base: 500_00,
        }
    }
}

/// Numeric fields available to the rule set. Either may be absent in
/// partial-success mode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NumericInputs {
    pub monthly_income: Option<i64>,
    pub closing_balance: Option<i64>,
    /// Whether an identity-card extract confirmed the applicant. Approval is
    /// never granted on financials alone.
    pub identity_verified: bool,
}

/// Verdict returned by the upstream decision model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVerdict {
    pub outcome: DecisionOutcome,
    pub confidence: f64,
    pub reasoning: String,
    pub benefit_amount: Option<i64>,
}

/// Recorded when a high-confidence model verdict contradicts the numeric
/// rule. The numeric rule wins; the disagreement is journaled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disagreement {
    pub rule_outcome: DecisionOutcome,
    pub model_outcome: DecisionOutcome,
    pub model_confidence: f64,
}

/// Final fused decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedDecision {
    pub outcome: DecisionOutcome,
    pub confidence: f64,
    pub reasoning: String,
    pub benefit_amount: Option<i64>,
    pub disagreement: Option<Disagreement>,
}

/// Build [`NumericInputs`] from the kind-specific extract maps.
///
/// Monetary fields tolerate both integer minor units and fractional major
/// units; identity is verified when the identity extract carries a non-empty
/// `national_id`.
pub fn numeric_inputs_from_extracts(
    bank: Option<&serde_json::Value>,
    id: Option<&serde_json::Value>,
) -> NumericInputs {
    NumericInputs {
        monthly_income: bank
            .and_then(|v| v.get("monthly_income"))
            .and_then(json_amount),
        closing_balance: bank
            .and_then(|v| v.get("closing_balance"))
            .and_then(json_amount),
        identity_verified: id
            .and_then(|v| v.get("national_id"))
            .and_then(|v| v.as_str())
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false),
    }
}

fn json_amount(v: &serde_json::Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64))
}

/// Benefit for an approved income under the numeric rule.
fn rule_benefit(monthly_income: i64, cfg: &EligibilityConfig) -> i64 {
    (cfg.income_threshold - monthly_income + cfg.benefit_base).min(cfg.benefit_cap)
}

/// The deterministic numeric verdict, if the inputs support one.
///
/// Approval requires both figures within thresholds and a verified identity.
/// Rejection on income alone does not require identity.
pub fn rule_verdict(
    inputs: &NumericInputs,
    cfg: &EligibilityConfig,
) -> Option<(DecisionOutcome, Option<i64>)> {
    match (inputs.monthly_income, inputs.closing_balance) {
        (Some(income), Some(balance))
            if inputs.identity_verified
                && income <= cfg.income_threshold
                && balance <= cfg.balance_threshold =>
        {
            Some((DecisionOutcome::Approved, Some(rule_benefit(income, cfg))))
        }
        (Some(income), _) if income > cfg.income_threshold => {
            Some((DecisionOutcome::Rejected, None))
        }
        _ => None,
    }
}

/// Fuse the numeric rule set with the model verdict.
///
/// First match wins. When the rule and a high-confidence model verdict agree
/// the model verdict is accepted verbatim; when they disagree the rule wins
/// and the disagreement is reported for journaling.
pub fn evaluate(
    inputs: &NumericInputs,
    model: Option<&ModelVerdict>,
    cfg: &EligibilityConfig,
) -> FusedDecision {
    if let Some((rule_outcome, rule_benefit)) = rule_verdict(inputs, cfg) {
        let mut disagreement = None;
        if let Some(m) = model {
            if m.confidence >= cfg.auto_approve_min {
                if m.outcome == rule_outcome {
                    return FusedDecision {
                        outcome: m.outcome,
                        confidence: m.confidence,
                        reasoning: m.reasoning.clone(),
                        benefit_amount: m.benefit_amount.or(rule_benefit),
                        disagreement: None,
                    };
                }
                disagreement = Some(Disagreement {
                    rule_outcome,
                    model_outcome: m.outcome,
                    model_confidence: m.confidence,
                });
            }
        }

        let reasoning = match rule_outcome {
            DecisionOutcome::Approved => REASON_WITHIN_THRESHOLDS,
            _ => REASON_INCOME_ABOVE_THRESHOLD,
        };
        return FusedDecision {
            outcome: rule_outcome,
            confidence: 1.0,
            reasoning: reasoning.to_string(),
            benefit_amount: rule_benefit,
            disagreement,
        };
    }

    match model {
        Some(m) if m.outcome != DecisionOutcome::NeedsReview
            && m.confidence >= cfg.auto_approve_min =>
        {
            FusedDecision {
                outcome: m.outcome,
                confidence: m.confidence,
                reasoning: m.reasoning.clone(),
                benefit_amount: m.benefit_amount,
                disagreement: None,
            }
        }
        Some(m) => FusedDecision {
            outcome: DecisionOutcome::NeedsReview,
            confidence: m.confidence,
            reasoning: if m.outcome == DecisionOutcome::NeedsReview {
                m.reasoning.clone()
            } else {
                REASON_LOW_MODEL_CONFIDENCE.to_string()
            },
            benefit_amount: None,
            disagreement: None,
        },
        None => FusedDecision {
            outcome: DecisionOutcome::NeedsReview,
            confidence: 0.0,
            reasoning: REASON_INSUFFICIENT_DATA.to_string(),
            benefit_amount: None,
            disagreement: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EligibilityConfig {
        EligibilityConfig::default()
    }

    fn inputs(income: Option<i64>, balance: Option<i64>) -> NumericInputs {
        NumericInputs {
            monthly_income: income,
            closing_balance: balance,
            identity_verified: true,
        }
    }

    fn model(outcome: DecisionOutcome, confidence: f64, benefit: Option<i64>) -> ModelVerdict {
        ModelVerdict {
            outcome,
            confidence,
            reasoning: "model reasoning".to_string(),
            benefit_amount: benefit,
        }
    }

    #[test]
    fn approves_within_thresholds_agreeing_with_model() {
        let m = model(DecisionOutcome::Approved, 0.85, Some(2000_00));
        let d = evaluate(&inputs(Some(3500_00), Some(1200_00)), Some(&m), &cfg());
        assert_eq!(d.outcome, DecisionOutcome::Approved);
        assert_eq!(d.benefit_amount, Some(2000_00));
        assert_eq!(d.confidence, 0.85);
        assert!(d.disagreement.is_none());
    }

    #[test]
    fn rejects_high_income_agreeing_with_model() {
        let m = model(DecisionOutcome::Rejected, 0.9, None);
        let d = evaluate(&inputs(Some(6000_00), Some(8000_00)), Some(&m), &cfg());
        assert_eq!(d.outcome, DecisionOutcome::Rejected);
        assert_eq!(d.benefit_amount, None);
    }

    #[test]
    fn rule_wins_on_high_confidence_disagreement() {
        let m = model(DecisionOutcome::Approved, 0.95, Some(1000_00));
        let d = evaluate(&inputs(Some(6000_00), Some(100_00)), Some(&m), &cfg());
        assert_eq!(d.outcome, DecisionOutcome::Rejected);
        assert_eq!(d.confidence, 1.0);
        let disagreement = d.disagreement.expect("disagreement recorded");
        assert_eq!(disagreement.rule_outcome, DecisionOutcome::Rejected);
        assert_eq!(disagreement.model_outcome, DecisionOutcome::Approved);
    }

    #[test]
    fn rule_applies_without_model() {
        let d = evaluate(&inputs(Some(3500_00), Some(1200_00)), None, &cfg());
        assert_eq!(d.outcome, DecisionOutcome::Approved);
        // min(2500, 4000 - 3500 + 500)
        assert_eq!(d.benefit_amount, Some(1000_00));
        assert_eq!(d.reasoning, REASON_WITHIN_THRESHOLDS);
    }

    #[test]
    fn benefit_is_capped() {
        let d = evaluate(&inputs(Some(0), Some(0)), None, &cfg());
        assert_eq!(d.benefit_amount, Some(2500_00));
    }

    #[test]
    fn no_approval_without_identity() {
        let mut i = inputs(Some(3500_00), Some(1200_00));
        i.identity_verified = false;
        let nr = model(DecisionOutcome::NeedsReview, 0.0, None);
        let d = evaluate(&i, Some(&nr), &cfg());
        assert_eq!(d.outcome, DecisionOutcome::NeedsReview);
    }

    #[test]
    fn rejection_does_not_require_identity() {
        let mut i = inputs(Some(6000_00), None);
        i.identity_verified = false;
        let d = evaluate(&i, None, &cfg());
        assert_eq!(d.outcome, DecisionOutcome::Rejected);
    }

    #[test]
    fn missing_balance_needs_review() {
        let d = evaluate(&inputs(Some(3500_00), None), None, &cfg());
        assert_eq!(d.outcome, DecisionOutcome::NeedsReview);
        assert_eq!(d.reasoning, REASON_INSUFFICIENT_DATA);
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn confidence_exactly_at_point_seven_is_needs_review() {
        let m = model(DecisionOutcome::Approved, 0.7, Some(900_00));
        let d = evaluate(&NumericInputs::default(), Some(&m), &cfg());
        assert_eq!(d.outcome, DecisionOutcome::NeedsReview);
        assert_eq!(d.reasoning, REASON_LOW_MODEL_CONFIDENCE);
    }

    #[test]
    fn confidence_at_auto_approve_accepts_model() {
        let m = model(DecisionOutcome::Approved, 0.8, Some(900_00));
        let d = evaluate(&NumericInputs::default(), Some(&m), &cfg());
        assert_eq!(d.outcome, DecisionOutcome::Approved);
        assert_eq!(d.benefit_amount, Some(900_00));
    }

    #[test]
    fn model_needs_review_passes_its_reasoning_through() {
        let m = ModelVerdict {
            outcome: DecisionOutcome::NeedsReview,
            confidence: 0.0,
            reasoning: REASON_INSUFFICIENT_DATA.to_string(),
            benefit_amount: None,
        };
        let d = evaluate(&NumericInputs::default(), Some(&m), &cfg());
        assert_eq!(d.outcome, DecisionOutcome::NeedsReview);
        assert_eq!(d.reasoning, REASON_INSUFFICIENT_DATA);
    }

    #[test]
    fn extract_maps_parse_into_numeric_inputs() {
        let bank = serde_json::json!({
            "monthly_income": 3500_00,
            "closing_balance": 1200.0,
            "account_holder_name": "A. Applicant"
        });
        let id = serde_json::json!({ "national_id": "784-1990-0000001-0" });
        let inputs = numeric_inputs_from_extracts(Some(&bank), Some(&id));
        assert_eq!(inputs.monthly_income, Some(3500_00));
        assert_eq!(inputs.closing_balance, Some(1200));
        assert!(inputs.identity_verified);

        let inputs = numeric_inputs_from_extracts(Some(&bank), None);
        assert!(!inputs.identity_verified);
    }

    #[test]
    fn same_inputs_same_verdict() {
        let i = inputs(Some(2100_00), Some(700_00));
        let a = evaluate(&i, None, &cfg());
        let b = evaluate(&i, None, &cfg());
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(a.benefit_amount, b.benefit_amount);
    }
}
