//! Finding scorer.
//!
//! Maps a campaign finding onto two 0-10 scales: `severity10` (how bad the
//! attack is) and `exposure10` (how exposed this deployment is, given whether
//! the decision path actually blocked it).

use serde::{Deserialize, Serialize};

/// Business impact of a successful attack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    Medium,
    High,
    Critical,
}

impl Impact {
    fn weight(self) -> f64 {
        match self {
            Impact::Critical => 1.0,
            Impact::High => 0.8,
            Impact::Medium => 0.55,
            Impact::Low => 0.3,
        }
    }
}

/// Whether the decision path stopped the attack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Blocked,
    Allowed,
}

/// Input to the scorer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FindingInput {
    pub risk: f64,
    pub confidence: f64,
    /// Fraction of attempts that reproduced, in [0, 1].
    pub reproduction_rate: f64,
    pub impact: Impact,
    pub outcome: Outcome,
}

/// Scored finding.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FindingScore {
    pub severity10: f64,
    pub exposure10: f64,
}

const BLOCKED_EXPOSURE_FACTOR: f64 = 0.35;

/// Score a finding. Severity is linear in the reproduction rate: halving the
/// rate exactly halves `severity10`.
pub fn score_finding(input: &FindingInput) -> FindingScore {
    let risk = input.risk.clamp(0.0, 1.0);
    let confidence = input.confidence.clamp(0.0, 1.0);
    let reproduction = input.reproduction_rate.clamp(0.0, 1.0);

    let severity10 = ((risk * 0.5 + confidence * 0.3 + 0.2)
        * reproduction
        * input.impact.weight()
        * 10.0)
        .clamp(0.0, 10.0);

    let exposure10 = match input.outcome {
        Outcome::Blocked => severity10 * BLOCKED_EXPOSURE_FACTOR,
        Outcome::Allowed => severity10,
    };

    FindingScore {
        severity10,
        exposure10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn input(
        risk: f64,
        confidence: f64,
        reproduction_rate: f64,
        impact: Impact,
        outcome: Outcome,
    ) -> FindingInput {
        FindingInput {
            risk,
            confidence,
            reproduction_rate,
            impact,
            outcome,
        }
    }

    #[test]
    fn allowed_critical_finding_scores_8_9() {
        let score = score_finding(&input(0.9, 0.8, 1.0, Impact::Critical, Outcome::Allowed));
        assert!((score.severity10 - 8.9).abs() < 1e-9);
        assert!((score.exposure10 - 8.9).abs() < 1e-9);
    }

    #[test]
    fn impact_weights_set_the_floor_at_zero_signal() {
        // With risk and confidence at zero only the constant term remains.
        let cases = [
            (Impact::Critical, 2.0),
            (Impact::High, 1.6),
            (Impact::Medium, 1.1),
            (Impact::Low, 0.6),
        ];
        for (impact, expected) in cases {
            let score = score_finding(&input(0.0, 0.0, 1.0, impact, Outcome::Allowed));
            assert!(
                (score.severity10 - expected).abs() < 1e-9,
                "impact {impact:?}: got {}",
                score.severity10
            );
        }
    }

    #[test]
    fn blocked_outcome_scales_exposure_by_0_35() {
        let blocked = score_finding(&input(0.9, 0.8, 1.0, Impact::Critical, Outcome::Blocked));
        let allowed = score_finding(&input(0.9, 0.8, 1.0, Impact::Critical, Outcome::Allowed));
        assert_eq!(blocked.severity10, allowed.severity10);
        assert!((blocked.exposure10 - allowed.severity10 * 0.35).abs() < 1e-9);
    }

    #[test]
    fn severity_is_linear_in_reproduction_rate() {
        let full = score_finding(&input(0.7, 0.6, 1.0, Impact::High, Outcome::Allowed));
        let half = score_finding(&input(0.7, 0.6, 0.5, Impact::High, Outcome::Allowed));
        assert!((half.severity10 * 2.0 - full.severity10).abs() < 1e-9);
        let zero = score_finding(&input(0.7, 0.6, 0.0, Impact::High, Outcome::Allowed));
        assert_eq!(zero.severity10, 0.0);
    }

    #[test]
    fn inputs_are_clamped() {
        let score = score_finding(&input(5.0, 5.0, 5.0, Impact::Critical, Outcome::Allowed));
        assert!(score.severity10 <= 10.0);
        let score = score_finding(&input(-1.0, -1.0, -1.0, Impact::Low, Outcome::Allowed));
        assert_eq!(score.severity10, 0.0);
    }

    proptest! {
        #[test]
        fn scores_stay_within_bounds(
            risk in -2.0..2.0f64,
            confidence in -2.0..2.0f64,
            reproduction in -2.0..2.0f64,
        ) {
            for impact in [Impact::Low, Impact::Medium, Impact::High, Impact::Critical] {
                for outcome in [Outcome::Blocked, Outcome::Allowed] {
                    let score = score_finding(&input(risk, confidence, reproduction, impact, outcome));
                    prop_assert!((0.0..=10.0).contains(&score.severity10));
                    prop_assert!((0.0..=10.0).contains(&score.exposure10));
                    prop_assert!(score.exposure10 <= score.severity10);
                }
            }
        }
    }
}
