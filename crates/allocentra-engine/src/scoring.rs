//! Scoring engine — diagnostic score breakdowns for explanations.
//!
//! Formula: `score = priority*0.30 + urgency*0.25 + impact*0.25 +
//! risk*0.15 + strategic*0.05`, every component on a 1–5 scale.
//!
//! Scores are diagnostic context attached to each result's explanation.
//! They never affect evaluation order — the queue's (priority,
//! submission time, id) contract is authoritative.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use allocentra_store::Request;

/// Component weights. Must sum to 1.0 for contributions to add up to the
/// total score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub priority: f64,
    pub urgency: f64,
    pub impact: f64,
    pub risk: f64,
    pub strategic: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            priority: 0.30,
            urgency: 0.25,
            impact: 0.25,
            risk: 0.15,
            strategic: 0.05,
        }
    }
}

/// One weighted score component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreComponent {
    pub value: f64,
    pub weight: f64,
    pub contribution: f64,
}

impl ScoreComponent {
    fn new(value: f64, weight: f64) -> Self {
        Self {
            value,
            weight,
            contribution: value * weight,
        }
    }
}

/// Full per-component breakdown for one request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub total: f64,
    pub priority: ScoreComponent,
    pub urgency: ScoreComponent,
    pub impact: ScoreComponent,
    pub risk: ScoreComponent,
    pub strategic: ScoreComponent,
    pub days_until_deadline: Option<i64>,
}

/// Computes score breakdowns with a fixed weight set.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    weights: ScoringWeights,
}

impl ScoringEngine {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// Score a request as of an evaluation date (scenario runs pass the
    /// date they are exploring).
    pub fn score(&self, request: &Request, as_of: NaiveDate) -> ScoreBreakdown {
        let w = self.weights;
        let priority = ScoreComponent::new(priority_value(request.priority), w.priority);

        let days = request
            .urgency_deadline
            .map(|deadline| (deadline - as_of).num_days());
        let urgency = ScoreComponent::new(urgency_value(days), w.urgency);
        let impact = ScoreComponent::new(request.impact.weight(), w.impact);
        let risk = ScoreComponent::new(request.risk.weight(), w.risk);
        let strategic =
            ScoreComponent::new((request.strategic as f64).clamp(1.0, 5.0), w.strategic);

        let total = priority.contribution
            + urgency.contribution
            + impact.contribution
            + risk.contribution
            + strategic.contribution;

        ScoreBreakdown {
            total,
            priority,
            urgency,
            impact,
            risk,
            strategic,
            days_until_deadline: days,
        }
    }
}

/// Map the ordering priority (lower = more important) onto the 1–5 score
/// scale (higher = more important).
fn priority_value(priority: u32) -> f64 {
    (6.0 - priority as f64).clamp(1.0, 5.0)
}

/// Urgency on a 1–5 scale from days until deadline: 5.0 once the deadline
/// has passed, dropping one point per 30 days out, floor 1.0. No deadline
/// scores a neutral 3.0.
fn urgency_value(days_until_deadline: Option<i64>) -> f64 {
    match days_until_deadline {
        None => 3.0,
        Some(days) if days <= 0 => 5.0,
        Some(days) => (5.0 - (days as f64 / 30.0).min(4.0)).max(1.0),
    }
}
