// Scoring rules: point weights, the return schedule, and odds conversion.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("invalid scoring rule `{field}`: {message}")]
    InvalidRule { field: &'static str, message: String },
}

/// Point and return schedule for a season. Supplied by configuration so
/// the rules can change between seasons without code changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRules {
    /// Units staked on each pick.
    pub stake: f64,
    /// Points for a correct first-TD pick.
    pub first_td_points: f64,
    /// Points when the pick missed first TD but scored later.
    pub any_td_points: f64,
    /// Return credited when only the any-TD leg hits.
    pub any_td_return: f64,
    /// Return for a pick that scored no touchdown. Zero or negative.
    pub miss_return: f64,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            stake: 1.0,
            first_td_points: 3.0,
            any_td_points: 1.0,
            any_td_return: 0.0,
            miss_return: -1.0,
        }
    }
}

impl ScoringRules {
    /// Reject rules that would silently corrupt every return in a run.
    pub fn validate(&self) -> Result<(), ScoringError> {
        let fields: &[(&'static str, f64)] = &[
            ("stake", self.stake),
            ("first_td_points", self.first_td_points),
            ("any_td_points", self.any_td_points),
            ("any_td_return", self.any_td_return),
            ("miss_return", self.miss_return),
        ];
        for &(field, value) in fields {
            if !value.is_finite() {
                return Err(ScoringError::InvalidRule {
                    field,
                    message: format!("must be finite, got {value}"),
                });
            }
        }
        if self.stake <= 0.0 {
            return Err(ScoringError::InvalidRule {
                field: "stake",
                message: format!("must be > 0, got {}", self.stake),
            });
        }
        for (field, value) in [
            ("first_td_points", self.first_td_points),
            ("any_td_points", self.any_td_points),
        ] {
            if value < 0.0 {
                return Err(ScoringError::InvalidRule {
                    field,
                    message: format!("must be >= 0, got {value}"),
                });
            }
        }
        if self.miss_return > 0.0 {
            return Err(ScoringError::InvalidRule {
                field: "miss_return",
                message: format!("must be <= 0, got {}", self.miss_return),
            });
        }
        Ok(())
    }

    /// Profit on one stake at the given American odds, if any.
    pub fn stake_return_for_odds(&self, odds: Option<i32>) -> Option<f64> {
        odds.and_then(|o| american_odds_profit(o, self.stake))
    }

    /// Realized return for a verdict's correctness fields.
    ///
    /// First-TD hit pays `stake_return` (0 when the pick carried no odds),
    /// an any-TD-only hit pays `any_td_return`, a graded miss pays
    /// `miss_return`, and an ungraded pick pays nothing.
    pub fn realized_return(
        &self,
        first_td: Option<bool>,
        any_td: Option<bool>,
        stake_return: Option<f64>,
    ) -> f64 {
        match (first_td, any_td) {
            (Some(true), _) => stake_return.unwrap_or(0.0),
            (_, Some(true)) => self.any_td_return,
            (Some(false), _) => self.miss_return,
            _ => 0.0,
        }
    }

    /// Points for a verdict. The any-TD weight only applies when the
    /// first-TD leg is false, so a first-TD hit is never counted twice.
    pub fn points(&self, first_td: Option<bool>, any_td: Option<bool>) -> f64 {
        match (first_td, any_td) {
            (Some(true), _) => self.first_td_points,
            (Some(false), Some(true)) => self.any_td_points,
            _ => 0.0,
        }
    }
}

/// Profit on `stake` at American `odds`: `+650` pays 6.5x, `-120` pays
/// 100/120. Odds strictly between -100 and +100 are not valid quotes.
pub fn american_odds_profit(odds: i32, stake: f64) -> Option<f64> {
    if odds >= 100 {
        Some(stake * f64::from(odds) / 100.0)
    } else if odds <= -100 {
        Some(stake * 100.0 / -f64::from(odds))
    } else {
        None
    }
}
