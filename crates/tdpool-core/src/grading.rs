// Grading engine: resolves a free-text pick against a game's touchdown index
// and produces exactly one deterministic verdict per prediction.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::{GameTouchdownIndex, Scorer};
use crate::matcher::{normalize_team, NameMatch, NameMatcher};
use crate::scoring::{ScoringError, ScoringRules};

// ---------------------------------------------------------------------------
// Predictions and verdicts
// ---------------------------------------------------------------------------

/// A user's pick for one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction_id: String,
    pub user_id: String,
    /// Week/season scope, e.g. `"2024-W05"`.
    pub period_id: String,
    pub game_id: String,
    /// Free-text player name as entered by the user.
    pub predicted_name: String,
    pub predicted_team: String,
    /// American odds at the time of the pick, if recorded.
    pub odds: Option<i32>,
    /// Profit on one stake if the pick is the first-TD scorer, derived from
    /// `odds`.
    pub stake_return_if_correct: Option<f64>,
}

impl Prediction {
    pub fn new(
        prediction_id: impl Into<String>,
        user_id: impl Into<String>,
        period_id: impl Into<String>,
        game_id: impl Into<String>,
        predicted_name: impl Into<String>,
        predicted_team: impl Into<String>,
    ) -> Self {
        Self {
            prediction_id: prediction_id.into(),
            user_id: user_id.into(),
            period_id: period_id.into(),
            game_id: game_id.into(),
            predicted_name: predicted_name.into(),
            predicted_team: predicted_team.into(),
            odds: None,
            stake_return_if_correct: None,
        }
    }

    /// Attach odds and derive `stake_return_if_correct` under `rules`.
    pub fn with_odds(mut self, odds: Option<i32>, rules: &ScoringRules) -> Self {
        self.odds = odds;
        self.stake_return_if_correct = rules.stake_return_for_odds(odds);
        self
    }
}

/// How a verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    /// Both correctness fields are resolved.
    Graded,
    /// No touchdown data for the game yet; retried on the next run.
    Ungradable,
    /// The pick's team is not playing in the game.
    DataMismatch,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictStatus::Graded => "graded",
            VerdictStatus::Ungradable => "ungradable",
            VerdictStatus::DataMismatch => "data_mismatch",
        }
    }

    pub fn from_str_status(s: &str) -> Option<Self> {
        match s {
            "graded" => Some(VerdictStatus::Graded),
            "ungradable" => Some(VerdictStatus::Ungradable),
            "data_mismatch" => Some(VerdictStatus::DataMismatch),
            _ => None,
        }
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The grading outcome for one prediction. At most one exists per
/// `prediction_id`; re-grading replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub prediction_id: String,
    pub user_id: String,
    pub period_id: String,
    pub game_id: String,
    pub status: VerdictStatus,
    /// `None` means unknown, which is distinct from wrong.
    pub is_first_td_correct: Option<bool>,
    pub is_any_td_correct: Option<bool>,
    /// The feed scorer the pick resolved to.
    pub matched_scorer_name: Option<String>,
    /// Best raw matcher score against any scorer in the game, whether or
    /// not it cleared the threshold.
    pub match_score: Option<f64>,
    pub realized_return: f64,
    /// More than one scorer matched with the top score.
    pub ambiguous: bool,
    pub note: Option<String>,
}

impl Verdict {
    pub fn is_graded(&self) -> bool {
        self.status == VerdictStatus::Graded
    }
}

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

/// Per-prediction conditions reported by a grading pass. None of them abort
/// the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GradeIssue {
    #[error("prediction {prediction_id}: game {game_id} has no touchdown data yet")]
    UngradableGame {
        prediction_id: String,
        game_id: String,
    },

    #[error("prediction {prediction_id}: {candidates:?} matched equally, chose {chosen}")]
    AmbiguousMatch {
        prediction_id: String,
        candidates: Vec<String>,
        chosen: String,
    },

    #[error("prediction {prediction_id}: team {team} is not playing in game {game_id}")]
    DataInconsistency {
        prediction_id: String,
        game_id: String,
        team: String,
    },

    #[error("prediction {prediction_id} is invalid: {reason}")]
    InvalidPrediction {
        prediction_id: String,
        reason: String,
    },

    #[error("prediction {prediction_id}: failed to store verdict: {message}")]
    StoreWrite {
        prediction_id: String,
        message: String,
    },
}

impl GradeIssue {
    pub fn prediction_id(&self) -> &str {
        match self {
            GradeIssue::UngradableGame { prediction_id, .. }
            | GradeIssue::AmbiguousMatch { prediction_id, .. }
            | GradeIssue::DataInconsistency { prediction_id, .. }
            | GradeIssue::InvalidPrediction { prediction_id, .. }
            | GradeIssue::StoreWrite { prediction_id, .. } => prediction_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Index lookup
// ---------------------------------------------------------------------------

/// Source of per-game touchdown indexes for a grading pass.
pub trait IndexProvider {
    fn index_for(&self, game_id: &str) -> Option<&GameTouchdownIndex>;
}

impl IndexProvider for HashMap<String, GameTouchdownIndex> {
    fn index_for(&self, game_id: &str) -> Option<&GameTouchdownIndex> {
        self.get(game_id)
    }
}

impl IndexProvider for BTreeMap<String, GameTouchdownIndex> {
    fn index_for(&self, game_id: &str) -> Option<&GameTouchdownIndex> {
        self.get(game_id)
    }
}

impl IndexProvider for HashMap<String, Arc<GameTouchdownIndex>> {
    fn index_for(&self, game_id: &str) -> Option<&GameTouchdownIndex> {
        self.get(game_id).map(Arc::as_ref)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Counts and outputs of one `grade_all` pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradingReport {
    /// Verdicts with both correctness fields resolved.
    pub graded: usize,
    /// Predictions whose outcome is not known yet: no touchdown data, or
    /// a game still in progress where the pick has not scored.
    pub skipped: usize,
    /// Predictions whose team is not playing in the game.
    pub mismatched: usize,
    /// Graded verdicts that needed a tie-break (subset of `graded`).
    pub ambiguous: usize,
    /// Predictions that produced no verdict.
    pub errored: usize,
    pub verdicts: Vec<Verdict>,
    pub issues: Vec<GradeIssue>,
}

/// A verdict plus the condition worth reporting alongside it.
struct Evaluation {
    verdict: Verdict,
    issue: Option<GradeIssue>,
}

/// The pick resolved to a single scorer.
struct Resolution<'a> {
    scorer: &'a Scorer,
    matched: NameMatch,
    tied: Vec<&'a Scorer>,
}

/// Pure grading engine configured with a scoring schedule and matcher.
#[derive(Debug, Clone)]
pub struct GradingEngine {
    rules: ScoringRules,
    matcher: NameMatcher,
}

impl GradingEngine {
    /// Create an engine. Fails when the scoring rules are invalid, before
    /// anything is graded.
    pub fn new(rules: ScoringRules, matcher: NameMatcher) -> Result<Self, ScoringError> {
        rules.validate()?;
        Ok(Self { rules, matcher })
    }

    pub fn rules(&self) -> &ScoringRules {
        &self.rules
    }

    pub fn matcher(&self) -> &NameMatcher {
        &self.matcher
    }

    /// Grade one prediction against its game's index.
    ///
    /// Only a malformed prediction is an error; missing data and team
    /// mismatches still produce a verdict with null correctness fields.
    pub fn grade(
        &self,
        prediction: &Prediction,
        index: Option<&GameTouchdownIndex>,
    ) -> Result<Verdict, GradeIssue> {
        self.evaluate(prediction, index).map(|e| e.verdict)
    }

    /// Grade every prediction independently against `provider`.
    pub fn grade_all<'a, I, P>(&self, predictions: I, provider: &P) -> GradingReport
    where
        I: IntoIterator<Item = &'a Prediction>,
        P: IndexProvider + ?Sized,
    {
        let mut report = GradingReport::default();

        for prediction in predictions {
            let evaluation = match self.evaluate(prediction, provider.index_for(&prediction.game_id)) {
                Ok(e) => e,
                Err(issue) => {
                    warn!("{issue}");
                    report.errored += 1;
                    report.issues.push(issue);
                    continue;
                }
            };

            match evaluation.verdict.status {
                VerdictStatus::Graded => report.graded += 1,
                VerdictStatus::Ungradable => report.skipped += 1,
                VerdictStatus::DataMismatch => report.mismatched += 1,
            }
            if evaluation.verdict.ambiguous {
                report.ambiguous += 1;
            }
            if let Some(issue) = evaluation.issue {
                report.issues.push(issue);
            }
            report.verdicts.push(evaluation.verdict);
        }

        report
    }

    fn evaluate(
        &self,
        prediction: &Prediction,
        index: Option<&GameTouchdownIndex>,
    ) -> Result<Evaluation, GradeIssue> {
        let invalid = |reason: &str| GradeIssue::InvalidPrediction {
            prediction_id: prediction.prediction_id.clone(),
            reason: reason.to_string(),
        };
        if prediction.prediction_id.trim().is_empty() {
            return Err(invalid("prediction_id is blank"));
        }
        if prediction.game_id.trim().is_empty() {
            return Err(invalid("game_id is blank"));
        }
        if prediction.predicted_name.trim().is_empty() {
            return Err(invalid("predicted_name is blank"));
        }

        let index = match index {
            Some(index) if index.is_gradable() => index,
            other => {
                let note = if other.is_some() {
                    "no touchdowns recorded for game yet"
                } else {
                    "no event data for game"
                };
                debug!(prediction_id = %prediction.prediction_id, game_id = %prediction.game_id, note);
                return Ok(Evaluation {
                    verdict: self.unresolved(prediction, VerdictStatus::Ungradable, note.to_string()),
                    issue: Some(GradeIssue::UngradableGame {
                        prediction_id: prediction.prediction_id.clone(),
                        game_id: prediction.game_id.clone(),
                    }),
                });
            }
        };

        let team = prediction.predicted_team.trim();
        if !team.is_empty() && index.roster_known() && !index.has_team(team) {
            let known: Vec<&str> = index.teams().iter().map(String::as_str).collect();
            let note = format!(
                "team {} is not playing in game {} (known teams: {})",
                normalize_team(team),
                index.game_id(),
                known.join(", ")
            );
            warn!(prediction_id = %prediction.prediction_id, "{note}");
            return Ok(Evaluation {
                verdict: self.unresolved(prediction, VerdictStatus::DataMismatch, note),
                issue: Some(GradeIssue::DataInconsistency {
                    prediction_id: prediction.prediction_id.clone(),
                    game_id: prediction.game_id.clone(),
                    team: normalize_team(team),
                }),
            });
        }

        let best_raw_score = index
            .scorers()
            .iter()
            .map(|s| self.matcher.match_names(&prediction.predicted_name, &s.name).score)
            .fold(0.0_f64, f64::max);

        let resolution = self.resolve(prediction, index);
        if resolution.is_none() && !index.is_final() {
            // A miss is only definitive once the game is over.
            let note = "player has not scored yet; game is not final";
            debug!(prediction_id = %prediction.prediction_id, game_id = %prediction.game_id, note);
            let mut verdict = self.unresolved(prediction, VerdictStatus::Ungradable, note.to_string());
            verdict.match_score = Some(best_raw_score);
            return Ok(Evaluation {
                verdict,
                issue: None,
            });
        }
        let (first_td, any_td) = match (&resolution, index.first_touchdown()) {
            (Some(res), Some(first)) => (
                res.scorer.name == first.scorer_name && res.scorer.team == first.scorer_team,
                true,
            ),
            _ => (false, false),
        };

        let realized_return = self.rules.realized_return(
            Some(first_td),
            Some(any_td),
            prediction.stake_return_if_correct,
        );

        let mut notes = Vec::new();
        let mut issue = None;
        let mut ambiguous = false;
        if let Some(res) = &resolution {
            if res.tied.len() > 1 {
                ambiguous = true;
                let candidates: Vec<String> = res
                    .tied
                    .iter()
                    .map(|s| format!("{} ({})", s.name, s.team))
                    .collect();
                warn!(
                    prediction_id = %prediction.prediction_id,
                    predicted = %prediction.predicted_name,
                    chosen = %res.scorer.name,
                    "ambiguous match among {}",
                    candidates.join(", ")
                );
                notes.push(format!("tie-broken among {}", candidates.join(", ")));
                issue = Some(GradeIssue::AmbiguousMatch {
                    prediction_id: prediction.prediction_id.clone(),
                    candidates,
                    chosen: res.scorer.name.clone(),
                });
            }
        }
        if first_td && prediction.stake_return_if_correct.is_none() {
            notes.push("correct first TD but the pick has no odds; return is 0".to_string());
        }

        let verdict = Verdict {
            prediction_id: prediction.prediction_id.clone(),
            user_id: prediction.user_id.clone(),
            period_id: prediction.period_id.clone(),
            game_id: prediction.game_id.clone(),
            status: VerdictStatus::Graded,
            is_first_td_correct: Some(first_td),
            is_any_td_correct: Some(any_td),
            matched_scorer_name: resolution.as_ref().map(|r| r.scorer.name.clone()),
            match_score: Some(resolution.as_ref().map_or(best_raw_score, |r| r.matched.score)),
            realized_return,
            ambiguous,
            note: (!notes.is_empty()).then(|| notes.join("; ")),
        };
        debug!(
            prediction_id = %verdict.prediction_id,
            first_td,
            any_td,
            matched = ?verdict.matched_scorer_name,
            "graded"
        );

        Ok(Evaluation { verdict, issue })
    }

    /// Pick the single scorer a prediction refers to.
    ///
    /// Among scorers clearing the threshold: highest score, then the scorer
    /// on the predicted team, then the smaller name and team code.
    fn resolve<'a>(
        &self,
        prediction: &Prediction,
        index: &'a GameTouchdownIndex,
    ) -> Option<Resolution<'a>> {
        let team = normalize_team(&prediction.predicted_team);
        let mut candidates: Vec<(&Scorer, NameMatch)> = index
            .scorers()
            .iter()
            .map(|s| (s, self.matcher.match_names(&prediction.predicted_name, &s.name)))
            .filter(|(_, m)| m.is_match)
            .collect();

        candidates.sort_by(|(a, am), (b, bm)| {
            bm.score
                .total_cmp(&am.score)
                .then_with(|| (b.team == team).cmp(&(a.team == team)))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.team.cmp(&b.team))
        });

        let &(scorer, matched) = candidates.first()?;
        let tied = candidates
            .iter()
            .filter(|(_, m)| m.score == matched.score)
            .map(|(s, _)| *s)
            .collect();
        Some(Resolution {
            scorer,
            matched,
            tied,
        })
    }

    fn unresolved(&self, prediction: &Prediction, status: VerdictStatus, note: String) -> Verdict {
        Verdict {
            prediction_id: prediction.prediction_id.clone(),
            user_id: prediction.user_id.clone(),
            period_id: prediction.period_id.clone(),
            game_id: prediction.game_id.clone(),
            status,
            is_first_td_correct: None,
            is_any_td_correct: None,
            matched_scorer_name: None,
            match_score: None,
            realized_return: self.rules.realized_return(None, None, None),
            ambiguous: false,
            note: Some(note),
        }
    }
}
