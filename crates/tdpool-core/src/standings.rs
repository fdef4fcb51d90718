// Scoring & leaderboard aggregation over stored verdicts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::grading::{Verdict, VerdictStatus};
use crate::scoring::ScoringRules;

/// Which verdicts a leaderboard covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandingsScope {
    /// A single week/period.
    Period(String),
    /// Every period in the season.
    Cumulative,
}

impl StandingsScope {
    pub fn period(period_id: impl Into<String>) -> Self {
        StandingsScope::Period(period_id.into())
    }

    pub fn includes(&self, period_id: &str) -> bool {
        match self {
            StandingsScope::Period(p) => p == period_id,
            StandingsScope::Cumulative => true,
        }
    }
}

impl fmt::Display for StandingsScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StandingsScope::Period(p) => write!(f, "period {p}"),
            StandingsScope::Cumulative => f.write_str("cumulative"),
        }
    }
}

/// One user's row on a leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingEntry {
    pub user_id: String,
    /// Verdicts in scope, graded or not.
    pub picks: u32,
    /// Verdicts with both correctness fields resolved.
    pub graded: u32,
    pub first_td_wins: u32,
    /// Includes first-TD wins.
    pub any_td_wins: u32,
    pub points: f64,
    pub total_return: f64,
    /// `total_return / (graded * stake)`, `None` until something is graded.
    pub roi: Option<f64>,
    /// Competition rank: tied users share a rank and the next rank skips.
    pub rank: u32,
}

/// An ordered leaderboard for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standings {
    scope: StandingsScope,
    entries: Vec<StandingEntry>,
}

impl Standings {
    pub fn scope(&self) -> &StandingsScope {
        &self.scope
    }

    /// Entries in rank order. Each call starts a fresh pass.
    pub fn iter(&self) -> std::slice::Iter<'_, StandingEntry> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[StandingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, user_id: &str) -> Option<&StandingEntry> {
        self.entries.iter().find(|e| e.user_id == user_id)
    }

    /// Recompute only `users`' rows from their current verdicts, then re-rank.
    ///
    /// `verdicts` must hold every stored verdict for those users (other
    /// users' verdicts are ignored). A user left with no verdicts in scope
    /// drops off the board.
    pub fn refresh_users<'a, I>(&mut self, users: &BTreeSet<String>, verdicts: I, rules: &ScoringRules)
    where
        I: IntoIterator<Item = &'a Verdict>,
    {
        let affected = verdicts.into_iter().filter(|v| users.contains(&v.user_id));
        let fresh = fold_entries(affected, &self.scope, rules);

        self.entries.retain(|e| !users.contains(&e.user_id));
        self.entries.extend(fresh);
        rank_entries(&mut self.entries);
    }
}

impl<'a> IntoIterator for &'a Standings {
    type Item = &'a StandingEntry;
    type IntoIter = std::slice::Iter<'a, StandingEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Build the leaderboard for `scope` from a set of verdicts.
///
/// Verdicts are deduplicated by `prediction_id` and folded in id order, so
/// input order never changes totals for a set with one verdict per
/// prediction. When two differing verdicts share an id, the later one in
/// the input counts and a warning is logged.
pub fn aggregate<'a, I>(verdicts: I, scope: StandingsScope, rules: &ScoringRules) -> Standings
where
    I: IntoIterator<Item = &'a Verdict>,
{
    let mut entries = fold_entries(verdicts, &scope, rules);
    rank_entries(&mut entries);
    Standings { scope, entries }
}

fn fold_entries<'a, I>(verdicts: I, scope: &StandingsScope, rules: &ScoringRules) -> Vec<StandingEntry>
where
    I: IntoIterator<Item = &'a Verdict>,
{
    let mut by_prediction: BTreeMap<&str, &Verdict> = BTreeMap::new();
    for v in verdicts.into_iter().filter(|v| scope.includes(&v.period_id)) {
        if let Some(earlier) = by_prediction.insert(v.prediction_id.as_str(), v) {
            if earlier != v {
                warn!(
                    prediction_id = %v.prediction_id,
                    "conflicting verdicts for one prediction; the later one counts"
                );
            }
        }
    }

    let mut by_user: BTreeMap<&str, StandingEntry> = BTreeMap::new();
    for verdict in by_prediction.into_values() {
        let entry = by_user
            .entry(verdict.user_id.as_str())
            .or_insert_with(|| StandingEntry {
                user_id: verdict.user_id.clone(),
                picks: 0,
                graded: 0,
                first_td_wins: 0,
                any_td_wins: 0,
                points: 0.0,
                total_return: 0.0,
                roi: None,
                rank: 0,
            });

        entry.picks += 1;
        if verdict.status == VerdictStatus::Graded {
            entry.graded += 1;
        }
        if verdict.is_first_td_correct == Some(true) {
            entry.first_td_wins += 1;
        }
        if verdict.is_any_td_correct == Some(true) {
            entry.any_td_wins += 1;
        }
        entry.points += rules.points(verdict.is_first_td_correct, verdict.is_any_td_correct);
        entry.total_return += verdict.realized_return;
    }

    by_user
        .into_values()
        .map(|mut entry| {
            entry.roi = (entry.graded > 0)
                .then(|| entry.total_return / (f64::from(entry.graded) * rules.stake));
            entry
        })
        .collect()
}

/// Order by points desc, total return desc, user id asc, then assign
/// competition ranks ("1, 1, 3").
fn rank_entries(entries: &mut [StandingEntry]) {
    entries.sort_by(|a, b| {
        b.points
            .total_cmp(&a.points)
            .then_with(|| b.total_return.total_cmp(&a.total_return))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    let mut previous: Option<(f64, f64, u32)> = None;
    for (i, entry) in entries.iter_mut().enumerate() {
        let position = i as u32 + 1;
        entry.rank = match previous {
            Some((points, ret, rank)) if points == entry.points && ret == entry.total_return => rank,
            _ => position,
        };
        previous = Some((entry.points, entry.total_return, entry.rank));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(id: &str, user: &str, period: &str, first: Option<bool>, any: Option<bool>, ret: f64) -> Verdict {
        Verdict {
            prediction_id: id.to_string(),
            user_id: user.to_string(),
            period_id: period.to_string(),
            game_id: "G1".to_string(),
            status: if first.is_some() {
                VerdictStatus::Graded
            } else {
                VerdictStatus::Ungradable
            },
            is_first_td_correct: first,
            is_any_td_correct: any,
            matched_scorer_name: None,
            match_score: None,
            realized_return: ret,
            ambiguous: false,
            note: None,
        }
    }

    fn sample() -> Vec<Verdict> {
        vec![
            verdict("p1", "alice", "W1", Some(true), Some(true), 6.5),
            verdict("p2", "alice", "W1", Some(false), Some(false), -1.0),
            verdict("p3", "bob", "W1", Some(false), Some(true), 0.0),
            verdict("p4", "carol", "W1", Some(true), Some(true), 4.0),
            verdict("p5", "bob", "W2", Some(true), Some(true), 9.0),
            verdict("p6", "dave", "W1", None, None, 0.0),
        ]
    }

    #[test]
    fn conflicting_duplicate_counts_the_later_verdict() {
        let rules = ScoringRules::default();
        let verdicts = vec![
            verdict("p1", "alice", "W1", Some(true), Some(true), 6.5),
            verdict("p1", "alice", "W1", Some(false), Some(false), -1.0),
        ];
        let standings = aggregate(&verdicts, StandingsScope::Cumulative, &rules);
        let alice = standings.entry("alice").unwrap();
        assert_eq!(alice.picks, 1);
        assert_eq!(alice.total_return, -1.0);
    }

    #[test]
    fn period_scope_only_counts_that_period() {
        let rules = ScoringRules::default();
        let verdicts = sample();
        let standings = aggregate(&verdicts, StandingsScope::period("W1"), &rules);

        let bob = standings.entry("bob").unwrap();
        assert_eq!(bob.points, 1.0);
        assert_eq!(bob.picks, 1);
        assert_eq!(bob.any_td_wins, 1);
        assert_eq!(bob.first_td_wins, 0);

        let alice = standings.entry("alice").unwrap();
        assert_eq!(alice.points, 3.0);
        assert_eq!(alice.total_return, 5.5);
        assert_eq!(alice.graded, 2);
        assert_eq!(alice.roi, Some(2.75));
    }

    #[test]
    fn cumulative_scope_counts_every_period() {
        let verdicts = sample();
        let standings = aggregate(&verdicts, StandingsScope::Cumulative, &ScoringRules::default());
        assert_eq!(standings.entry("bob").unwrap().points, 4.0);
        assert_eq!(standings.iter().next().unwrap().user_id, "bob");
    }

    #[test]
    fn order_is_points_then_return_then_user() {
        let verdicts = sample();
        let standings = aggregate(&verdicts, StandingsScope::period("W1"), &ScoringRules::default());
        let order: Vec<&str> = standings.iter().map(|e| e.user_id.as_str()).collect();
        // alice and carol tie on points; alice has the better return.
        assert_eq!(order, vec!["alice", "carol", "bob", "dave"]);
    }

    #[test]
    fn exact_ties_share_a_rank() {
        let verdicts = vec![
            verdict("p1", "zed", "W1", Some(true), Some(true), 6.5),
            verdict("p2", "amy", "W1", Some(true), Some(true), 6.5),
            verdict("p3", "kim", "W1", Some(false), Some(false), -1.0),
        ];
        let standings = aggregate(&verdicts, StandingsScope::Cumulative, &ScoringRules::default());
        let ranks: Vec<(&str, u32)> = standings.iter().map(|e| (e.user_id.as_str(), e.rank)).collect();
        assert_eq!(ranks, vec![("amy", 1), ("zed", 1), ("kim", 3)]);
    }

    #[test]
    fn ungraded_verdicts_count_as_picks_only() {
        let verdicts = sample();
        let standings = aggregate(&verdicts, StandingsScope::period("W1"), &ScoringRules::default());
        let dave = standings.entry("dave").unwrap();
        assert_eq!(dave.picks, 1);
        assert_eq!(dave.graded, 0);
        assert_eq!(dave.points, 0.0);
        assert_eq!(dave.roi, None);
    }

    #[test]
    fn input_order_does_not_matter() {
        let rules = ScoringRules::default();
        let verdicts = sample();
        let mut reversed = verdicts.clone();
        reversed.reverse();
        assert_eq!(
            aggregate(&verdicts, StandingsScope::Cumulative, &rules),
            aggregate(&reversed, StandingsScope::Cumulative, &rules)
        );
    }

    #[test]
    fn iteration_restarts() {
        let verdicts = sample();
        let standings = aggregate(&verdicts, StandingsScope::Cumulative, &ScoringRules::default());
        let first: Vec<_> = standings.iter().collect();
        let second: Vec<_> = (&standings).into_iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn refresh_users_matches_full_rebuild() {
        let rules = ScoringRules::default();
        let mut verdicts = sample();
        let mut standings = aggregate(&verdicts, StandingsScope::period("W1"), &rules);

        // bob's W1 pick is regraded as a first-TD win.
        verdicts[2] = verdict("p3", "bob", "W1", Some(true), Some(true), 8.0);
        let users: BTreeSet<String> = ["bob".to_string()].into_iter().collect();
        standings.refresh_users(&users, &verdicts, &rules);

        assert_eq!(standings, aggregate(&verdicts, StandingsScope::period("W1"), &rules));
        assert_eq!(standings.iter().next().unwrap().user_id, "bob");
    }

    #[test]
    fn refresh_drops_user_without_verdicts() {
        let rules = ScoringRules::default();
        let verdicts = sample();
        let mut standings = aggregate(&verdicts, StandingsScope::period("W1"), &rules);
        let users: BTreeSet<String> = ["dave".to_string()].into_iter().collect();
        standings.refresh_users(&users, std::iter::empty(), &rules);
        assert!(standings.entry("dave").is_none());
        assert_eq!(standings.len(), 3);
    }
}
