// Grading service: feed ingestion, batch grading, and leaderboard reads on
// top of the SQLite store and the in-memory caches.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{IndexCache, StandingsCache};
use crate::db::{Database, VerdictWrite};
use crate::events::{group_season, GameFeed, RawPlay};
use crate::grading::{GradeIssue, GradingEngine, Prediction, Verdict, VerdictStatus};
use crate::matcher::NameMatcher;
use crate::scoring::{ScoringError, ScoringRules};
use crate::standings::{aggregate, Standings, StandingsScope};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid scoring configuration: {0}")]
    Configuration(#[from] ScoringError),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Outcome of one `grade_all` run.
///
/// `graded + skipped + mismatched + errored` equals the number of
/// predictions in scope.
#[derive(Debug, Clone)]
pub struct GradingSummary {
    pub scope: StandingsScope,
    pub run_at: DateTime<Utc>,
    pub graded: usize,
    pub skipped: usize,
    pub mismatched: usize,
    pub ambiguous: usize,
    pub errored: usize,
    /// Every verdict produced, in prediction id order.
    pub verdicts: Vec<Verdict>,
    /// Predictions whose stored verdict changed in this run.
    pub changed_prediction_ids: Vec<String>,
    pub issues: Vec<GradeIssue>,
}

pub struct GradingService {
    db: Database,
    engine: GradingEngine,
    indexes: IndexCache,
    standings: StandingsCache,
}

impl GradingService {
    /// Build a service over `db`. Invalid scoring rules fail here, before
    /// any grading happens.
    pub fn new(db: Database, rules: ScoringRules, matcher: NameMatcher) -> Result<Self, ServiceError> {
        let engine = GradingEngine::new(rules, matcher)?;
        Ok(Self {
            db,
            engine,
            indexes: IndexCache::new(),
            standings: StandingsCache::new(),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn engine(&self) -> &GradingEngine {
        &self.engine
    }

    /// Store or update predictions. Existing verdicts are replaced on the
    /// next grading run, except that a prediction moved to another user or
    /// period loses its verdict right away so no leaderboard keeps it under
    /// the old owner.
    pub fn submit_predictions(&mut self, predictions: &[Prediction]) -> Result<usize, ServiceError> {
        let mut moved = Vec::new();
        for prediction in predictions {
            let Some(stored) = self.db.load_verdict(&prediction.prediction_id)? else {
                continue;
            };
            if stored.user_id != prediction.user_id || stored.period_id != prediction.period_id {
                moved.push(stored);
            }
        }

        let written = self.db.upsert_predictions(predictions)?;
        debug!(written, "stored predictions");

        for stored in &moved {
            self.db.delete_verdict(&stored.prediction_id)?;
            debug!(
                prediction_id = %stored.prediction_id,
                user_id = %stored.user_id,
                period_id = %stored.period_id,
                "prediction reassigned; dropped its verdict"
            );
        }
        self.refresh_standings(&moved)?;
        Ok(written)
    }

    /// Ingest a season's play stream. Returns the ids of games whose
    /// touchdown data changed.
    pub fn ingest_plays<I>(&mut self, plays: I) -> Result<Vec<String>, ServiceError>
    where
        I: IntoIterator<Item = RawPlay>,
    {
        let feeds: Vec<GameFeed> = group_season(plays).into_values().collect();
        self.ingest_feeds(&feeds)
    }

    /// Ingest complete per-game snapshots. Returns the ids of games whose
    /// touchdown data changed.
    pub fn ingest_feeds(&mut self, feeds: &[GameFeed]) -> Result<Vec<String>, ServiceError> {
        let mut changed = Vec::new();
        for feed in feeds {
            if self.db.replace_game_feed(feed)? {
                self.indexes.mark_stale(&feed.game_id);
                changed.push(feed.game_id.clone());
            }
        }
        if !changed.is_empty() {
            info!(games = changed.len(), "touchdown data changed");
        }
        Ok(changed)
    }

    /// Grade every prediction in `scope` and persist the verdicts.
    ///
    /// Per-prediction problems are reported in the summary; only a store
    /// failure that prevents reading the inputs aborts the run.
    pub fn grade_all(&mut self, scope: &StandingsScope) -> Result<GradingSummary, ServiceError> {
        self.engine.rules().validate()?;
        let run_at = Utc::now();
        let predictions = self.db.load_predictions(scope)?;

        let db = &self.db;
        let snapshot = self.indexes.snapshot(
            predictions.iter().map(|p| p.game_id.as_str()),
            |game_id| db.load_game_feed(game_id),
        )?;

        let mut report = self.engine.grade_all(&predictions, &snapshot);

        let mut verdicts = Vec::with_capacity(report.verdicts.len());
        let mut changed_ids = Vec::new();
        // Rows to refresh: each changed verdict and the one it replaced.
        let mut touched = Vec::new();
        for verdict in report.verdicts.drain(..) {
            match self.db.save_verdict(&verdict) {
                Ok(VerdictWrite::Written { previous }) => {
                    changed_ids.push(verdict.prediction_id.clone());
                    touched.push(verdict.clone());
                    touched.extend(previous);
                }
                Ok(VerdictWrite::Unchanged) => {}
                Err(e) => {
                    let issue = GradeIssue::StoreWrite {
                        prediction_id: verdict.prediction_id.clone(),
                        message: format!("{e:#}"),
                    };
                    warn!("{issue}");
                    match verdict.status {
                        VerdictStatus::Graded => report.graded -= 1,
                        VerdictStatus::Ungradable => report.skipped -= 1,
                        VerdictStatus::DataMismatch => report.mismatched -= 1,
                    }
                    if verdict.ambiguous {
                        report.ambiguous -= 1;
                    }
                    report.errored += 1;
                    report.issues.push(issue);
                    continue;
                }
            }
            verdicts.push(verdict);
        }

        // A prediction that turned invalid keeps no verdict.
        let invalid: Vec<String> = report
            .issues
            .iter()
            .filter_map(|issue| match issue {
                GradeIssue::InvalidPrediction { prediction_id, .. } => Some(prediction_id.clone()),
                _ => None,
            })
            .collect();
        for prediction_id in invalid {
            match self.db.delete_verdict(&prediction_id) {
                Ok(Some(previous)) => {
                    debug!(%prediction_id, "dropped verdict of invalid prediction");
                    changed_ids.push(prediction_id);
                    touched.push(previous);
                }
                Ok(None) => {}
                Err(e) => {
                    let issue = GradeIssue::StoreWrite {
                        prediction_id,
                        message: format!("{e:#}"),
                    };
                    warn!("{issue}");
                    report.issues.push(issue);
                }
            }
        }
        changed_ids.sort();

        self.refresh_standings(&touched)?;

        let summary = GradingSummary {
            scope: scope.clone(),
            run_at,
            graded: report.graded,
            skipped: report.skipped,
            mismatched: report.mismatched,
            ambiguous: report.ambiguous,
            errored: report.errored,
            changed_prediction_ids: changed_ids,
            verdicts,
            issues: report.issues,
        };
        info!(
            %scope,
            graded = summary.graded,
            skipped = summary.skipped,
            mismatched = summary.mismatched,
            ambiguous = summary.ambiguous,
            errored = summary.errored,
            changed = summary.changed_prediction_ids.len(),
            "grading run complete"
        );
        Ok(summary)
    }

    /// Refresh cached leaderboard rows for every user and period in
    /// `touched`.
    fn refresh_standings(&mut self, touched: &[Verdict]) -> Result<(), ServiceError> {
        if touched.is_empty() {
            return Ok(());
        }
        let users: BTreeSet<String> = touched.iter().map(|v| v.user_id.clone()).collect();
        let user_verdicts = self.db.load_verdicts_for_users(&users)?;
        self.standings
            .apply_changes(touched, &user_verdicts, self.engine.rules());
        Ok(())
    }

    /// The leaderboard for `scope`, built from stored verdicts on first
    /// request and kept current by later grading runs.
    pub fn get_standings(&mut self, scope: &StandingsScope) -> Result<Standings, ServiceError> {
        if let Some(board) = self.standings.get(scope) {
            return Ok(board.clone());
        }
        let verdicts = self.db.load_verdicts(scope)?;
        let board = aggregate(&verdicts, scope.clone(), self.engine.rules());
        debug!(%scope, users = board.len(), "built standings from store");
        self.standings.insert(board.clone());
        Ok(board)
    }

    /// Drop every cached index and leaderboard. The next reads rebuild them
    /// from the store.
    pub fn reset_caches(&mut self) {
        self.indexes = IndexCache::new();
        self.standings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RawTouchdown;

    fn service() -> GradingService {
        let db = Database::open(":memory:").unwrap();
        GradingService::new(db, ScoringRules::default(), NameMatcher::default()).unwrap()
    }

    fn feed(scorers: &[(u64, &str)]) -> GameFeed {
        GameFeed {
            game_id: "G1".into(),
            home_team: Some("KC".into()),
            away_team: Some("BUF".into()),
            is_final: false,
            touchdowns: scorers
                .iter()
                .map(|&(sequence, name)| RawTouchdown {
                    sequence,
                    scorer_name: name.into(),
                    scorer_team: "KC".into(),
                    scoring_position: None,
                })
                .collect(),
        }
    }

    fn pick(id: &str, user: &str, name: &str) -> Prediction {
        Prediction::new(id, user, "W1", "G1", name, "KC").with_odds(Some(500), &ScoringRules::default())
    }

    #[test]
    fn invalid_rules_fail_before_grading() {
        let db = Database::open(":memory:").unwrap();
        let rules = ScoringRules {
            miss_return: 2.0,
            ..ScoringRules::default()
        };
        let err = GradingService::new(db, rules, NameMatcher::default()).err().unwrap();
        assert!(matches!(err, ServiceError::Configuration(_)));
    }

    #[test]
    fn regrading_unchanged_data_changes_nothing() {
        let mut svc = service();
        svc.submit_predictions(&[pick("p1", "alice", "Isiah Pacheco")]).unwrap();
        svc.ingest_feeds(&[feed(&[(10, "Isiah Pacheco")])]).unwrap();

        let first = svc.grade_all(&StandingsScope::Cumulative).unwrap();
        assert_eq!(first.changed_prediction_ids, vec!["p1"]);

        let second = svc.grade_all(&StandingsScope::Cumulative).unwrap();
        assert!(second.changed_prediction_ids.is_empty());
        assert_eq!(first.verdicts, second.verdicts);
    }

    #[test]
    fn reingesting_same_feed_reports_no_change() {
        let mut svc = service();
        assert_eq!(svc.ingest_feeds(&[feed(&[(10, "Isiah Pacheco")])]).unwrap(), vec!["G1"]);
        assert!(svc.ingest_feeds(&[feed(&[(10, "Isiah Pacheco")])]).unwrap().is_empty());
    }

    #[test]
    fn cached_standings_follow_corrections() {
        let mut svc = service();
        let scope = StandingsScope::period("W1");
        svc.submit_predictions(&[pick("p1", "alice", "Isiah Pacheco"), pick("p2", "bob", "Patrick Mahomes")])
            .unwrap();
        svc.ingest_feeds(&[feed(&[(10, "Isiah Pacheco")])]).unwrap();
        svc.grade_all(&scope).unwrap();
        assert_eq!(svc.get_standings(&scope).unwrap().iter().next().unwrap().user_id, "alice");

        // The feed corrects the scorer of the opening touchdown.
        svc.ingest_feeds(&[feed(&[(10, "Patrick Mahomes")])]).unwrap();
        let summary = svc.grade_all(&scope).unwrap();
        assert_eq!(summary.changed_prediction_ids, vec!["p1", "p2"]);

        let cached = svc.get_standings(&scope).unwrap();
        svc.reset_caches();
        let rebuilt = svc.get_standings(&scope).unwrap();
        assert_eq!(cached, rebuilt);
        assert_eq!(rebuilt.iter().next().unwrap().user_id, "bob");
    }

    fn rebuilt(svc: &GradingService, scope: &StandingsScope) -> Standings {
        let verdicts = svc.database().load_verdicts(scope).unwrap();
        aggregate(&verdicts, scope.clone(), svc.engine().rules())
    }

    #[test]
    fn reassigned_prediction_leaves_previous_owner_board() {
        let mut svc = service();
        let cumulative = StandingsScope::Cumulative;
        let week = StandingsScope::period("W1");
        svc.submit_predictions(&[pick("p1", "alice", "Isiah Pacheco")]).unwrap();
        svc.ingest_feeds(&[feed(&[(10, "Isiah Pacheco")])]).unwrap();
        svc.grade_all(&cumulative).unwrap();
        assert!(svc.get_standings(&cumulative).unwrap().entry("alice").is_some());
        assert!(svc.get_standings(&week).unwrap().entry("alice").is_some());

        svc.submit_predictions(&[pick("p1", "bob", "Isiah Pacheco")]).unwrap();
        let summary = svc.grade_all(&cumulative).unwrap();
        assert_eq!(summary.changed_prediction_ids, vec!["p1"]);

        for scope in [&cumulative, &week] {
            let cached = svc.get_standings(scope).unwrap();
            assert_eq!(cached, rebuilt(&svc, scope), "{scope}");
            assert!(cached.entry("alice").is_none());
            assert_eq!(cached.entry("bob").unwrap().points, 3.0);
        }
    }

    #[test]
    fn prediction_moved_to_other_period_leaves_old_board_before_regrade() {
        let mut svc = service();
        let week = StandingsScope::period("W1");
        svc.submit_predictions(&[pick("p1", "alice", "Isiah Pacheco")]).unwrap();
        svc.ingest_feeds(&[feed(&[(10, "Isiah Pacheco")])]).unwrap();
        svc.grade_all(&week).unwrap();
        assert!(svc.get_standings(&week).unwrap().entry("alice").is_some());

        let mut moved = pick("p1", "alice", "Isiah Pacheco");
        moved.period_id = "W2".into();
        svc.submit_predictions(&[moved]).unwrap();

        let cached = svc.get_standings(&week).unwrap();
        assert!(cached.is_empty());
        assert_eq!(cached, rebuilt(&svc, &week));
    }

    #[test]
    fn prediction_turned_invalid_drops_its_verdict() {
        let mut svc = service();
        let scope = StandingsScope::Cumulative;
        svc.submit_predictions(&[pick("p1", "alice", "Isiah Pacheco")]).unwrap();
        svc.ingest_feeds(&[feed(&[(10, "Isiah Pacheco")])]).unwrap();
        svc.grade_all(&scope).unwrap();
        assert_eq!(svc.get_standings(&scope).unwrap().entry("alice").unwrap().points, 3.0);

        svc.submit_predictions(&[pick("p1", "alice", " ")]).unwrap();
        let summary = svc.grade_all(&scope).unwrap();
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.changed_prediction_ids, vec!["p1"]);
        assert_eq!(svc.database().verdict_count().unwrap(), 0);

        let cached = svc.get_standings(&scope).unwrap();
        assert!(cached.entry("alice").is_none());
        assert_eq!(cached, rebuilt(&svc, &scope));
    }

    #[test]
    fn summary_counts_cover_every_prediction() {
        let mut svc = service();
        let mut other_game = pick("p3", "carol", "Josh Allen");
        other_game.game_id = "G2".into();
        let mut wrong_team = pick("p2", "bob", "Josh Allen");
        wrong_team.predicted_team = "SF".into();
        svc.submit_predictions(&[pick("p1", "alice", "Pacheco"), wrong_team, other_game])
            .unwrap();
        svc.ingest_feeds(&[feed(&[(10, "Isiah Pacheco")])]).unwrap();

        let s = svc.grade_all(&StandingsScope::Cumulative).unwrap();
        assert_eq!((s.graded, s.mismatched, s.skipped, s.errored), (1, 1, 1, 0));
        assert_eq!(s.verdicts.len(), 3);
    }
}
