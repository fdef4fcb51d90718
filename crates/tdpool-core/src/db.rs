// SQLite persistence for predictions, game feeds, and verdicts.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::events::{build_game, GameFeed, RawTouchdown};
use crate::grading::{Prediction, Verdict, VerdictStatus};
use crate::standings::StandingsScope;

/// SQLite-backed store. The verdicts table is the system of record; every
/// cache can be rebuilt from it.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS predictions (
                prediction_id  TEXT PRIMARY KEY,
                user_id        TEXT NOT NULL,
                period_id      TEXT NOT NULL,
                game_id        TEXT NOT NULL,
                predicted_name TEXT NOT NULL,
                predicted_team TEXT NOT NULL,
                odds           INTEGER,
                stake_return   REAL
            );

            CREATE TABLE IF NOT EXISTS games (
                game_id    TEXT PRIMARY KEY,
                home_team  TEXT,
                away_team  TEXT,
                is_final   INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS touchdown_events (
                game_id          TEXT NOT NULL REFERENCES games(game_id),
                sequence_number  INTEGER NOT NULL,
                scorer_name      TEXT NOT NULL,
                scorer_team      TEXT NOT NULL,
                scoring_position TEXT,
                PRIMARY KEY (game_id, sequence_number, scorer_name, scorer_team)
            );

            CREATE TABLE IF NOT EXISTS verdicts (
                prediction_id       TEXT PRIMARY KEY REFERENCES predictions(prediction_id),
                user_id             TEXT NOT NULL,
                period_id           TEXT NOT NULL,
                game_id             TEXT NOT NULL,
                status              TEXT NOT NULL,
                is_first_td_correct INTEGER,
                is_any_td_correct   INTEGER,
                matched_scorer_name TEXT,
                match_score         REAL,
                realized_return     REAL NOT NULL,
                ambiguous           INTEGER NOT NULL DEFAULT 0,
                note                TEXT,
                graded_at           TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_predictions_period ON predictions(period_id);
            CREATE INDEX IF NOT EXISTS idx_verdicts_period ON verdicts(period_id);
            CREATE INDEX IF NOT EXISTS idx_verdicts_user ON verdicts(user_id);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A poisoned lock still holds a usable connection; SQLite rolls back
    /// any transaction the panicking thread left open.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Predictions
    // ------------------------------------------------------------------

    /// Insert or update predictions in one transaction. Returns the number
    /// of rows written.
    pub fn upsert_predictions(&self, predictions: &[Prediction]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .context("failed to begin predictions transaction")?;

        for p in predictions {
            tx.execute(
                "INSERT INTO predictions
                    (prediction_id, user_id, period_id, game_id, predicted_name, predicted_team, odds, stake_return)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(prediction_id) DO UPDATE SET
                    user_id        = excluded.user_id,
                    period_id      = excluded.period_id,
                    game_id        = excluded.game_id,
                    predicted_name = excluded.predicted_name,
                    predicted_team = excluded.predicted_team,
                    odds           = excluded.odds,
                    stake_return   = excluded.stake_return",
                params![
                    p.prediction_id,
                    p.user_id,
                    p.period_id,
                    p.game_id,
                    p.predicted_name,
                    p.predicted_team,
                    p.odds,
                    p.stake_return_if_correct,
                ],
            )
            .with_context(|| format!("failed to upsert prediction {}", p.prediction_id))?;
        }

        tx.commit().context("failed to commit predictions")?;
        Ok(predictions.len())
    }

    /// Load predictions in `scope`, ordered by prediction id.
    pub fn load_predictions(&self, scope: &StandingsScope) -> Result<Vec<Prediction>> {
        let conn = self.conn();
        let (sql, period) = match scope {
            StandingsScope::Period(p) => (
                "SELECT prediction_id, user_id, period_id, game_id, predicted_name, predicted_team, odds, stake_return
                 FROM predictions WHERE period_id = ?1 ORDER BY prediction_id",
                Some(p.as_str()),
            ),
            StandingsScope::Cumulative => (
                "SELECT prediction_id, user_id, period_id, game_id, predicted_name, predicted_team, odds, stake_return
                 FROM predictions ORDER BY prediction_id",
                None,
            ),
        };
        let mut stmt = conn
            .prepare(sql)
            .context("failed to prepare load_predictions query")?;

        let map_row = |row: &Row<'_>| -> rusqlite::Result<Prediction> {
            Ok(Prediction {
                prediction_id: row.get(0)?,
                user_id: row.get(1)?,
                period_id: row.get(2)?,
                game_id: row.get(3)?,
                predicted_name: row.get(4)?,
                predicted_team: row.get(5)?,
                odds: row.get(6)?,
                stake_return_if_correct: row.get(7)?,
            })
        };
        let rows = match period {
            Some(p) => stmt.query_map(params![p], map_row),
            None => stmt.query_map([], map_row),
        }
        .context("failed to query predictions")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map prediction rows")?;

        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Games
    // ------------------------------------------------------------------

    /// Replace the stored snapshot of a game.
    ///
    /// Returns `true` when the game's touchdown index changed (new game,
    /// added or retracted touchdown, corrected scorer, team or final flag),
    /// `false` when the feed re-delivered the same data.
    pub fn replace_game_feed(&self, feed: &GameFeed) -> Result<bool> {
        let previous = self.load_game_feed(&feed.game_id)?;
        let index = build_game(feed);
        if previous.as_ref().map(build_game).as_ref() == Some(&index) {
            return Ok(false);
        }

        let sequences = index
            .events()
            .iter()
            .map(|e| {
                i64::try_from(e.sequence_number).with_context(|| {
                    format!(
                        "touchdown sequence {} in game {} is out of range",
                        e.sequence_number, feed.game_id
                    )
                })
            })
            .collect::<Result<Vec<i64>>>()?;

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .context("failed to begin game transaction")?;

        tx.execute(
            "INSERT INTO games (game_id, home_team, away_team, is_final, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(game_id) DO UPDATE SET
                home_team  = excluded.home_team,
                away_team  = excluded.away_team,
                is_final   = excluded.is_final,
                updated_at = excluded.updated_at",
            params![
                feed.game_id,
                feed.home_team,
                feed.away_team,
                feed.is_final,
                Utc::now().to_rfc3339(),
            ],
        )
        .with_context(|| format!("failed to upsert game {}", feed.game_id))?;

        tx.execute(
            "DELETE FROM touchdown_events WHERE game_id = ?1",
            params![feed.game_id],
        )
        .context("failed to clear touchdown events")?;

        for (event, sequence) in index.events().iter().zip(sequences) {
            tx.execute(
                "INSERT INTO touchdown_events
                    (game_id, sequence_number, scorer_name, scorer_team, scoring_position)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.game_id,
                    sequence,
                    event.scorer_name,
                    event.scorer_team,
                    event.scoring_position,
                ],
            )
            .context("failed to insert touchdown event")?;
        }

        tx.commit().context("failed to commit game feed")?;
        Ok(true)
    }

    /// Load the stored snapshot of a game, or `None` if it was never seen.
    pub fn load_game_feed(&self, game_id: &str) -> Result<Option<GameFeed>> {
        let conn = self.conn();
        let game = conn
            .query_row(
                "SELECT home_team, away_team, is_final FROM games WHERE game_id = ?1",
                params![game_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, bool>(2)?,
                    ))
                },
            )
            .optional()
            .context("failed to query game")?;

        let Some((home_team, away_team, is_final)) = game else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare(
                "SELECT sequence_number, scorer_name, scorer_team, scoring_position
                 FROM touchdown_events WHERE game_id = ?1
                 ORDER BY sequence_number, scorer_name, scorer_team",
            )
            .context("failed to prepare touchdown query")?;
        let touchdowns = stmt
            .query_map(params![game_id], |row| {
                let sequence = u64::try_from(row.get::<_, i64>(0)?).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(e))
                })?;
                Ok(RawTouchdown {
                    sequence,
                    scorer_name: row.get(1)?,
                    scorer_team: row.get(2)?,
                    scoring_position: row.get(3)?,
                })
            })
            .context("failed to query touchdown events")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map touchdown rows")?;

        Ok(Some(GameFeed {
            game_id: game_id.to_string(),
            home_team,
            away_team,
            is_final,
            touchdowns,
        }))
    }

    pub fn game_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT game_id FROM games ORDER BY game_id")
            .context("failed to prepare game_ids query")?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .context("failed to query game ids")?
            .collect::<std::result::Result<Vec<String>, _>>()
            .context("failed to map game id rows")?;
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Verdicts
    // ------------------------------------------------------------------

    /// Write a verdict, replacing any earlier one for the same prediction.
    ///
    /// Re-writing an equal verdict leaves the row (and its `graded_at`)
    /// untouched and reports `Unchanged`.
    pub fn save_verdict(&self, verdict: &Verdict) -> Result<VerdictWrite> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .context("failed to begin verdict transaction")?;

        let existing = tx
            .query_row(
                &format!("SELECT {VERDICT_COLUMNS} FROM verdicts WHERE prediction_id = ?1"),
                params![verdict.prediction_id],
                row_to_verdict,
            )
            .optional()
            .context("failed to read existing verdict")?;
        if existing.as_ref() == Some(verdict) {
            return Ok(VerdictWrite::Unchanged);
        }

        tx.execute(
            "INSERT INTO verdicts
                (prediction_id, user_id, period_id, game_id, status, is_first_td_correct,
                 is_any_td_correct, matched_scorer_name, match_score, realized_return,
                 ambiguous, note, graded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(prediction_id) DO UPDATE SET
                user_id             = excluded.user_id,
                period_id           = excluded.period_id,
                game_id             = excluded.game_id,
                status              = excluded.status,
                is_first_td_correct = excluded.is_first_td_correct,
                is_any_td_correct   = excluded.is_any_td_correct,
                matched_scorer_name = excluded.matched_scorer_name,
                match_score         = excluded.match_score,
                realized_return     = excluded.realized_return,
                ambiguous           = excluded.ambiguous,
                note                = excluded.note,
                graded_at           = excluded.graded_at",
            params![
                verdict.prediction_id,
                verdict.user_id,
                verdict.period_id,
                verdict.game_id,
                verdict.status.as_str(),
                verdict.is_first_td_correct,
                verdict.is_any_td_correct,
                verdict.matched_scorer_name,
                verdict.match_score,
                verdict.realized_return,
                verdict.ambiguous,
                verdict.note,
                Utc::now().to_rfc3339(),
            ],
        )
        .with_context(|| format!("failed to write verdict {}", verdict.prediction_id))?;

        tx.commit().context("failed to commit verdict")?;
        Ok(VerdictWrite::Written { previous: existing })
    }

    /// The stored verdict for one prediction.
    pub fn load_verdict(&self, prediction_id: &str) -> Result<Option<Verdict>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {VERDICT_COLUMNS} FROM verdicts WHERE prediction_id = ?1"),
            params![prediction_id],
            row_to_verdict,
        )
        .optional()
        .with_context(|| format!("failed to load verdict {prediction_id}"))
    }

    /// Remove a prediction's verdict, returning the row that was removed.
    pub fn delete_verdict(&self, prediction_id: &str) -> Result<Option<Verdict>> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .context("failed to begin verdict transaction")?;
        let existing = tx
            .query_row(
                &format!("SELECT {VERDICT_COLUMNS} FROM verdicts WHERE prediction_id = ?1"),
                params![prediction_id],
                row_to_verdict,
            )
            .optional()
            .context("failed to read existing verdict")?;
        if existing.is_some() {
            tx.execute(
                "DELETE FROM verdicts WHERE prediction_id = ?1",
                params![prediction_id],
            )
            .with_context(|| format!("failed to delete verdict {prediction_id}"))?;
            tx.commit().context("failed to commit verdict delete")?;
        }
        Ok(existing)
    }

    /// Load verdicts in `scope`, ordered by prediction id.
    pub fn load_verdicts(&self, scope: &StandingsScope) -> Result<Vec<Verdict>> {
        let conn = self.conn();
        let (filter, period) = match scope {
            StandingsScope::Period(p) => ("WHERE period_id = ?1", Some(p.as_str())),
            StandingsScope::Cumulative => ("", None),
        };
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {VERDICT_COLUMNS} FROM verdicts {filter} ORDER BY prediction_id"
            ))
            .context("failed to prepare load_verdicts query")?;

        let verdicts = match period {
            Some(p) => stmt.query_map(params![p], row_to_verdict),
            None => stmt.query_map([], row_to_verdict),
        }
        .context("failed to query verdicts")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map verdict rows")?;

        Ok(verdicts)
    }

    /// Load every verdict belonging to `users`, ordered by prediction id.
    pub fn load_verdicts_for_users(&self, users: &BTreeSet<String>) -> Result<Vec<Verdict>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {VERDICT_COLUMNS} FROM verdicts WHERE user_id = ?1 ORDER BY prediction_id"
            ))
            .context("failed to prepare user verdicts query")?;

        let mut verdicts = Vec::new();
        for user in users {
            let rows = stmt
                .query_map(params![user], row_to_verdict)
                .context("failed to query user verdicts")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to map user verdict rows")?;
            verdicts.extend(rows);
        }
        verdicts.sort_by(|a, b| a.prediction_id.cmp(&b.prediction_id));
        Ok(verdicts)
    }

    pub fn verdict_count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM verdicts", [], |row| row.get(0))
            .context("failed to count verdicts")?;
        Ok(count as usize)
    }
}

/// Outcome of `Database::save_verdict`.
#[derive(Debug, Clone, PartialEq)]
pub enum VerdictWrite {
    /// The stored verdict already matched.
    Unchanged,
    /// The verdict was stored; `previous` is the row it replaced.
    Written { previous: Option<Verdict> },
}

impl VerdictWrite {
    pub fn is_changed(&self) -> bool {
        matches!(self, VerdictWrite::Written { .. })
    }
}

const VERDICT_COLUMNS: &str = "prediction_id, user_id, period_id, game_id, status, \
     is_first_td_correct, is_any_td_correct, matched_scorer_name, match_score, \
     realized_return, ambiguous, note";

fn row_to_verdict(row: &Row<'_>) -> rusqlite::Result<Verdict> {
    let status: String = row.get(4)?;
    let status = VerdictStatus::from_str_status(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            format!("unknown verdict status {status:?}").into(),
        )
    })?;
    Ok(Verdict {
        prediction_id: row.get(0)?,
        user_id: row.get(1)?,
        period_id: row.get(2)?,
        game_id: row.get(3)?,
        status,
        is_first_td_correct: row.get(5)?,
        is_any_td_correct: row.get(6)?,
        matched_scorer_name: row.get(7)?,
        match_score: row.get(8)?,
        realized_return: row.get(9)?,
        ambiguous: row.get(10)?,
        note: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn prediction(id: &str, user: &str, period: &str) -> Prediction {
        Prediction {
            prediction_id: id.to_string(),
            user_id: user.to_string(),
            period_id: period.to_string(),
            game_id: "G1".to_string(),
            predicted_name: "Patrick Mahomes".to_string(),
            predicted_team: "KC".to_string(),
            odds: Some(650),
            stake_return_if_correct: Some(6.5),
        }
    }

    fn verdict(id: &str, user: &str, period: &str) -> Verdict {
        Verdict {
            prediction_id: id.to_string(),
            user_id: user.to_string(),
            period_id: period.to_string(),
            game_id: "G1".to_string(),
            status: VerdictStatus::Graded,
            is_first_td_correct: Some(true),
            is_any_td_correct: Some(true),
            matched_scorer_name: Some("Patrick Mahomes".to_string()),
            match_score: Some(0.95),
            realized_return: 6.5,
            ambiguous: false,
            note: None,
        }
    }

    fn feed(touchdowns: &[(u64, &str, &str)]) -> GameFeed {
        GameFeed {
            game_id: "G1".to_string(),
            home_team: Some("KC".to_string()),
            away_team: Some("BUF".to_string()),
            is_final: false,
            touchdowns: touchdowns
                .iter()
                .map(|&(sequence, name, team)| RawTouchdown {
                    sequence,
                    scorer_name: name.to_string(),
                    scorer_team: team.to_string(),
                    scoring_position: None,
                })
                .collect(),
        }
    }

    // -- Schema --

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(tables, vec!["games", "predictions", "touchdown_events", "verdicts"]);
    }

    // -- Predictions --

    #[test]
    fn predictions_round_trip_and_scope() {
        let db = test_db();
        db.upsert_predictions(&[prediction("p2", "bob", "W1"), prediction("p1", "alice", "W2")])
            .unwrap();

        let all = db.load_predictions(&StandingsScope::Cumulative).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], prediction("p1", "alice", "W2"));

        let w1 = db.load_predictions(&StandingsScope::period("W1")).unwrap();
        assert_eq!(w1.len(), 1);
        assert_eq!(w1[0].user_id, "bob");
    }

    #[test]
    fn upsert_prediction_replaces_fields() {
        let db = test_db();
        db.upsert_predictions(&[prediction("p1", "alice", "W1")]).unwrap();
        let mut edited = prediction("p1", "alice", "W1");
        edited.predicted_name = "Travis Kelce".to_string();
        edited.odds = None;
        edited.stake_return_if_correct = None;
        db.upsert_predictions(&[edited.clone()]).unwrap();

        let all = db.load_predictions(&StandingsScope::Cumulative).unwrap();
        assert_eq!(all, vec![edited]);
    }

    // -- Games --

    #[test]
    fn game_feed_round_trip() {
        let db = test_db();
        assert!(db.load_game_feed("G1").unwrap().is_none());

        let f = feed(&[(20, "Travis Kelce", "KC"), (10, "Isiah Pacheco", "KC")]);
        assert!(db.replace_game_feed(&f).unwrap());

        let stored = db.load_game_feed("G1").unwrap().unwrap();
        assert_eq!(build_game(&stored), build_game(&f));
        assert_eq!(stored.touchdowns[0].scorer_name, "Isiah Pacheco");
        assert_eq!(db.game_ids().unwrap(), vec!["G1"]);
    }

    #[test]
    fn identical_feed_is_not_a_change() {
        let db = test_db();
        let f = feed(&[(10, "Isiah Pacheco", "KC")]);
        assert!(db.replace_game_feed(&f).unwrap());
        assert!(!db.replace_game_feed(&f).unwrap());
    }

    #[test]
    fn corrected_scorer_is_a_change() {
        let db = test_db();
        db.replace_game_feed(&feed(&[(10, "Isiah Pacheco", "KC")])).unwrap();
        assert!(db.replace_game_feed(&feed(&[(10, "Patrick Mahomes", "KC")])).unwrap());

        let stored = db.load_game_feed("G1").unwrap().unwrap();
        assert_eq!(stored.touchdowns.len(), 1);
        assert_eq!(stored.touchdowns[0].scorer_name, "Patrick Mahomes");
    }

    #[test]
    fn duplicate_rows_are_stored_once() {
        let db = test_db();
        let f = feed(&[(10, "Isiah Pacheco", "KC"), (10, "Isiah Pacheco", "KC")]);
        db.replace_game_feed(&f).unwrap();
        assert_eq!(db.load_game_feed("G1").unwrap().unwrap().touchdowns.len(), 1);
    }

    // -- Verdicts --

    #[test]
    fn save_verdict_reports_changes_only() {
        let db = test_db();
        db.upsert_predictions(&[prediction("p1", "alice", "W1")]).unwrap();

        let v = verdict("p1", "alice", "W1");
        assert_eq!(db.save_verdict(&v).unwrap(), VerdictWrite::Written { previous: None });
        assert_eq!(db.save_verdict(&v).unwrap(), VerdictWrite::Unchanged);

        let mut regraded = v.clone();
        regraded.is_first_td_correct = Some(false);
        regraded.realized_return = 0.0;
        assert_eq!(
            db.save_verdict(&regraded).unwrap(),
            VerdictWrite::Written { previous: Some(v) }
        );

        assert_eq!(db.verdict_count().unwrap(), 1);
        assert_eq!(db.load_verdicts(&StandingsScope::Cumulative).unwrap(), vec![regraded]);
    }

    #[test]
    fn unresolved_verdict_round_trips_nulls() {
        let db = test_db();
        db.upsert_predictions(&[prediction("p1", "alice", "W1")]).unwrap();
        let v = Verdict {
            status: VerdictStatus::Ungradable,
            is_first_td_correct: None,
            is_any_td_correct: None,
            matched_scorer_name: None,
            match_score: None,
            realized_return: 0.0,
            note: Some("no event data for game".to_string()),
            ..verdict("p1", "alice", "W1")
        };
        db.save_verdict(&v).unwrap();
        assert_eq!(db.load_verdicts(&StandingsScope::period("W1")).unwrap(), vec![v]);
    }

    #[test]
    fn delete_verdict_returns_removed_row() {
        let db = test_db();
        db.upsert_predictions(&[prediction("p1", "alice", "W1")]).unwrap();
        let v = verdict("p1", "alice", "W1");
        db.save_verdict(&v).unwrap();

        assert_eq!(db.load_verdict("p1").unwrap(), Some(v.clone()));
        assert_eq!(db.delete_verdict("p1").unwrap(), Some(v));
        assert_eq!(db.delete_verdict("p1").unwrap(), None);
        assert_eq!(db.load_verdict("p1").unwrap(), None);
        assert_eq!(db.verdict_count().unwrap(), 0);
    }

    #[test]
    fn out_of_range_sequence_is_rejected() {
        let db = test_db();
        let f = feed(&[(u64::MAX, "Isiah Pacheco", "KC")]);
        assert!(db.replace_game_feed(&f).is_err());
        assert!(db.load_game_feed("G1").unwrap().is_none());
    }

    #[test]
    fn large_sequences_keep_their_order() {
        let db = test_db();
        let top = i64::MAX as u64;
        db.replace_game_feed(&feed(&[(top, "Travis Kelce", "KC"), (top - 1, "Isiah Pacheco", "KC")]))
            .unwrap();
        let stored = db.load_game_feed("G1").unwrap().unwrap();
        assert_eq!(stored.touchdowns[0].sequence, top - 1);
        assert_eq!(stored.touchdowns[1].sequence, top);
    }

    #[test]
    fn verdict_requires_known_prediction() {
        let db = test_db();
        assert!(db.save_verdict(&verdict("ghost", "alice", "W1")).is_err());
    }

    #[test]
    fn verdicts_scoped_by_period_and_user() {
        let db = test_db();
        db.upsert_predictions(&[
            prediction("p1", "alice", "W1"),
            prediction("p2", "bob", "W1"),
            prediction("p3", "alice", "W2"),
        ])
        .unwrap();
        for (id, user, period) in [("p1", "alice", "W1"), ("p2", "bob", "W1"), ("p3", "alice", "W2")] {
            db.save_verdict(&verdict(id, user, period)).unwrap();
        }

        assert_eq!(db.load_verdicts(&StandingsScope::period("W1")).unwrap().len(), 2);
        assert_eq!(db.load_verdicts(&StandingsScope::Cumulative).unwrap().len(), 3);

        let users: BTreeSet<String> = ["alice".to_string()].into_iter().collect();
        let ids: Vec<String> = db
            .load_verdicts_for_users(&users)
            .unwrap()
            .into_iter()
            .map(|v| v.prediction_id)
            .collect();
        assert_eq!(ids, vec!["p1", "p3"]);
    }
}
