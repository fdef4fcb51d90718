// CSV input adapters: nflverse-style play-by-play and pool picks.
//
// Missing values may be blank or `NA`. Rows that cannot be read are skipped
// with a warning; an unreadable file is an error.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use tdpool_core::events::RawPlay;
use tdpool_core::grading::Prediction;
use tdpool_core::scoring::ScoringRules;

/// Play description the feed uses for its end-of-game marker.
const END_GAME_DESC: &str = "END GAME";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },
}

// ---------------------------------------------------------------------------
// Raw CSV serde structs (private)
// ---------------------------------------------------------------------------

/// One play-by-play row. Only the columns grading needs are read; the rest
/// of the file's columns are ignored.
#[derive(Debug, Deserialize)]
struct RawPbpRow {
    game_id: String,
    play_id: String,
    #[serde(default)]
    touchdown: String,
    #[serde(default)]
    td_player_name: String,
    #[serde(default)]
    td_team: String,
    #[serde(default)]
    td_player_position: String,
    #[serde(default)]
    home_team: String,
    #[serde(default)]
    away_team: String,
    #[serde(default)]
    desc: String,
}

#[derive(Debug, Deserialize)]
struct RawPickRow {
    prediction_id: String,
    user_id: String,
    #[serde(alias = "week")]
    period_id: String,
    game_id: String,
    #[serde(alias = "predicted_name")]
    player_name: String,
    #[serde(default, alias = "predicted_team")]
    team: String,
    #[serde(default)]
    odds: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Trimmed value, or `None` for blank and `NA`.
fn value(raw: &str) -> Option<&str> {
    let v = raw.trim();
    (!v.is_empty() && v != "NA").then_some(v)
}

fn owned(raw: &str) -> Option<String> {
    value(raw).map(str::to_string)
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        value(raw).map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "1.0" | "true")
    )
}

/// nflverse writes some integer columns as floats (`"55.0"`).
fn parse_play_id(raw: &str) -> Option<u64> {
    let v = value(raw)?;
    v.parse::<u64>().ok().or_else(|| {
        v.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u64)
    })
}

// ---------------------------------------------------------------------------
// Reader-based loaders (private, enable testing without temp files)
// ---------------------------------------------------------------------------

fn load_plays_from_reader<R: Read>(rdr: R) -> Result<Vec<RawPlay>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut plays = Vec::new();
    for result in reader.deserialize::<RawPbpRow>() {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                warn!("skipping malformed play row: {}", e);
                continue;
            }
        };
        let Some(game_id) = owned(&raw.game_id) else {
            warn!("skipping play without game_id");
            continue;
        };
        let Some(play_id) = parse_play_id(&raw.play_id) else {
            warn!("skipping play in {}: bad play_id '{}'", game_id, raw.play_id);
            continue;
        };
        plays.push(RawPlay {
            game_id,
            play_id,
            touchdown: parse_flag(&raw.touchdown),
            td_player_name: owned(&raw.td_player_name),
            td_team: owned(&raw.td_team),
            td_player_position: owned(&raw.td_player_position),
            home_team: owned(&raw.home_team),
            away_team: owned(&raw.away_team),
            game_over: raw.desc.trim().eq_ignore_ascii_case(END_GAME_DESC),
        });
    }
    Ok(plays)
}

fn load_predictions_from_reader<R: Read>(
    rdr: R,
    rules: &ScoringRules,
) -> Result<Vec<Prediction>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut predictions = Vec::new();
    for result in reader.deserialize::<RawPickRow>() {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                warn!("skipping malformed prediction row: {}", e);
                continue;
            }
        };
        let odds = match value(&raw.odds) {
            None => None,
            Some(v) => match v.parse::<i32>() {
                Ok(o) => Some(o),
                Err(_) => {
                    warn!(
                        "prediction '{}': unreadable odds '{}', grading without odds",
                        raw.prediction_id.trim(),
                        v
                    );
                    None
                }
            },
        };
        predictions.push(
            Prediction::new(
                raw.prediction_id.trim(),
                raw.user_id.trim(),
                raw.period_id.trim(),
                raw.game_id.trim(),
                raw.player_name.trim(),
                raw.team.trim(),
            )
            .with_odds(odds, rules),
        );
    }
    Ok(predictions)
}

// ---------------------------------------------------------------------------
// Public path-based loaders
// ---------------------------------------------------------------------------

/// Load a season's play-by-play CSV.
pub fn load_plays(path: &Path) -> Result<Vec<RawPlay>, FeedError> {
    let file = std::fs::File::open(path).map_err(|e| FeedError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_plays_from_reader(file).map_err(|e| FeedError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

/// Load pool picks, deriving each pick's stake return under `rules`.
pub fn load_predictions(path: &Path, rules: &ScoringRules) -> Result<Vec<Prediction>, FeedError> {
    let file = std::fs::File::open(path).map_err(|e| FeedError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_predictions_from_reader(file, rules).map_err(|e| FeedError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const PBP: &str = "\
play_id,game_id,home_team,away_team,posteam,desc,touchdown,td_team,td_player_name
1,2024_05_BUF_KC,KC,BUF,NA,GAME,0,NA,NA
55.0,2024_05_BUF_KC,KC,BUF,KC,(9:12) I.Pacheco 3 yd run (kick is good),1,KC,I.Pacheco
130,2024_05_BUF_KC,KC,BUF,KC,(2:01) P.Mahomes pass short left to T.Kelce for 12 yards,1,KC,T.Kelce
4000,2024_05_BUF_KC,KC,BUF,NA,END GAME,0,NA,NA
";

    // -- Plays --

    #[test]
    fn reads_nflverse_columns() {
        let plays = load_plays_from_reader(PBP.as_bytes()).unwrap();
        assert_eq!(plays.len(), 4);

        let first = &plays[0];
        assert!(!first.touchdown);
        assert_eq!(first.td_player_name, None);
        assert_eq!(first.home_team.as_deref(), Some("KC"));

        let td = &plays[1];
        assert_eq!(td.play_id, 55);
        assert!(td.touchdown);
        assert_eq!(td.td_player_name.as_deref(), Some("I.Pacheco"));
        assert_eq!(td.td_team.as_deref(), Some("KC"));
        assert_eq!(td.td_player_position, None);

        assert!(plays[3].game_over);
        assert!(!plays[2].game_over);
    }

    #[test]
    fn skips_rows_without_ids() {
        let csv = "play_id,game_id,touchdown,td_player_name\n\
                   NA,G1,1,A.Player\n\
                   7,,1,B.Player\n\
                   8,G1,1,C.Player\n";
        let plays = load_plays_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0].play_id, 8);
    }

    #[test]
    fn optional_position_column_is_read() {
        let csv = "play_id,game_id,touchdown,td_player_name,td_team,td_player_position\n\
                   10,G1,1,T.Kelce,KC,TE\n";
        let plays = load_plays_from_reader(csv.as_bytes()).unwrap();
        assert_eq!(plays[0].td_player_position.as_deref(), Some("TE"));
    }

    #[test]
    fn touchdown_flag_variants() {
        assert!(parse_flag("1"));
        assert!(parse_flag("1.0"));
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("NA"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn play_id_parsing() {
        assert_eq!(parse_play_id("55"), Some(55));
        assert_eq!(parse_play_id(" 55.0 "), Some(55));
        assert_eq!(parse_play_id("55.5"), None);
        assert_eq!(parse_play_id("-1"), None);
        assert_eq!(parse_play_id("NA"), None);
    }

    // -- Predictions --

    #[test]
    fn reads_predictions_and_derives_stake_return() {
        let csv = "prediction_id,user_id,week,game_id,player_name,team,odds\n\
                   p1,alice,2024-W05,2024_05_BUF_KC,P. Mahomes,KC,+650\n\
                   p2,bob,2024-W05,2024_05_BUF_KC,Kelce,,\n\
                   p3,carol,2024-W05,2024_05_BUF_KC,James Cook,BUF,-120\n";
        let preds = load_predictions_from_reader(csv.as_bytes(), &ScoringRules::default()).unwrap();
        assert_eq!(preds.len(), 3);

        assert_eq!(preds[0].period_id, "2024-W05");
        assert_eq!(preds[0].odds, Some(650));
        assert_eq!(preds[0].stake_return_if_correct, Some(6.5));

        assert_eq!(preds[1].predicted_team, "");
        assert_eq!(preds[1].odds, None);
        assert_eq!(preds[1].stake_return_if_correct, None);

        let r = preds[2].stake_return_if_correct.unwrap();
        assert!((r - 100.0 / 120.0).abs() < 1e-12);
    }

    #[test]
    fn unreadable_odds_are_dropped_not_fatal() {
        let csv = "prediction_id,user_id,period_id,game_id,predicted_name,odds\n\
                   p1,alice,W1,G1,Kelce,evens\n";
        let preds = load_predictions_from_reader(csv.as_bytes(), &ScoringRules::default()).unwrap();
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].odds, None);
        assert_eq!(preds[0].predicted_name, "Kelce");
    }

    #[test]
    fn short_prediction_row_is_skipped() {
        let csv = "prediction_id,user_id,period_id,game_id,player_name\n\
                   p1,alice,W1\n\
                   p2,bob,W1,G1,Kelce\n";
        let preds = load_predictions_from_reader(csv.as_bytes(), &ScoringRules::default()).unwrap();
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].prediction_id, "p2");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_plays(Path::new("/nonexistent/plays.csv")).unwrap_err();
        assert!(matches!(err, FeedError::Io { .. }));
    }
}
