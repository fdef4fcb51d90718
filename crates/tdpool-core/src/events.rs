// Touchdown event index: per-game ordered touchdown lists, first-TD lookup,
// and the distinct scorer set used for any-TD checks.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::matcher::normalize_team;

// ---------------------------------------------------------------------------
// Raw feed records
// ---------------------------------------------------------------------------

/// One play from a season's play-by-play stream. Most plays are not
/// touchdowns; they still tell us which games exist, who is playing, and
/// whether the game has ended.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawPlay {
    pub game_id: String,
    /// Intra-game ordering key.
    pub play_id: u64,
    pub touchdown: bool,
    pub td_player_name: Option<String>,
    pub td_team: Option<String>,
    pub td_player_position: Option<String>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    /// Set on the feed's end-of-game marker play.
    pub game_over: bool,
}

/// A touchdown record for a single game, as delivered by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTouchdown {
    pub sequence: u64,
    pub scorer_name: String,
    pub scorer_team: String,
    pub scoring_position: Option<String>,
}

/// The complete snapshot of one game as last reported by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GameFeed {
    pub game_id: String,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub is_final: bool,
    pub touchdowns: Vec<RawTouchdown>,
}

// ---------------------------------------------------------------------------
// Derived index
// ---------------------------------------------------------------------------

/// One touchdown play, normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TouchdownEvent {
    pub game_id: String,
    pub sequence_number: u64,
    /// Canonical scorer name as recorded by the feed.
    pub scorer_name: String,
    /// Normalized team code (see `normalize_team`).
    pub scorer_team: String,
    pub scoring_position: Option<String>,
}

/// A distinct touchdown scorer within one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scorer {
    pub name: String,
    pub team: String,
    /// Number of touchdowns this scorer has in the game.
    pub touchdowns: u32,
    /// Sequence number of the scorer's earliest touchdown.
    pub first_sequence: u64,
}

/// Per-game touchdown lookup. Events are stored in first-TD order, so the
/// designated first touchdown is always `events[0]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameTouchdownIndex {
    game_id: String,
    events: Vec<TouchdownEvent>,
    scorers: Vec<Scorer>,
    teams: BTreeSet<String>,
    /// `teams` lists both participants, not just the teams that scored.
    roster_known: bool,
    is_final: bool,
}

impl GameTouchdownIndex {
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// All touchdowns, ordered by sequence with the tie-break applied.
    pub fn events(&self) -> &[TouchdownEvent] {
        &self.events
    }

    /// The designated first touchdown, or `None` when no touchdown has been
    /// recorded yet.
    pub fn first_touchdown(&self) -> Option<&TouchdownEvent> {
        self.events.first()
    }

    /// Distinct scorers, ordered by their earliest touchdown.
    pub fn scorers(&self) -> &[Scorer] {
        &self.scorers
    }

    /// Teams known to be playing: home/away from the feed plus every
    /// scoring team.
    pub fn teams(&self) -> &BTreeSet<String> {
        &self.teams
    }

    /// Whether `team` (any accepted abbreviation) is one of the game's teams.
    pub fn has_team(&self, team: &str) -> bool {
        self.teams.contains(&normalize_team(team))
    }

    /// Whether the index knows every team playing, so a team outside
    /// `teams()` is definitely not in the game.
    pub fn roster_known(&self) -> bool {
        self.roster_known
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn touchdown_count(&self) -> usize {
        self.events.len()
    }

    /// True when at least one touchdown can be graded against.
    pub fn is_gradable(&self) -> bool {
        !self.events.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Total order used to arrange a game's touchdowns.
///
/// Ascending sequence; on equal sequence an event with a scoring position
/// sorts before one without, then the smaller scorer name, then the smaller
/// team code. The remaining key only separates otherwise identical rows.
fn compare_events(a: &TouchdownEvent, b: &TouchdownEvent) -> Ordering {
    a.sequence_number
        .cmp(&b.sequence_number)
        .then_with(|| {
            b.scoring_position
                .is_some()
                .cmp(&a.scoring_position.is_some())
        })
        .then_with(|| a.scorer_name.cmp(&b.scorer_name))
        .then_with(|| a.scorer_team.cmp(&b.scorer_team))
        .then_with(|| a.scoring_position.cmp(&b.scoring_position))
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Build the touchdown index for one game from unsorted raw records.
///
/// Rows with a blank scorer name are dropped. Rows repeating the same
/// sequence, scorer and team collapse into one event (the copy carrying a
/// position is kept). A game with no touchdowns yields an index whose
/// `first_touchdown()` is `None`.
pub fn build_index<I>(game_id: &str, touchdowns: I) -> GameTouchdownIndex
where
    I: IntoIterator<Item = RawTouchdown>,
{
    let mut events: Vec<TouchdownEvent> = touchdowns
        .into_iter()
        .filter_map(|raw| {
            let name = raw.scorer_name.trim();
            if name.is_empty() {
                debug!(game_id, sequence = raw.sequence, "dropping touchdown without scorer");
                return None;
            }
            Some(TouchdownEvent {
                game_id: game_id.to_string(),
                sequence_number: raw.sequence,
                scorer_name: name.to_string(),
                scorer_team: normalize_team(&raw.scorer_team),
                scoring_position: clean(raw.scoring_position.as_deref()),
            })
        })
        .collect();

    events.sort_by(compare_events);
    events.dedup_by(|later, kept| {
        later.sequence_number == kept.sequence_number
            && later.scorer_name == kept.scorer_name
            && later.scorer_team == kept.scorer_team
    });

    let mut by_scorer: BTreeMap<(String, String), Scorer> = BTreeMap::new();
    for event in &events {
        by_scorer
            .entry((event.scorer_name.clone(), event.scorer_team.clone()))
            .and_modify(|s| s.touchdowns += 1)
            .or_insert_with(|| Scorer {
                name: event.scorer_name.clone(),
                team: event.scorer_team.clone(),
                touchdowns: 1,
                first_sequence: event.sequence_number,
            });
    }
    let mut scorers: Vec<Scorer> = by_scorer.into_values().collect();
    scorers.sort_by(|a, b| {
        a.first_sequence
            .cmp(&b.first_sequence)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.team.cmp(&b.team))
    });

    let teams = events
        .iter()
        .map(|e| e.scorer_team.clone())
        .filter(|t| !t.is_empty())
        .collect();

    GameTouchdownIndex {
        game_id: game_id.to_string(),
        events,
        scorers,
        teams,
        roster_known: false,
        is_final: false,
    }
}

/// Build the index for a full game snapshot, including its participating
/// teams and final flag.
pub fn build_game(feed: &GameFeed) -> GameTouchdownIndex {
    let mut index = build_index(&feed.game_id, feed.touchdowns.iter().cloned());
    for team in [&feed.home_team, &feed.away_team].into_iter().flatten() {
        let code = normalize_team(team);
        if !code.is_empty() {
            index.teams.insert(code);
            index.roster_known = true;
        }
    }
    index.is_final = feed.is_final;
    index
}

/// Group a season's raw play stream into per-game snapshots.
///
/// Every play contributes its game's teams and end-of-game marker; only
/// plays flagged as touchdowns with a named scorer become touchdown records.
pub fn group_season<I>(plays: I) -> BTreeMap<String, GameFeed>
where
    I: IntoIterator<Item = RawPlay>,
{
    let mut games: BTreeMap<String, GameFeed> = BTreeMap::new();

    for play in plays {
        let game_id = play.game_id.trim();
        if game_id.is_empty() {
            continue;
        }
        let feed = games.entry(game_id.to_string()).or_insert_with(|| GameFeed {
            game_id: game_id.to_string(),
            ..GameFeed::default()
        });

        if let Some(home) = clean(play.home_team.as_deref()) {
            feed.home_team = Some(home);
        }
        if let Some(away) = clean(play.away_team.as_deref()) {
            feed.away_team = Some(away);
        }
        feed.is_final |= play.game_over;

        if !play.touchdown {
            continue;
        }
        match clean(play.td_player_name.as_deref()) {
            Some(scorer_name) => feed.touchdowns.push(RawTouchdown {
                sequence: play.play_id,
                scorer_name,
                scorer_team: play.td_team.unwrap_or_default(),
                scoring_position: clean(play.td_player_position.as_deref()),
            }),
            None => debug!(
                game_id,
                play_id = play.play_id,
                "touchdown play has no scorer yet; skipping"
            ),
        }
    }

    games
}

/// Build one index per game present in a season's play stream.
pub fn build_season_index<I>(plays: I) -> BTreeMap<String, GameTouchdownIndex>
where
    I: IntoIterator<Item = RawPlay>,
{
    group_season(plays)
        .into_iter()
        .map(|(game_id, feed)| (game_id, build_game(&feed)))
        .collect()
}
