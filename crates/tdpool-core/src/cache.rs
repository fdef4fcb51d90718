// In-memory caches: per-game touchdown indexes and per-scope leaderboards.
//
// A grading pass reads from an `IndexSnapshot`, so an index rebuilt while the
// pass runs is only seen by the next pass.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::events::{build_game, GameFeed, GameTouchdownIndex};
use crate::grading::{IndexProvider, Verdict};
use crate::scoring::ScoringRules;
use crate::standings::{Standings, StandingsScope};

// ---------------------------------------------------------------------------
// Index cache
// ---------------------------------------------------------------------------

/// Lazily built touchdown indexes, rebuilt when their game is marked stale.
#[derive(Debug, Default)]
pub struct IndexCache {
    entries: HashMap<String, Arc<GameTouchdownIndex>>,
    stale: HashSet<String>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a rebuild of `game_id` on its next lookup.
    pub fn mark_stale(&mut self, game_id: &str) {
        if self.entries.contains_key(game_id) {
            self.stale.insert(game_id.to_string());
        }
    }

    pub fn is_cached(&self, game_id: &str) -> bool {
        self.entries.contains_key(game_id) && !self.stale.contains(game_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the cached index for `game_id`, building it through `load`
    /// when missing or stale. `Ok(None)` means the store has no such game.
    pub fn get_or_build<F, E>(
        &mut self,
        game_id: &str,
        load: F,
    ) -> Result<Option<Arc<GameTouchdownIndex>>, E>
    where
        F: FnOnce(&str) -> Result<Option<GameFeed>, E>,
    {
        if self.is_cached(game_id) {
            return Ok(self.entries.get(game_id).cloned());
        }

        let rebuilt = load(game_id)?.map(|feed| Arc::new(build_game(&feed)));
        self.stale.remove(game_id);
        match &rebuilt {
            Some(index) => {
                debug!(game_id, touchdowns = index.touchdown_count(), "rebuilt touchdown index");
                self.entries.insert(game_id.to_string(), Arc::clone(index));
            }
            None => {
                self.entries.remove(game_id);
            }
        }
        Ok(rebuilt)
    }

    /// Freeze the indexes for `game_ids` for one grading pass.
    pub fn snapshot<'a, I, F, E>(&mut self, game_ids: I, mut load: F) -> Result<IndexSnapshot, E>
    where
        I: IntoIterator<Item = &'a str>,
        F: FnMut(&str) -> Result<Option<GameFeed>, E>,
    {
        let mut indexes = HashMap::new();
        for game_id in game_ids {
            if indexes.contains_key(game_id) {
                continue;
            }
            if let Some(index) = self.get_or_build(game_id, &mut load)? {
                indexes.insert(game_id.to_string(), index);
            }
        }
        Ok(IndexSnapshot { indexes })
    }
}

/// Immutable view of the indexes a grading pass reads.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    indexes: HashMap<String, Arc<GameTouchdownIndex>>,
}

impl IndexSnapshot {
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

impl IndexProvider for IndexSnapshot {
    fn index_for(&self, game_id: &str) -> Option<&GameTouchdownIndex> {
        self.indexes.get(game_id).map(Arc::as_ref)
    }
}

// ---------------------------------------------------------------------------
// Standings cache
// ---------------------------------------------------------------------------

/// Materialized leaderboards keyed by scope.
#[derive(Debug, Default)]
pub struct StandingsCache {
    boards: HashMap<StandingsScope, Standings>,
}

impl StandingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scope: &StandingsScope) -> Option<&Standings> {
        self.boards.get(scope)
    }

    pub fn insert(&mut self, standings: Standings) {
        self.boards.insert(standings.scope().clone(), standings);
    }

    pub fn invalidate(&mut self, scope: &StandingsScope) {
        self.boards.remove(scope);
    }

    pub fn clear(&mut self) {
        self.boards.clear();
    }

    /// Update every cached board touched by `changed` verdicts.
    ///
    /// `changed` names the rows to refresh by user and period; it should
    /// list both the new verdicts and the ones they replaced, so a verdict
    /// that moved to another user or period leaves its old row too.
    /// `user_verdicts` must hold all stored verdicts of the users appearing
    /// in `changed`. Boards that are not cached are left to be built on
    /// demand.
    pub fn apply_changes(&mut self, changed: &[Verdict], user_verdicts: &[Verdict], rules: &ScoringRules) {
        for (scope, board) in self.boards.iter_mut() {
            let users: BTreeSet<String> = changed
                .iter()
                .filter(|v| scope.includes(&v.period_id))
                .map(|v| v.user_id.clone())
                .collect();
            if users.is_empty() {
                continue;
            }
            debug!(%scope, users = users.len(), "refreshing standings");
            board.refresh_users(&users, user_verdicts, rules);
        }
    }
}
