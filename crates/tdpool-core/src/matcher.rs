// Fuzzy player-name matching between free-text picks and feed scorer names.

use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

/// Default acceptance threshold. Tunable through `[matching] threshold`.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.85;

/// Score for an equal last name plus an abbreviated or prefixed first name
/// ("P. Mahomes", "Pat Mahomes").
const INITIAL_MATCH_SCORE: f64 = 0.95;

/// Score for a last-name-only pick ("Mahomes") equal to the candidate's
/// last name.
const LAST_NAME_ONLY_SCORE: f64 = 0.9;

/// Upper bound for the token-similarity fallback. Structural rules score at
/// or above it.
const TOKEN_SIMILARITY_CAP: f64 = 0.9;

/// Multiplier applied when both names carry a first name and the first
/// names cannot refer to the same player.
const FIRST_NAME_CONFLICT_FACTOR: f64 = 0.5;

/// Generational suffixes dropped during normalization.
const SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv", "v"];

/// Which rule produced a match score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchRule {
    Exact,
    LastNameAndInitial,
    LastNameOnly,
    TokenSimilarity,
    NoMatch,
}

/// Result of comparing a predicted name against one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NameMatch {
    pub is_match: bool,
    /// Confidence in [0, 1].
    pub score: f64,
    pub rule: MatchRule,
}

/// Name matcher with a configurable acceptance threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NameMatcher {
    threshold: f64,
}

impl Default for NameMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl NameMatcher {
    /// Create a matcher. Returns `None` unless `threshold` is in (0, 1].
    pub fn new(threshold: f64) -> Option<Self> {
        (threshold.is_finite() && threshold > 0.0 && threshold <= 1.0).then_some(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compare `predicted` against `candidate`.
    pub fn match_names(&self, predicted: &str, candidate: &str) -> NameMatch {
        let (score, rule) = similarity(predicted, candidate);
        NameMatch {
            is_match: score >= self.threshold,
            score,
            rule,
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Split a display name into normalized tokens.
///
/// Lowercases, removes apostrophes, treats every other non-alphanumeric
/// character as a separator, and drops generational suffixes.
fn tokens(name: &str) -> Vec<String> {
    let mut cleaned = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch == '\'' || ch == '\u{2019}' {
            continue;
        }
        if ch.is_alphanumeric() {
            cleaned.extend(ch.to_lowercase());
        } else {
            cleaned.push(' ');
        }
    }
    let mut parts: Vec<String> = cleaned.split_whitespace().map(str::to_string).collect();
    // Keep a lone token even if it happens to look like a suffix ("V").
    while parts.len() > 1 && parts.last().is_some_and(|t| SUFFIXES.contains(&t.as_str())) {
        parts.pop();
    }
    parts
}

/// Normalize a player name: lowercase, punctuation and suffixes stripped,
/// whitespace collapsed. `"Michael Pittman Jr."` -> `"michael pittman"`.
pub fn normalize_name(name: &str) -> String {
    tokens(name).join(" ")
}

/// Normalize a team abbreviation onto the play-by-play feed's codes.
pub fn normalize_team(team: &str) -> String {
    let code = team.trim().to_uppercase();
    match code.as_str() {
        "JAC" => "JAX".to_string(),
        "WSH" => "WAS".to_string(),
        "LAR" => "LA".to_string(),
        "ARZ" => "ARI".to_string(),
        "BLT" => "BAL".to_string(),
        "CLV" => "CLE".to_string(),
        "HST" => "HOU".to_string(),
        _ => code,
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

fn initial(token: &str) -> Option<char> {
    token.chars().next()
}

/// Two first-name tokens can name the same player: equal, an initial that
/// agrees ("p" / "patrick"), or one a prefix of the other ("pat" /
/// "patrick"). Two different spelled-out names ("josh" / "jonathan") cannot.
fn first_names_compatible(a: &str, b: &str) -> bool {
    if initial(a) != initial(b) {
        return false;
    }
    a.chars().count() == 1 || b.chars().count() == 1 || a.starts_with(b) || b.starts_with(a)
}

/// Mean over predicted tokens of the best Jaro-Winkler similarity against
/// any candidate token.
fn token_similarity(predicted: &[String], candidate: &[String]) -> f64 {
    if predicted.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    let total: f64 = predicted
        .iter()
        .map(|p| {
            candidate
                .iter()
                .map(|c| jaro_winkler(p, c))
                .fold(0.0_f64, f64::max)
        })
        .sum();
    total / predicted.len() as f64
}

fn similarity(predicted: &str, candidate: &str) -> (f64, MatchRule) {
    let p = tokens(predicted);
    let c = tokens(candidate);
    if p.is_empty() || c.is_empty() {
        return (0.0, MatchRule::NoMatch);
    }
    if p == c {
        return (1.0, MatchRule::Exact);
    }

    let both_have_first = p.len() > 1 && c.len() > 1;
    let firsts_agree = first_names_compatible(&p[0], &c[0]);

    if both_have_first && firsts_agree && p.last() == c.last() {
        return (INITIAL_MATCH_SCORE, MatchRule::LastNameAndInitial);
    }
    // "Mahomes" or "St. Brown": the pick is the tail of the recorded name.
    if c.len() > p.len() && c.ends_with(&p) {
        return (LAST_NAME_ONLY_SCORE, MatchRule::LastNameOnly);
    }

    let mut score = token_similarity(&p, &c).min(TOKEN_SIMILARITY_CAP);
    if both_have_first && !firsts_agree {
        score *= FIRST_NAME_CONFLICT_FACTOR;
    }
    let score = score.clamp(0.0, 1.0);
    if score == 0.0 {
        (0.0, MatchRule::NoMatch)
    } else {
        (score, MatchRule::TokenSimilarity)
    }
}
