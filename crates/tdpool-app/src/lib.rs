// tdpool: grades first-touchdown pool picks from play-by-play CSVs and
// publishes the leaderboard.

pub mod config;
pub mod feed;
pub mod runner;
