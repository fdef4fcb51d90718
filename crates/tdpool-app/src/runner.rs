// Grading runner: one-shot and polling modes over the configured CSV inputs.

use std::fmt::Write as _;
use std::future::Future;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use tdpool_core::db::Database;
use tdpool_core::service::{GradingService, GradingSummary};
use tdpool_core::standings::Standings;

use crate::config::Config;
use crate::feed;

/// Everything one grading run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub predictions_loaded: usize,
    pub changed_games: Vec<String>,
    pub summary: GradingSummary,
    pub standings: Standings,
}

pub struct Runner {
    config: Config,
    service: GradingService,
    /// Modification times of (plays, predictions) at the last run.
    last_seen: Option<(SystemTime, SystemTime)>,
}

impl Runner {
    pub fn new(config: Config, service: GradingService) -> Self {
        Self {
            config,
            service,
            last_seen: None,
        }
    }

    /// Open the configured database and build the grading service.
    pub fn from_config(config: Config) -> Result<Self> {
        let db = Database::open(&config.db_path).context("failed to open database")?;
        let matcher = config.matcher().context("invalid matching configuration")?;
        let service = GradingService::new(db, config.scoring.clone(), matcher)
            .context("invalid scoring configuration")?;
        Ok(Self::new(config, service))
    }

    pub fn service(&self) -> &GradingService {
        &self.service
    }

    /// Import both CSV files, grade the configured scope, and return the
    /// summary and leaderboard.
    pub fn run_once(&mut self) -> Result<RunReport> {
        let rules = self.service.engine().rules().clone();
        let paths = &self.config.data_paths;

        let predictions = feed::load_predictions(Path::new(&paths.predictions), &rules)
            .context("failed to load predictions")?;
        self.service.submit_predictions(&predictions)?;

        let plays = feed::load_plays(Path::new(&paths.plays)).context("failed to load play-by-play")?;
        debug!(plays = plays.len(), "loaded play-by-play");
        let changed_games = self.service.ingest_plays(plays)?;

        let scope = self.config.scope();
        let summary = self.service.grade_all(&scope)?;
        let standings = self.service.get_standings(&scope)?;

        if let Some(out) = &self.config.data_paths.standings_json {
            let json = serde_json::to_string_pretty(&standings)
                .context("failed to serialize standings")?;
            std::fs::write(out, json).with_context(|| format!("failed to write {out}"))?;
            debug!(path = %out, "wrote standings");
        }

        Ok(RunReport {
            predictions_loaded: predictions.len(),
            changed_games,
            summary,
            standings,
        })
    }

    /// Run once if either input file changed since the last run.
    pub async fn poll(&mut self) -> Result<Option<RunReport>> {
        let seen = (
            modified(&self.config.data_paths.plays).await?,
            modified(&self.config.data_paths.predictions).await?,
        );
        if self.last_seen == Some(seen) {
            debug!("inputs unchanged; skipping run");
            return Ok(None);
        }
        let report = self.run_once()?;
        self.last_seen = Some(seen);
        Ok(Some(report))
    }

    /// Poll the inputs every `schedule.poll_interval_secs` until `shutdown`
    /// resolves, calling `on_report` after each run. Returns the number of
    /// runs. A failed run is logged and retried on the next tick.
    pub async fn watch_until<F, R>(&mut self, shutdown: F, mut on_report: R) -> Result<usize>
    where
        F: Future<Output = ()>,
        R: FnMut(&RunReport),
    {
        let secs = self.config.schedule.poll_interval_secs.max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs(secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = secs, "watching for new play-by-play data");
        let mut runs = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match self.poll().await {
                        Ok(Some(report)) => {
                            runs += 1;
                            on_report(&report);
                        }
                        Ok(None) => {}
                        Err(e) => error!("grading run failed: {e:#}"),
                    }
                }
            }
        }
        Ok(runs)
    }

    /// `watch_until` Ctrl+C.
    pub async fn watch<R: FnMut(&RunReport)>(&mut self, on_report: R) -> Result<usize> {
        self.watch_until(
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("failed to listen for Ctrl+C: {e}");
                    std::future::pending::<()>().await;
                }
            },
            on_report,
        )
        .await
    }
}

async fn modified(path: &str) -> Result<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .with_context(|| format!("failed to stat {path}"))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// One-paragraph run summary for the terminal.
pub fn render_summary(report: &RunReport) -> String {
    let s = &report.summary;
    let mut out = format!(
        "{}: {} graded, {} still ungradable, {} team mismatches, {} flagged ambiguous, {} errored\n",
        s.scope, s.graded, s.skipped, s.mismatched, s.ambiguous, s.errored
    );
    let _ = writeln!(
        out,
        "{} predictions loaded, {} games with new data, {} verdicts changed",
        report.predictions_loaded,
        report.changed_games.len(),
        s.changed_prediction_ids.len()
    );
    for issue in &s.issues {
        let _ = writeln!(out, "  - {issue}");
    }
    out
}

/// Fixed-width leaderboard table.
pub fn render_standings(standings: &Standings) -> String {
    let mut out = format!(
        "{:>4}  {:<16} {:>5} {:>6} {:>5} {:>5} {:>7} {:>8} {:>7}\n",
        "rank", "user", "picks", "graded", "first", "any", "points", "return", "roi"
    );
    for e in standings {
        let roi = e
            .roi
            .map(|r| format!("{:+.1}%", r * 100.0))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:>4}  {:<16} {:>5} {:>6} {:>5} {:>5} {:>7.1} {:>+8.2} {:>7}",
            e.rank,
            e.user_id,
            e.picks,
            e.graded,
            e.first_td_wins,
            e.any_td_wins,
            e.points,
            e.total_return,
            roi
        );
    }
    out
}
