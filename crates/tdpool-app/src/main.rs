// Pool grader entry point.
//
// Startup sequence:
// 1. Initialize tracing (stderr, so stdout carries only the report)
// 2. Load config
// 3. Open database and build the grading service
// 4. Without a poll interval: grade once, print the summary and standings
// 5. With a poll interval: grade whenever the inputs change, until Ctrl+C

use tdpool_app::config;
use tdpool_app::runner::{self, RunReport, Runner};

use anyhow::Context;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Pool grader starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: pool={}, season {}, scope {}",
        config.pool.name,
        config.pool.season,
        config.scope()
    );
    let poll_interval = config.schedule.poll_interval_secs;

    // 3. Open database and build the grading service
    let db_path = config.db_path.clone();
    let mut runner = Runner::from_config(config).context("failed to start grading service")?;
    info!("Database opened at {}", db_path);

    if poll_interval == 0 {
        // 4. Grade once
        let report = runner.run_once().context("grading run failed")?;
        print_report(&report);
    } else {
        // 5. Watch the inputs until Ctrl+C
        let runs = runner.watch(print_report).await?;
        info!("Stopped after {} grading runs", runs);
    }

    info!("Pool grader shut down cleanly");
    Ok(())
}

fn print_report(report: &RunReport) {
    print!("{}", runner::render_summary(report));
    println!();
    print!("{}", runner::render_standings(&report.standings));
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tdpool_app=info,tdpool_core=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
