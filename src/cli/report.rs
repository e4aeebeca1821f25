//! Read-only reporting commands: `stats` and `forecasts`.

use serde::Serialize;

use crate::config::Config;
use crate::history::analytics::{AccuracyReport, accuracy_report};
use crate::history::{
    ForecastFilter, ForecastRecord, ForecastStore, MemoryStore, SessionStat, StatsStore,
};

/// Forecasts considered when computing accuracy.
const STATS_WINDOW: usize = 10_000;

#[derive(Debug, Serialize)]
struct StatsOutput {
    session: SessionStat,
    accuracy: AccuracyReport,
}

/// Print session totals and accuracy.
pub async fn run_stats_command(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = MemoryStore::open(&config.storage.data_path).await?;
    let output = StatsOutput {
        session: store.current().await?,
        accuracy: accuracy_report(&store, STATS_WINDOW).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{}", render_stats(&output.session, &output.accuracy));
    }
    Ok(())
}

fn render_stats(session: &SessionStat, accuracy: &AccuracyReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Session:    {} total, {} wins, {} losses ({:.2}%)\n",
        session.total,
        session.wins,
        session.losses,
        session.win_rate() * 100.0
    ));
    out.push_str(&format!(
        "Accuracy:   {:.2}% value, {:.2}% category over {} resolved ({} pending)\n",
        accuracy.accuracy * 100.0,
        accuracy.category_accuracy * 100.0,
        accuracy.resolved,
        accuracy.pending
    ));
    out.push_str(&format!("Win streak: {}\n", accuracy.win_streak));
    if !accuracy.by_source.is_empty() {
        out.push_str("By source:\n");
        for (source, stats) in &accuracy.by_source {
            out.push_str(&format!(
                "  {:<14} {:>5} resolved  {:>6.2}%\n",
                source,
                stats.resolved,
                stats.accuracy * 100.0
            ));
        }
    }
    out
}

/// Print stored forecasts, newest first.
pub async fn run_forecasts_command(
    config: &Config,
    pending: bool,
    limit: usize,
) -> anyhow::Result<()> {
    let store = MemoryStore::open(&config.storage.data_path).await?;
    let filter = if pending {
        ForecastFilter::Pending
    } else {
        ForecastFilter::All
    };
    let records = ForecastStore::query(&store, filter, limit).await?;
    if records.is_empty() {
        println!("No forecasts stored.");
        return Ok(());
    }
    println!(
        "{:<16} {:<10} {:>6}  {:<14} {:<8} ACTUAL",
        "ISSUE", "PREDICTED", "CONF", "SOURCE", "OUTCOME"
    );
    for record in &records {
        println!("{}", render_row(record));
    }
    Ok(())
}

fn render_row(record: &ForecastRecord) -> String {
    let actual = match (record.actual_value, record.actual_category) {
        (Some(value), Some(category)) => format!("{} ({})", value, category.as_str()),
        _ => "--".to_string(),
    };
    format!(
        "{:<16} {:<10} {:>5.1}%  {:<14} {:<8} {}",
        record.issue_id,
        format!(
            "{} ({})",
            record.predicted_value,
            record.predicted_category.as_str()
        ),
        record.confidence * 100.0,
        record.model_tier,
        record.outcome.as_str(),
        actual
    )
}
