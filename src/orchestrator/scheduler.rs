//! Periodic execution of both cycles.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ScheduleConfig;
use crate::orchestrator::{ForecastContext, run_fetch_cycle, run_verify_cycle};

/// Handles to the two running loops.
///
/// Each loop runs its cycle to completion before waiting for the next tick,
/// so a task never overlaps itself; the two loops run independently.
pub struct Scheduler {
    fetch: JoinHandle<()>,
    verify: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    /// Spawn both loops. The first tick of each fires immediately.
    pub fn spawn(ctx: Arc<ForecastContext>, schedule: &ScheduleConfig) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let fetch = spawn_fetch_loop(ctx.clone(), schedule.fetch_interval, rx.clone());
        let verify = spawn_verify_loop(ctx, schedule.verify_interval, rx);
        Self {
            fetch,
            verify,
            shutdown,
        }
    }

    /// Signal both loops and wait for in-flight cycles to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.fetch.await {
            tracing::warn!(error = %e, "Fetch loop ended abnormally");
        }
        if let Err(e) = self.verify.await {
            tracing::warn!(error = %e, "Verify loop ended abnormally");
        }
        tracing::info!("Scheduler stopped");
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

fn spawn_fetch_loop(
    ctx: Arc<ForecastContext>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = period.as_secs(),
            source = ctx.source.name(),
            "Fetch cycle started"
        );
        let mut timer = ticker(period);
        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = shutdown.changed() => break,
            }

            match run_fetch_cycle(&ctx).await {
                Ok(report) => {
                    tracing::info!(
                        fetched = report.fetched,
                        appended = report.appended,
                        history_len = report.history_len,
                        trained = report.training.as_ref().map_or(0, |t| t.trained()),
                        issue_id = report.forecast.as_ref().map(|f| f.issue_id.as_str()),
                        created = report.created,
                        "Fetch cycle complete"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Fetch cycle failed");
                }
            }
        }
    })
}

fn spawn_verify_loop(
    ctx: Arc<ForecastContext>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = period.as_secs(), "Verify cycle started");
        let mut timer = ticker(period);
        loop {
            tokio::select! {
                _ = timer.tick() => {}
                _ = shutdown.changed() => break,
            }

            match run_verify_cycle(&ctx).await {
                Ok(report) => {
                    if report.resolved > 0 {
                        tracing::info!(
                            resolved = report.resolved,
                            wins = report.wins,
                            losses = report.losses,
                            pending = report.unmatched,
                            "Verify cycle complete"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Verify cycle failed");
                }
            }
        }
    })
}
