//! Commands that run the pipeline: `run`, `cycle` and `import`.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::history::{MemoryStore, StoreOptions};
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::orchestrator::{
    FetchCycleReport, ForecastContext, Scheduler, VerifyCycleReport, run_fetch_cycle,
    run_fetch_cycle_with, run_verify_cycle,
};
use crate::source::{DrawSource, HttpDrawSource, StaticDrawSource};

/// Open the journaled store and wire a context around `source`.
pub async fn build_context(
    config: &Config,
    source: Arc<dyn DrawSource>,
) -> anyhow::Result<ForecastContext> {
    let options = StoreOptions {
        retention: config.storage.retention,
        ..StoreOptions::default()
    };
    let store = Arc::new(MemoryStore::open_with(&config.storage.data_path, options).await?);
    let notifier: Arc<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Webhook notifications enabled");
            Arc::new(WebhookNotifier::new(url.clone(), config.source.timeout)?)
        }
        None => Arc::new(LogNotifier),
    };
    Ok(ForecastContext::new(
        store,
        source,
        notifier,
        config.engine.clone(),
    ))
}

fn http_source(config: &Config) -> anyhow::Result<Arc<dyn DrawSource>> {
    let url = config.require_source_url()?.clone();
    Ok(Arc::new(HttpDrawSource::new(url, config.source.timeout)?))
}

/// Run both schedulers until Ctrl-C.
pub async fn run_service(config: Config) -> anyhow::Result<()> {
    let ctx = Arc::new(build_context(&config, http_source(&config)?).await?);
    tracing::info!(
        data_path = %config.storage.data_path.display(),
        history_limit = config.engine.history_limit,
        "Starting drawcast"
    );

    let scheduler = Scheduler::spawn(ctx, &config.schedule);
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    scheduler.shutdown().await;
    Ok(())
}

/// One fetch/predict pass and one verify pass against the configured source.
pub async fn run_cycle_command(config: Config) -> anyhow::Result<()> {
    let ctx = build_context(&config, http_source(&config)?).await?;
    let fetch = run_fetch_cycle(&ctx).await?;
    let verify = run_verify_cycle(&ctx).await?;
    print_summary(&fetch, &verify);
    Ok(())
}

/// Feed a draw file through the pipeline.
pub async fn run_import_command(config: Config, file: &Path) -> anyhow::Result<()> {
    let source = Arc::new(StaticDrawSource::from_file(file).await?);
    if source.is_empty().await {
        anyhow::bail!("No valid draws in {}", file.display());
    }
    let ctx = build_context(&config, source.clone()).await?;
    let fetch = run_fetch_cycle_with(&ctx, source.as_ref()).await?;
    let verify = run_verify_cycle(&ctx).await?;
    print_summary(&fetch, &verify);
    Ok(())
}

fn print_summary(fetch: &FetchCycleReport, verify: &VerifyCycleReport) {
    println!(
        "Fetched {} draws ({} new, {} rejected); history now {}",
        fetch.fetched, fetch.appended, fetch.rejected, fetch.history_len
    );
    if let Some(training) = &fetch.training {
        println!(
            "Trained {} tier(s), {} failed",
            training.trained(),
            training.failed()
        );
    }
    match &fetch.forecast {
        Some(record) => println!(
            "Forecast {}: {} ({}) at {:.1}% via {}{}",
            record.issue_id,
            record.predicted_value,
            record.predicted_category.as_str(),
            record.confidence * 100.0,
            record.model_tier,
            if fetch.created { "" } else { " (already stored)" }
        ),
        None => println!("No forecast yet: history is empty"),
    }
    println!(
        "Verified {} forecast(s): {} win, {} loss, {} still pending",
        verify.resolved, verify.wins, verify.losses, verify.unmatched
    );
}
