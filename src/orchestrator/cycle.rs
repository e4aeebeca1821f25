//! One pass of each periodic task.

use chrono::Utc;
use serde::Serialize;

use crate::error::{CycleError, Error};
use crate::forecast::{self, TrainingReport};
use crate::history::{ForecastFilter, ForecastRecord, ForecastStore, Order, Resolution};
use crate::orchestrator::ForecastContext;
use crate::source::DrawSource;

/// What a fetch-train-predict pass did.
#[derive(Debug, Clone, Serialize)]
pub struct FetchCycleReport {
    pub fetched: usize,
    pub appended: usize,
    /// Items that failed record validation.
    pub rejected: usize,
    pub history_len: usize,
    /// `None` when nothing new arrived and the registry was already trained.
    pub training: Option<TrainingReport>,
    /// The stored forecast for the next issue. `None` while history is empty.
    pub forecast: Option<ForecastRecord>,
    /// `false` when a forecast for that issue already existed, or none was made.
    pub created: bool,
}

/// What a verification pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyCycleReport {
    pub examined: usize,
    pub resolved: usize,
    pub wins: u64,
    pub losses: u64,
    /// Pending forecasts whose issue has not been observed yet.
    pub unmatched: usize,
}

/// Fetch from the context's source, then train and predict.
pub async fn run_fetch_cycle(ctx: &ForecastContext) -> Result<FetchCycleReport, Error> {
    run_fetch_cycle_with(ctx, ctx.source.as_ref()).await
}

/// Fetch-train-predict against an explicit source.
///
/// Appends complete before training starts, and training completes before
/// the registry is consulted for this pass's forecast.
pub async fn run_fetch_cycle_with(
    ctx: &ForecastContext,
    source: &dyn DrawSource,
) -> Result<FetchCycleReport, Error> {
    let items = source.fetch_latest().await?;
    let fetched = items.len();
    let now = Utc::now();

    let mut appended = 0;
    let mut rejected = 0;
    for item in items {
        match item.into_record(now) {
            Ok(record) => {
                let issue_id = record.issue_id.clone();
                if ctx.history.append_if_absent(record).await? {
                    tracing::debug!(issue_id = %issue_id, "Appended outcome");
                    appended += 1;
                }
            }
            Err(e) => {
                tracing::warn!(source = source.name(), error = %e, "Rejected draw");
                rejected += 1;
            }
        }
    }

    let history = ctx
        .history
        .query(ctx.engine.history_limit, Order::OldestFirst)
        .await?;
    let history_len = history.len();
    let registry = ctx.registry.clone().lock_owned().await;

    let (training, draft) = tokio::task::spawn_blocking(move || {
        let mut registry = registry;
        let training = if appended > 0 || registry.needs_initial_training() {
            let values: Vec<u8> = history.iter().map(|r| r.value).collect();
            Some(registry.train(&values))
        } else {
            None
        };
        let draft = forecast::forecast(&registry, &history, &mut rand::thread_rng());
        (training, draft)
    })
    .await
    .map_err(|e| CycleError::Worker(e.to_string()))?;

    let Some(draft) = draft else {
        tracing::info!("History is empty, no forecast yet");
        return Ok(FetchCycleReport {
            fetched,
            appended,
            rejected,
            history_len,
            training,
            forecast: None,
            created: false,
        });
    };

    let record = draft.into_record(Utc::now());
    let issue_id = record.issue_id.clone();
    let created = ctx.forecasts.create_if_absent(record.clone()).await?;
    let forecast = if created {
        tracing::info!(
            issue_id = %record.issue_id,
            predicted = record.predicted_value,
            confidence = record.confidence,
            source = %record.model_tier,
            "Forecast stored"
        );
        if let Err(e) = ctx.notifier.forecast_created(&record).await {
            tracing::warn!(issue_id = %record.issue_id, error = %e, "Notification failed");
        }
        record
    } else {
        // The first forecast for an issue is the one that gets judged.
        ctx.forecasts.get(&issue_id).await?.unwrap_or(record)
    };

    Ok(FetchCycleReport {
        fetched,
        appended,
        rejected,
        history_len,
        training,
        forecast: Some(forecast),
        created,
    })
}

/// Resolve pending forecasts whose issue has been observed.
pub async fn run_verify_cycle(ctx: &ForecastContext) -> Result<VerifyCycleReport, Error> {
    let pending = ctx
        .forecasts
        .query(ForecastFilter::Pending, ctx.engine.verify_batch)
        .await?;

    let mut report = VerifyCycleReport {
        examined: pending.len(),
        ..VerifyCycleReport::default()
    };

    for mut record in pending {
        let Some(observed) = ctx.history.find_by_id(&record.issue_id).await? else {
            report.unmatched += 1;
            continue;
        };
        let resolution = Resolution::judge(record.predicted_value, &observed);
        let Some(stats) = ctx
            .forecasts
            .resolve_and_count(&record.issue_id, resolution)
            .await?
        else {
            // Resolved by an overlapping pass.
            continue;
        };

        let (wins, losses) = resolution.tally();
        report.resolved += 1;
        report.wins += wins;
        report.losses += losses;

        record.resolve(&resolution, Utc::now());
        tracing::info!(
            issue_id = %record.issue_id,
            predicted = record.predicted_value,
            actual = observed.value,
            outcome = record.outcome.as_str(),
            "Forecast resolved"
        );
        if let Err(e) = ctx.notifier.forecast_resolved(&record, &stats).await {
            tracing::warn!(issue_id = %record.issue_id, error = %e, "Notification failed");
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::config::EngineConfig;
    use crate::error::{DatabaseError, FetchError, NotifyError};
    use crate::history::{
        HistoryStore, LedgerStore, MemoryStore, Outcome, OutcomeRecord, SessionStat, StatsStore,
    };
    use crate::model::FitConfig;
    use crate::notify::Notifier;
    use crate::source::{DrawItem, StaticDrawSource};

    /// Counts calls and always fails.
    #[derive(Default)]
    struct FailingNotifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn forecast_created(&self, _: &ForecastRecord) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError::Rejected { status: 500 })
        }

        async fn forecast_resolved(
            &self,
            _: &ForecastRecord,
            _: &SessionStat,
        ) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError::Rejected { status: 500 })
        }
    }

    /// Delegates to a `MemoryStore`, failing the first `failures` resolves.
    struct FlakyLedger {
        inner: Arc<MemoryStore>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl ForecastStore for FlakyLedger {
        async fn create_if_absent(&self, record: ForecastRecord) -> Result<bool, DatabaseError> {
            self.inner.create_if_absent(record).await
        }

        async fn query(
            &self,
            filter: ForecastFilter,
            limit: usize,
        ) -> Result<Vec<ForecastRecord>, DatabaseError> {
            ForecastStore::query(self.inner.as_ref(), filter, limit).await
        }

        async fn get(&self, issue_id: &str) -> Result<Option<ForecastRecord>, DatabaseError> {
            self.inner.get(issue_id).await
        }

        async fn update_once(
            &self,
            issue_id: &str,
            resolution: Resolution,
        ) -> Result<bool, DatabaseError> {
            self.inner.update_once(issue_id, resolution).await
        }
    }

    #[async_trait]
    impl StatsStore for FlakyLedger {
        async fn increment(&self, wins: u64, losses: u64) -> Result<SessionStat, DatabaseError> {
            self.inner.increment(wins, losses).await
        }

        async fn current(&self) -> Result<SessionStat, DatabaseError> {
            self.inner.current().await
        }
    }

    #[async_trait]
    impl LedgerStore for FlakyLedger {
        async fn resolve_and_count(
            &self,
            issue_id: &str,
            resolution: Resolution,
        ) -> Result<Option<SessionStat>, DatabaseError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(DatabaseError::Io(std::io::Error::other("disk full")));
            }
            self.inner.resolve_and_count(issue_id, resolution).await
        }
    }

    struct DownSource;

    #[async_trait]
    impl DrawSource for DownSource {
        fn name(&self) -> &str {
            "down"
        }

        async fn fetch_latest(&self) -> Result<Vec<DrawItem>, FetchError> {
            Err(FetchError::Io(std::io::Error::other("connection refused")))
        }
    }

    fn engine() -> EngineConfig {
        EngineConfig {
            history_limit: 1000,
            verify_batch: 500,
            fit: FitConfig {
                epochs: 1,
                ..FitConfig::default()
            },
        }
    }

    fn draws(count: usize) -> Vec<DrawItem> {
        (1..=count)
            .map(|i| DrawItem::new(format!("20240101{:03}", i), ((i * 7) % 10) as u8))
            .collect()
    }

    fn context(
        items: Vec<DrawItem>,
    ) -> (ForecastContext, Arc<MemoryStore>, Arc<StaticDrawSource>, Arc<FailingNotifier>) {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(StaticDrawSource::new("test", items));
        let notifier = Arc::new(FailingNotifier::default());
        let ctx = ForecastContext::new(store.clone(), source.clone(), notifier.clone(), engine());
        (ctx, store, source, notifier)
    }

    #[tokio::test]
    async fn test_fetch_cycle_appends_and_forecasts_next_issue() {
        let (ctx, store, _, _) = context(draws(12));
        let report = run_fetch_cycle(&ctx).await.unwrap();
        assert_eq!(report.fetched, 12);
        assert_eq!(report.appended, 12);
        assert!(report.created);
        assert_eq!(report.forecast.unwrap().issue_id, "20240101013");
        assert!(report.training.is_some());
        let stored = store.find_by_id("20240101012").await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_fetch_cycle_skips_training_without_new_data() {
        let (ctx, _, _, _) = context(draws(12));
        run_fetch_cycle(&ctx).await.unwrap();
        let second = run_fetch_cycle(&ctx).await.unwrap();
        assert_eq!(second.appended, 0);
        assert!(second.training.is_none());
        assert!(!second.created);
    }

    #[tokio::test]
    async fn test_first_cycle_trains_even_without_new_data() {
        let (ctx, store, _, _) = context(vec![]);
        for item in draws(12) {
            store
                .append_if_absent(item.into_record(Utc::now()).unwrap())
                .await
                .unwrap();
        }
        let report = run_fetch_cycle(&ctx).await.unwrap();
        assert_eq!(report.appended, 0);
        assert_eq!(report.training.map(|t| t.history_len), Some(12));
    }

    #[tokio::test]
    async fn test_fetch_error_changes_nothing() {
        let (ctx, store, _, _) = context(vec![]);
        let err = run_fetch_cycle_with(&ctx, &DownSource).await.unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
        let history = HistoryStore::query(store.as_ref(), 10, Order::NewestFirst)
            .await
            .unwrap();
        assert!(history.is_empty());
        let forecasts = ForecastStore::query(store.as_ref(), ForecastFilter::All, 10)
            .await
            .unwrap();
        assert!(forecasts.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_items_are_rejected_not_fatal() {
        let mut items = draws(3);
        items.push(DrawItem::new("", 4));
        items.push(DrawItem::new("20240101099", 12));
        let (ctx, _, _, _) = context(items);
        let report = run_fetch_cycle(&ctx).await.unwrap();
        assert_eq!(report.appended, 3);
        assert_eq!(report.rejected, 2);
    }

    #[tokio::test]
    async fn test_empty_history_makes_no_forecast() {
        let (ctx, store, _, _) = context(vec![]);
        let report = run_fetch_cycle(&ctx).await.unwrap();
        assert_eq!(report.forecast, None);
        assert!(!report.created);
        let forecasts = ForecastStore::query(store.as_ref(), ForecastFilter::All, 10)
            .await
            .unwrap();
        assert!(forecasts.is_empty());
    }

    #[tokio::test]
    async fn test_repeat_fetch_reports_stored_forecast() {
        let (ctx, store, _, _) = context(draws(12));
        let first = run_fetch_cycle(&ctx).await.unwrap();
        assert!(first.created);
        for _ in 0..5 {
            let again = run_fetch_cycle(&ctx).await.unwrap();
            assert!(!again.created);
            assert_eq!(again.forecast, first.forecast);
        }
        assert_eq!(store.get("20240101013").await.unwrap(), first.forecast);
    }

    #[tokio::test]
    async fn test_verify_resolves_once_and_counts() {
        let (ctx, store, source, notifier) = context(draws(12));
        let fetch = run_fetch_cycle(&ctx).await.unwrap();
        let predicted = fetch.forecast.unwrap().predicted_value;

        let nothing = run_verify_cycle(&ctx).await.unwrap();
        assert_eq!(nothing.unmatched, 1);
        assert_eq!(nothing.resolved, 0);

        source.push(DrawItem::new("20240101013", predicted)).await;
        run_fetch_cycle(&ctx).await.unwrap();

        let first = run_verify_cycle(&ctx).await.unwrap();
        assert_eq!(first.resolved, 1);
        assert_eq!(first.wins, 1);
        let second = run_verify_cycle(&ctx).await.unwrap();
        assert_eq!(second.resolved, 0);

        let stats = store.current().await.unwrap();
        assert_eq!((stats.wins, stats.losses, stats.total), (1, 0, 1));

        let resolved = ForecastStore::query(store.as_ref(), ForecastFilter::Resolved, 10)
            .await
            .unwrap();
        assert_eq!(resolved[0].outcome, Outcome::Win);
        // Failing notifications were attempted but did not abort either cycle.
        assert!(notifier.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_verify_records_loss() {
        let (ctx, store, _, _) = context(draws(3));
        let forecast = run_fetch_cycle(&ctx).await.unwrap().forecast.unwrap();
        let actual = (forecast.predicted_value + 1) % 10;
        store
            .append_if_absent(OutcomeRecord::new(&forecast.issue_id, actual, Utc::now()).unwrap())
            .await
            .unwrap();

        let report = run_verify_cycle(&ctx).await.unwrap();
        assert_eq!((report.wins, report.losses), (0, 1));
        let stats = store.current().await.unwrap();
        assert_eq!(stats.total, stats.wins + stats.losses);
    }

    #[tokio::test]
    async fn test_failed_resolve_is_retried_and_counted_once() {
        let (mut ctx, store, source, _) = context(draws(12));
        ctx.forecasts = Arc::new(FlakyLedger {
            inner: store.clone(),
            failures: AtomicUsize::new(1),
        });
        let forecast = run_fetch_cycle(&ctx).await.unwrap().forecast.unwrap();
        source
            .push(DrawItem::new(forecast.issue_id.clone(), forecast.predicted_value))
            .await;
        run_fetch_cycle(&ctx).await.unwrap();

        let err = run_verify_cycle(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        let still = store.get(&forecast.issue_id).await.unwrap().unwrap();
        assert!(still.is_pending());
        assert_eq!(store.current().await.unwrap().total, 0);

        let retry = run_verify_cycle(&ctx).await.unwrap();
        assert_eq!(retry.resolved, 1);
        let resolved = ForecastStore::query(store.as_ref(), ForecastFilter::Resolved, 10)
            .await
            .unwrap();
        let stats = store.current().await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(stats.total, resolved.len() as u64);
    }
}
