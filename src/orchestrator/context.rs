//! Explicit state shared by both cycles.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::forecast::ModelRegistry;
use crate::history::{HistoryStore, LedgerStore};
use crate::notify::Notifier;
use crate::source::DrawSource;

/// Everything a cycle needs, built once at startup (or per test).
///
/// The registry mutex serializes training and selection across overlapping
/// fetch cycles. The stores provide their own atomic per-record writes, and
/// the ledger resolves a forecast and counts it in one write.
#[derive(Clone)]
pub struct ForecastContext {
    pub history: Arc<dyn HistoryStore>,
    pub forecasts: Arc<dyn LedgerStore>,
    pub source: Arc<dyn DrawSource>,
    pub notifier: Arc<dyn Notifier>,
    pub registry: Arc<Mutex<ModelRegistry>>,
    pub engine: EngineConfig,
}

impl ForecastContext {
    /// Context over one store implementing every store contract.
    pub fn new<S>(
        store: Arc<S>,
        source: Arc<dyn DrawSource>,
        notifier: Arc<dyn Notifier>,
        engine: EngineConfig,
    ) -> Self
    where
        S: HistoryStore + LedgerStore + 'static,
    {
        Self {
            history: store.clone(),
            forecasts: store,
            source,
            notifier,
            registry: Arc::new(Mutex::new(ModelRegistry::new(engine.fit.clone()))),
            engine,
        }
    }

    /// Same stores, registry and notifier, different draw source.
    pub fn with_source(&self, source: Arc<dyn DrawSource>) -> Self {
        Self {
            source,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for ForecastContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastContext")
            .field("source", &self.source.name())
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
