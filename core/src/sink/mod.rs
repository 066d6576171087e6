pub mod memory;
pub mod postgres;
pub mod schema;
pub mod search_index;
pub mod table;

use std::fmt;
use std::future::Future;

use crate::chunk::Chunk;
use crate::config::SinkSettings;
use crate::errors::{LoadError, Result};
use crate::record::Batch;
use crate::summary::TransferOutcome;

use self::postgres::PostgresStore;
use self::search_index::{IndexPlan, SearchIndexSink};
use self::table::{InsertPlan, TableSink};

/// The `Sink` trait defines the contract for any bulk-load destination.
///
/// A load calls [`Sink::prepare`] once, then [`Sink::transfer`] for every chunk,
/// possibly concurrently. Implementations share their client handle across
/// those transfers.
pub trait Sink: Send + Sync {
    /// Per-load state computed by `prepare` and shared by every transfer.
    type Plan: Send + Sync;

    fn kind(&self) -> SinkKind;

    /// Runs before any chunk is sent. Connectivity problems surface here so a
    /// load aborts before writing anything.
    fn prepare(
        &self,
        destination: &str,
        batch: &Batch,
    ) -> impl Future<Output = Result<Self::Plan>> + Send;

    fn transfer(
        &self,
        plan: &Self::Plan,
        chunk: Chunk<'_>,
    ) -> impl Future<Output = Result<TransferOutcome>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    SearchIndex,
    Table,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::SearchIndex => f.write_str("search_index"),
            SinkKind::Table => f.write_str("table"),
        }
    }
}

/// The concrete sinks a loader can be configured with.
pub enum SinkBackend {
    SearchIndex(SearchIndexSink),
    Table(TableSink<PostgresStore>),
}

pub enum BackendPlan {
    SearchIndex(IndexPlan),
    Table(InsertPlan),
}

impl BackendPlan {
    fn destination(&self) -> String {
        match self {
            BackendPlan::SearchIndex(plan) => plan.index.clone(),
            BackendPlan::Table(plan) => plan.table.to_string(),
        }
    }
}

impl SinkBackend {
    pub fn from_settings(settings: SinkSettings) -> Result<Self> {
        match settings {
            SinkSettings::SearchIndex(settings) => {
                Ok(SinkBackend::SearchIndex(SearchIndexSink::new(settings)?))
            }
            SinkSettings::Table(settings) => {
                let store = PostgresStore::connect_lazy(&settings);
                Ok(SinkBackend::Table(TableSink::new(store, settings.schema)))
            }
        }
    }
}

impl Sink for SinkBackend {
    type Plan = BackendPlan;

    fn kind(&self) -> SinkKind {
        match self {
            SinkBackend::SearchIndex(_) => SinkKind::SearchIndex,
            SinkBackend::Table(_) => SinkKind::Table,
        }
    }

    async fn prepare(&self, destination: &str, batch: &Batch) -> Result<BackendPlan> {
        match self {
            SinkBackend::SearchIndex(sink) => sink
                .prepare(destination, batch)
                .await
                .map(BackendPlan::SearchIndex),
            SinkBackend::Table(sink) => sink
                .prepare(destination, batch)
                .await
                .map(BackendPlan::Table),
        }
    }

    async fn transfer(&self, plan: &BackendPlan, chunk: Chunk<'_>) -> Result<TransferOutcome> {
        match (self, plan) {
            (SinkBackend::SearchIndex(sink), BackendPlan::SearchIndex(plan)) => {
                sink.transfer(plan, chunk).await
            }
            (SinkBackend::Table(sink), BackendPlan::Table(plan)) => sink.transfer(plan, chunk).await,
            _ => Err(LoadError::invalid_input(
                &plan.destination(),
                format!("plan was not prepared by the {} sink", self.kind()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;

    #[test]
    fn test_sink_kind_names_match_config_tags() {
        for (tag, kind) in [
            ("search_index", SinkKind::SearchIndex),
            ("elasticsearch", SinkKind::SearchIndex),
            ("table", SinkKind::Table),
            ("postgres", SinkKind::Table),
            ("postgresql", SinkKind::Table),
        ] {
            let config = LoaderConfig::from_yaml(&format!("sink:\n  type: {tag}\n")).unwrap();
            assert_eq!(config.sink.kind(), kind);
        }
        assert_eq!(SinkKind::SearchIndex.to_string(), "search_index");
        assert_eq!(SinkKind::Table.to_string(), "table");
    }
}
