use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use crate::chunk::{Chunk, Chunker};
use crate::config::{LoaderConfig, TuningConfig};
use crate::errors::{LoadError, Result};
use crate::normalize::{normalize, project};
use crate::record::Batch;
use crate::sink::{Sink, SinkBackend};
use crate::summary::{LoadSummary, TransferOutcome};

/// Lifecycle of a loader. Construction validates the configuration and builds
/// the sink in one step, so a loader is `Ready` as soon as it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Ready,
    /// At least one `save` is in progress.
    Loading,
    Closed,
}

/// The loader orchestrates the data flow from an in-memory batch into a sink:
/// normalize, project, chunk and transfer.
pub struct Loader<S = SinkBackend> {
    sink: S,
    tuning: TuningConfig,
    chunker: Chunker,
    active_loads: AtomicUsize,
    closed: AtomicBool,
}

impl Loader<SinkBackend> {
    /// Validates `config` and builds the configured sink. No connection is made
    /// until the first `save`.
    pub fn from_config(config: LoaderConfig) -> Result<Self> {
        let settings = config.validate()?;
        let kind = config.sink.kind();
        let loader = Self::with_sink(SinkBackend::from_settings(settings)?, config.tuning)?;

        info!(sink = %kind, "Loader ready");
        Ok(loader)
    }
}

impl<S: Sink> Loader<S> {
    /// A loader around an already built sink.
    pub fn with_sink(sink: S, tuning: TuningConfig) -> Result<Self> {
        tuning.validate()?;
        let chunker = Chunker::new(tuning.chunk_size)?;
        Ok(Self {
            sink,
            tuning,
            chunker,
            active_loads: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> LoaderState {
        if self.closed.load(Ordering::SeqCst) {
            LoaderState::Closed
        } else if self.active_loads.load(Ordering::SeqCst) > 0 {
            LoaderState::Loading
        } else {
            LoaderState::Ready
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn tuning(&self) -> &TuningConfig {
        &self.tuning
    }

    /// Stops accepting new loads. Loads already running finish normally.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        info!("Loader closed");
    }

    /// Loads `batch` into `destination`.
    ///
    /// Precondition failures (empty batch, bad mapping) are returned before the
    /// sink is contacted. A fatal sink error stops chunk submission, waits for
    /// transfers already running and returns [`LoadError::Interrupted`] carrying
    /// the outcomes of the chunks that completed. Record-level failures never
    /// abort the load; they are listed in the returned summary.
    pub async fn save(&self, batch: &Batch, destination: &str) -> Result<LoadSummary> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LoadError::invalid_input(destination, "loader is closed"));
        }
        let sink = &self.sink;
        if batch.is_empty() {
            return Err(LoadError::invalid_input(destination, "batch is empty"));
        }

        let _active = ActiveLoad::enter(&self.active_loads);

        let normalized = normalize(batch, &self.tuning.normalize);
        let prepared = match &self.tuning.field_mapping {
            Some(mapping) => project(&normalized, mapping, destination)?,
            None => normalized,
        };

        let plan = sink.prepare(destination, &prepared).await?;

        info!(
            destination,
            sink = %sink.kind(),
            records = prepared.len(),
            chunk_size = self.chunker.chunk_size(),
            workers = self.tuning.workers,
            "Starting load"
        );

        let mut summary = LoadSummary::new(destination, prepared.len());
        let mut pending = self.chunker.split(&prepared);
        let mut in_flight = FuturesUnordered::new();
        let mut fatal: Option<LoadError> = None;

        loop {
            while fatal.is_none() && in_flight.len() < self.tuning.workers {
                match pending.next() {
                    Some(chunk) => in_flight.push(self.transfer(sink, &plan, destination, chunk)),
                    None => break,
                }
            }

            match in_flight.next().await {
                Some(Ok(outcome)) => summary.record(outcome),
                Some(Err(err)) => {
                    if fatal.is_none() {
                        warn!(destination, error = %err, "Chunk failed, cancelling remaining chunks");
                        fatal = Some(err);
                    } else {
                        debug!(destination, error = %err, "Further chunk failure while draining");
                    }
                }
                None => break,
            }
        }

        if let Some(cause) = fatal {
            return Err(LoadError::Interrupted {
                destination: destination.to_string(),
                completed: Box::new(summary),
                cause: Box::new(cause),
            });
        }

        info!(
            destination,
            records = summary.total_records,
            succeeded = summary.succeeded,
            failed = summary.total_failures,
            chunks = summary.chunks,
            "Load finished"
        );
        Ok(summary)
    }

    async fn transfer(
        &self,
        sink: &S,
        plan: &S::Plan,
        destination: &str,
        chunk: Chunk<'_>,
    ) -> Result<TransferOutcome> {
        let index = chunk.index;
        let timeout = self.tuning.chunk_timeout();
        match tokio::time::timeout(timeout, sink.transfer(plan, chunk)).await {
            Ok(result) => result,
            Err(_) => Err(LoadError::write(
                destination,
                format!("chunk {index} timed out after {}ms", timeout.as_millis()),
            )),
        }
    }
}

/// Counts a running `save` for as long as it is alive, including when the
/// load returns early with an error.
struct ActiveLoad<'a>(&'a AtomicUsize);

impl<'a> ActiveLoad<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveLoad<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
