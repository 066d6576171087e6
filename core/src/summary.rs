use serde::Serialize;

/// A record a sink could not store, with the detail the store reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub record_id: String,
    pub detail: String,
}

/// Result of transferring one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    pub chunk_index: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<RecordFailure>,
}

impl TransferOutcome {
    pub fn success(chunk_index: usize, succeeded: usize) -> Self {
        Self {
            chunk_index,
            succeeded,
            failed: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_partial_failure(&self) -> bool {
        self.failed > 0
    }
}

/// Per-chunk record failures, kept in the load summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub failures: Vec<RecordFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub destination: String,
    pub total_records: usize,
    pub succeeded: usize,
    pub total_failures: usize,
    /// Number of chunks whose outcome was received.
    pub chunks: usize,
    pub chunk_errors: Vec<ChunkFailure>,
}

impl LoadSummary {
    pub fn new(destination: &str, total_records: usize) -> Self {
        Self {
            destination: destination.to_string(),
            total_records,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: TransferOutcome) {
        self.chunks += 1;
        self.succeeded += outcome.succeeded;
        self.total_failures += outcome.failed;
        if !outcome.failures.is_empty() {
            self.chunk_errors.push(ChunkFailure {
                chunk_index: outcome.chunk_index,
                failures: outcome.failures,
            });
        }
    }

    pub fn has_failures(&self) -> bool {
        self.total_failures > 0
    }

    pub fn failed_record_ids(&self) -> impl Iterator<Item = &str> {
        self.chunk_errors
            .iter()
            .flat_map(|c| c.failures.iter().map(|f| f.record_id.as_str()))
    }
}
