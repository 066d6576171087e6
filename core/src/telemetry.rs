use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::summary::LoadSummary;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "bulk_load_core=info,runner_container=info";

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Logs a finished load, one warning per rejected record.
pub fn report_summary(summary: &LoadSummary) {
    info!(
        destination = %summary.destination,
        records = summary.total_records,
        succeeded = summary.succeeded,
        failed = summary.total_failures,
        chunks = summary.chunks,
        "Load summary"
    );
    for chunk in &summary.chunk_errors {
        for failure in &chunk.failures {
            warn!(
                destination = %summary.destination,
                chunk = chunk.chunk_index,
                record_id = %failure.record_id,
                detail = %failure.detail,
                "Record rejected"
            );
        }
    }
}
