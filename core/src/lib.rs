pub mod chunk;
pub mod config;
pub mod errors;
pub mod loader;
pub mod normalize;
pub mod record;
pub mod sink;
pub mod summary;
pub mod telemetry;

pub use config::{LoaderConfig, TuningConfig, load_config};
pub use errors::{ConfigError, ErrorKind, LoadError, Result};
pub use loader::{Loader, LoaderState};
pub use normalize::{FieldMapping, NormalizeOptions};
pub use record::{Batch, Record, Value};
pub use sink::{Sink, SinkBackend, SinkKind};
pub use summary::{LoadSummary, RecordFailure, TransferOutcome};
