use thiserror::Error;

use crate::summary::LoadSummary;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Invalid input for {destination}: {reason}")]
    InvalidInput { destination: String, reason: String },

    #[error("Configuration error: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Field mapping for {destination} references unknown source field '{field}'")]
    SchemaMismatch { destination: String, field: String },

    #[error("Sink for {destination} is unavailable: {reason}")]
    SinkUnavailable { destination: String, reason: String },

    #[error("Write to {destination} failed: {reason}")]
    SinkWrite { destination: String, reason: String },

    #[error("Failed to read columns of {destination}: {reason}")]
    SchemaRead { destination: String, reason: String },

    #[error("Load into {destination} interrupted after {} chunk(s): {cause}", .completed.chunks)]
    Interrupted {
        destination: String,
        completed: Box<LoadSummary>,
        #[source]
        cause: Box<LoadError>,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required parameter '{field}' for {sink} sink")]
    MissingField { sink: String, field: String },

    #[error("Failed to load configuration from {origin}: {error}")]
    LoadFailed {
        origin: String,
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Failures reported by a [`TableStore`](crate::sink::table::TableStore).
///
/// The table sink decides which [`LoadError`] a rejection maps to, based on the
/// operation it was performing.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed: {reason}")]
    Unavailable { reason: String },

    #[error("statement rejected: {reason}")]
    Rejected { reason: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => StoreError::Unavailable {
                reason: err.to_string(),
            },
            _ => StoreError::Rejected {
                reason: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    InvalidConfig,
    SchemaMismatch,
    SinkUnavailable,
    SinkWrite,
    SchemaRead,
}

pub type Result<T> = std::result::Result<T, LoadError>;

impl LoadError {
    /// The taxonomy bucket of this error. An interrupted load reports the kind
    /// of the error that stopped it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::InvalidInput { .. } => ErrorKind::InvalidInput,
            LoadError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            LoadError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            LoadError::SinkUnavailable { .. } => ErrorKind::SinkUnavailable,
            LoadError::SinkWrite { .. } => ErrorKind::SinkWrite,
            LoadError::SchemaRead { .. } => ErrorKind::SchemaRead,
            LoadError::Interrupted { cause, .. } => cause.kind(),
        }
    }

    /// Errors raised before any network call; nothing was written.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidInput | ErrorKind::InvalidConfig | ErrorKind::SchemaMismatch
        )
    }

    /// Errors that abort an in-progress load.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SinkUnavailable | ErrorKind::SinkWrite | ErrorKind::SchemaRead
        )
    }

    /// Outcomes of the chunks that completed before the load was aborted.
    pub fn partial_summary(&self) -> Option<&LoadSummary> {
        match self {
            LoadError::Interrupted { completed, .. } => Some(completed),
            _ => None,
        }
    }

    pub(crate) fn invalid_input(destination: &str, reason: impl Into<String>) -> Self {
        LoadError::InvalidInput {
            destination: destination.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(destination: &str, reason: impl Into<String>) -> Self {
        LoadError::SinkUnavailable {
            destination: destination.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn write(destination: &str, reason: impl Into<String>) -> Self {
        LoadError::SinkWrite {
            destination: destination.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Invalid {
            message: err.to_string(),
        }
    }
}
