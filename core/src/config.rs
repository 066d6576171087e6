use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::normalize::{FieldMapping, NormalizeOptions};
use crate::sink::SinkKind;

pub const CONFIG_ENV_VAR: &str = "LOADER_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoaderConfig {
    pub sink: SinkConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
}

/// Connection parameters, tagged by sink type.
///
/// Required parameters are optional here so a missing one can be reported by
/// name from [`SinkConfig::validate`] instead of as a parse error.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    #[serde(alias = "elasticsearch")]
    SearchIndex(SearchIndexOptions),
    #[serde(alias = "postgres", alias = "postgresql")]
    Table(TableOptions),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SearchIndexOptions {
    pub url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default)]
    pub extras: TransportExtras,
}

/// Optional knobs passed through to the HTTP transport.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransportExtras {
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Value of the bulk `refresh` query parameter (`true`, `false`, `wait_for`).
    pub refresh: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TableOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub schema: Option<String>,
    pub max_connections: Option<u32>,
    pub connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TuningConfig {
    pub chunk_size: usize,
    pub workers: usize,
    pub chunk_timeout_ms: u64,
    pub field_mapping: Option<Vec<FieldMapping>>,
    #[serde(flatten)]
    pub normalize: NormalizeOptions,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            workers: 4,
            chunk_timeout_ms: 30000,
            field_mapping: None,
            normalize: NormalizeOptions::default(),
        }
    }
}

fn default_id_field() -> String {
    "id".to_string()
}

/// Validated search-index connection parameters.
#[derive(Debug, Clone)]
pub struct SearchIndexSettings {
    pub url: String,
    pub api_key: String,
    pub id_field: String,
    pub extras: TransportExtras,
}

/// Validated table connection parameters.
#[derive(Debug, Clone)]
pub struct TableSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub schema: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub enum SinkSettings {
    SearchIndex(SearchIndexSettings),
    Table(TableSettings),
}

pub fn load_config(config_path: Option<&str>) -> Result<LoaderConfig, ConfigError> {
    match config_path {
        Some(path) => LoaderConfig::from_file(path),
        None => LoaderConfig::from_env(),
    }
}

impl LoaderConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            origin: path.to_string(),
            error: Box::new(e),
        })?;
        Self::from_yaml(&content).map_err(|e| ConfigError::LoadFailed {
            origin: path.to_string(),
            error: Box::new(e),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let config_str = std::env::var(CONFIG_ENV_VAR).map_err(|e| ConfigError::LoadFailed {
            origin: CONFIG_ENV_VAR.to_string(),
            error: Box::new(e),
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Checks tunables and required connection parameters, returning the
    /// resolved connection settings.
    pub fn validate(&self) -> Result<SinkSettings, ConfigError> {
        self.tuning.validate()?;
        self.sink.validate()
    }
}

impl SinkConfig {
    pub fn kind(&self) -> SinkKind {
        match self {
            SinkConfig::SearchIndex(_) => SinkKind::SearchIndex,
            SinkConfig::Table(_) => SinkKind::Table,
        }
    }

    pub fn validate(&self) -> Result<SinkSettings, ConfigError> {
        let kind = self.kind();
        match self {
            SinkConfig::SearchIndex(opts) => Ok(SinkSettings::SearchIndex(SearchIndexSettings {
                url: require(kind, "url", &opts.url)?,
                api_key: require(kind, "api_key", &opts.api_key)?,
                id_field: opts.id_field.clone(),
                extras: opts.extras.clone(),
            })),
            SinkConfig::Table(opts) => Ok(SinkSettings::Table(TableSettings {
                host: require(kind, "host", &opts.host)?,
                port: opts.port.ok_or_else(|| missing(kind, "port"))?,
                database: require(kind, "database", &opts.database)?,
                user: require(kind, "user", &opts.user)?,
                password: require(kind, "password", &opts.password)?,
                schema: require(kind, "schema", &opts.schema)?,
                max_connections: opts.max_connections.unwrap_or(8),
                connect_timeout: Duration::from_secs(opts.connect_timeout_secs.unwrap_or(30)),
            })),
        }
    }
}

impl TuningConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size must be greater than zero"));
        }
        if self.workers == 0 {
            return Err(invalid("workers must be greater than zero"));
        }
        if self.chunk_timeout_ms == 0 {
            return Err(invalid("chunk_timeout_ms must be greater than zero"));
        }

        if let Some(mapping) = &self.field_mapping {
            if mapping.is_empty() {
                return Err(invalid("field_mapping must not be empty when present"));
            }
            let mut seen = BTreeSet::new();
            for entry in mapping {
                if !seen.insert(entry.destination.as_str()) {
                    return Err(invalid(&format!(
                        "field_mapping maps destination field '{}' more than once",
                        entry.destination
                    )));
                }
            }
        }
        Ok(())
    }
}

fn require(kind: SinkKind, field: &str, value: &Option<String>) -> Result<String, ConfigError> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
        _ => Err(missing(kind, field)),
    }
}

fn missing(kind: SinkKind, field: &str) -> ConfigError {
    ConfigError::MissingField {
        sink: kind.to_string(),
        field: field.to_string(),
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SEARCH_INDEX_CONFIG: &str = r#"
sink:
  type: elasticsearch
  url: https://search.internal:9200
  api_key: c2VjcmV0
  extras:
    request_timeout_secs: 10
    refresh: wait_for
tuning:
  chunk_size: 500
  workers: 2
  chunk_timeout_ms: 5000
  empty_strings_as_absent: false
  field_mapping:
    - destination: name
      source: product_name
"#;

    #[test]
    fn test_parse_search_index_config() {
        let config = LoaderConfig::from_yaml(SEARCH_INDEX_CONFIG).unwrap();
        assert_eq!(config.sink.kind(), SinkKind::SearchIndex);
        assert_eq!(config.tuning.chunk_size, 500);
        assert_eq!(config.tuning.workers, 2);
        assert!(!config.tuning.normalize.empty_strings_as_absent);
        assert_eq!(config.tuning.field_mapping.as_ref().map(Vec::len), Some(1));

        match config.validate().unwrap() {
            SinkSettings::SearchIndex(settings) => {
                assert_eq!(settings.url, "https://search.internal:9200");
                assert_eq!(settings.id_field, "id");
                assert_eq!(settings.extras.request_timeout_secs, Some(10));
                assert_eq!(settings.extras.refresh.as_deref(), Some("wait_for"));
            }
            other => panic!("unexpected settings: {other:?}"),
        }
    }

    #[test]
    fn test_tuning_defaults() {
        let config = LoaderConfig::from_yaml(
            "sink:\n  type: table\n  host: localhost\n  port: 5432\n  database: sales\n  user: loader\n  password: pw\n  schema: public\n",
        )
        .unwrap();

        assert_eq!(config.tuning.chunk_size, 1000);
        assert_eq!(config.tuning.workers, 4);
        assert_eq!(config.tuning.chunk_timeout(), Duration::from_secs(30));
        assert!(config.tuning.normalize.empty_strings_as_absent);
        assert!(matches!(config.validate().unwrap(), SinkSettings::Table(_)));
    }

    #[test]
    fn test_missing_parameter_is_named() {
        let config = LoaderConfig::from_yaml(
            "sink:\n  type: postgresql\n  host: localhost\n  port: 5432\n  database: sales\n  user: loader\n  schema: public\n",
        )
        .unwrap();

        match config.validate().unwrap_err() {
            ConfigError::MissingField { sink, field } => {
                assert_eq!(sink, "table");
                assert_eq!(field, "password");
            }
            other => panic!("unexpected error: {other}"),
        }

        let config =
            LoaderConfig::from_yaml("sink:\n  type: search_index\n  url: \"  \"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("'url'"));
    }

    #[test]
    fn test_invalid_tuning_rejected() {
        let mut config = LoaderConfig::from_yaml(SEARCH_INDEX_CONFIG).unwrap();
        config.tuning.chunk_size = 0;
        assert!(config.validate().unwrap_err().to_string().contains("chunk_size"));

        let mut config = LoaderConfig::from_yaml(SEARCH_INDEX_CONFIG).unwrap();
        config.tuning.field_mapping = Some(vec![
            FieldMapping {
                destination: "name".to_string(),
                source: "title".to_string(),
            },
            FieldMapping {
                destination: "name".to_string(),
                source: "product_name".to_string(),
            },
        ]);
        assert!(config.validate().unwrap_err().to_string().contains("'name'"));
    }

    #[test]
    fn test_unknown_sink_type_fails_to_parse() {
        let err = LoaderConfig::from_yaml("sink:\n  type: mongodb\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SEARCH_INDEX_CONFIG.as_bytes()).unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.tuning.chunk_size, 500);

        let err = load_config(Some("/nonexistent/loader.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/loader.yaml"));
    }
}
