use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chunk::Chunk;
use crate::config::SearchIndexSettings;
use crate::errors::{ConfigError, LoadError, Result};
use crate::record::Batch;
use crate::sink::{Sink, SinkKind};
use crate::summary::{RecordFailure, TransferOutcome};

/// Bulk-indexes records into a schema-less document store over its `_bulk`
/// HTTP endpoint.
pub struct SearchIndexSink {
    client: Client,
    endpoint: String,
    id_field: String,
    refresh: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IndexPlan {
    pub index: String,
    /// Id field values carried by the batch. A positional id equal to one of
    /// them would overwrite that document.
    pub explicit_ids: HashSet<String>,
}

impl IndexPlan {
    pub fn new(index: &str, batch: &Batch, id_field: &str) -> Self {
        Self {
            index: index.to_string(),
            explicit_ids: batch
                .iter()
                .filter_map(|record| record.get(id_field).and_then(|v| v.as_text()))
                .collect(),
        }
    }
}

/// One encoded bulk request.
#[derive(Debug, Default)]
pub struct BulkBody {
    pub body: Vec<u8>,
    /// Document id of every record in the body, in body order.
    pub ids: Vec<String>,
    /// Records left out of the body.
    pub rejected: Vec<RecordFailure>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(default)]
    status: u16,
    error: Option<JsonValue>,
}

impl SearchIndexSink {
    pub fn new(settings: SearchIndexSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();

        let mut auth = HeaderValue::from_str(&format!("ApiKey {}", settings.api_key))
            .map_err(|_| invalid("api_key is not a valid header value"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        for (name, value) in &settings.extras.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| invalid(&format!("extras.headers has invalid name '{name}'")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| invalid(&format!("extras.headers value for '{name}' is invalid")))?;
            headers.insert(header_name, header_value);
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(settings.extras.accept_invalid_certs);

        if let Some(secs) = settings.extras.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let client = builder
            .build()
            .map_err(|e| invalid(&format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: settings.url.trim_end_matches('/').to_string(),
            id_field: settings.id_field,
            refresh: settings.extras.refresh,
        })
    }

    /// Checks that the store answers and accepts the configured credentials.
    pub async fn ping(&self, index: &str) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/", self.endpoint))
            .send()
            .await
            .map_err(|e| {
                LoadError::unavailable(index, format!("cannot reach {}: {e}", self.endpoint))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::unavailable(
                index,
                format!("ping to {} returned {status}", self.endpoint),
            ));
        }

        debug!(endpoint = %self.endpoint, "Search index store is reachable");
        Ok(())
    }
}

impl Sink for SearchIndexSink {
    type Plan = IndexPlan;

    fn kind(&self) -> SinkKind {
        SinkKind::SearchIndex
    }

    async fn prepare(&self, destination: &str, batch: &Batch) -> Result<IndexPlan> {
        self.ping(destination).await?;
        Ok(IndexPlan::new(destination, batch, &self.id_field))
    }

    async fn transfer(&self, plan: &IndexPlan, chunk: Chunk<'_>) -> Result<TransferOutcome> {
        let index = plan.index.as_str();
        let BulkBody { body, ids, rejected } = build_bulk_body(plan, &chunk, &self.id_field)
            .map_err(|e| {
                LoadError::write(index, format!("failed to encode chunk {}: {e}", chunk.index))
            })?;

        if ids.is_empty() {
            warn!(index, chunk = chunk.index, rejected = rejected.len(), "No documents to send");
            return Ok(TransferOutcome {
                chunk_index: chunk.index,
                succeeded: 0,
                failed: rejected.len(),
                failures: rejected,
            });
        }

        let mut request = self.client.post(format!("{}/_bulk", self.endpoint));
        if let Some(refresh) = &self.refresh {
            request = request.query(&[("refresh", refresh)]);
        }

        let response = request
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    LoadError::unavailable(index, format!("bulk request failed: {e}"))
                } else {
                    LoadError::write(index, format!("bulk request for chunk {} failed: {e}", chunk.index))
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LoadError::unavailable(
                index,
                format!("credentials rejected with {status}"),
            ));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LoadError::write(
                index,
                format!("bulk request for chunk {} returned {status}: {text}", chunk.index),
            ));
        }

        let parsed: BulkResponse = response.json().await.map_err(|e| {
            LoadError::write(index, format!("unreadable bulk response for chunk {}: {e}", chunk.index))
        })?;

        let mut outcome = collect_outcome(parsed, chunk.index, &ids)
            .map_err(|reason| LoadError::write(index, reason))?;
        outcome.failed += rejected.len();
        outcome.failures.extend(rejected);

        if outcome.is_partial_failure() {
            warn!(
                index,
                chunk = chunk.index,
                failed = outcome.failed,
                succeeded = outcome.succeeded,
                "Some documents were rejected"
            );
        } else {
            info!(index, chunk = chunk.index, documents = outcome.succeeded, "Indexed chunk");
        }
        Ok(outcome)
    }
}

/// Builds the NDJSON body of one bulk request: an action line followed by its
/// document line, for every record in chunk order.
///
/// A record without an id takes its 1-based position in the batch. When that
/// position equals an id carried by another record the record is rejected
/// instead of overwriting the other document.
pub fn build_bulk_body(
    plan: &IndexPlan,
    chunk: &Chunk<'_>,
    id_field: &str,
) -> serde_json::Result<BulkBody> {
    let mut bulk = BulkBody {
        ids: Vec::with_capacity(chunk.len()),
        ..Default::default()
    };

    for (i, record) in chunk.records.iter().enumerate() {
        let id = match record.get(id_field).and_then(|v| v.as_text()) {
            Some(id) => id,
            None => {
                let position = (chunk.offset + i + 1).to_string();
                if plan.explicit_ids.contains(&position) {
                    bulk.rejected.push(RecordFailure {
                        detail: format!(
                            "record has no '{id_field}' and its position collides with an explicit id"
                        ),
                        record_id: position,
                    });
                    continue;
                }
                position
            }
        };

        let action = json!({ "index": { "_index": &plan.index, "_id": &id } });
        serde_json::to_writer(&mut bulk.body, &action)?;
        bulk.body.push(b'\n');
        serde_json::to_writer(&mut bulk.body, record)?;
        bulk.body.push(b'\n');
        bulk.ids.push(id);
    }

    Ok(bulk)
}

fn collect_outcome(
    response: BulkResponse,
    chunk_index: usize,
    ids: &[String],
) -> std::result::Result<TransferOutcome, String> {
    if response.items.len() != ids.len() {
        return Err(format!(
            "bulk response for chunk {chunk_index} has {} items, expected {}",
            response.items.len(),
            ids.len()
        ));
    }
    if !response.errors {
        return Ok(TransferOutcome::success(chunk_index, ids.len()));
    }

    let mut failures = Vec::new();
    for (item, id) in response.items.into_iter().zip(ids) {
        let Some(result) = item.into_values().next() else {
            failures.push(RecordFailure {
                record_id: id.clone(),
                detail: "empty bulk item".to_string(),
            });
            continue;
        };

        if let Some(error) = result.error {
            failures.push(RecordFailure {
                record_id: id.clone(),
                detail: describe_error(&error),
            });
        } else if result.status >= 300 {
            failures.push(RecordFailure {
                record_id: id.clone(),
                detail: format!("status {}", result.status),
            });
        }
    }

    Ok(TransferOutcome {
        chunk_index,
        succeeded: ids.len() - failures.len(),
        failed: failures.len(),
        failures,
    })
}

fn describe_error(error: &JsonValue) -> String {
    let kind = error.get("type").and_then(JsonValue::as_str);
    let reason = error.get("reason").and_then(JsonValue::as_str);
    match (kind, reason) {
        (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
        (Some(kind), None) => kind.to_string(),
        (None, Some(reason)) => reason.to_string(),
        (None, None) => error.to_string(),
    }
}

fn invalid(message: &str) -> LoadError {
    ConfigError::Invalid {
        message: message.to_string(),
    }
    .into()
}
