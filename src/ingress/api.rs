use crate::ingress::{Event, Ingress, Rejected};
use crate::parameters::ParameterSet;
use crate::pipeline::stats::{PipelineStats, StatsSnapshot};
use crate::schema::{DiscoveredSchema, SchemaRegistry};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Caller account override, the stack account when absent
pub const ACCOUNT_HEADER: &str = "x-pubsub-account";

/// Shared state for the HTTP API
#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<Ingress>,
    pub stats: Arc<PipelineStats>,
    pub schemas: Arc<SchemaRegistry>,
    pub parameters: Arc<ParameterSet>,
    pub bus_name: String,
    pub bus_arn: String,
    pub stream_name: String,
    /// Node name reported by /status
    pub host: String,
    pub max_entries_per_request: usize,
    pub buffer: BufferStatus,
    pub started_at: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferStatus {
    pub max_buffer_bytes: u64,
    pub max_buffer_interval_seconds: u64,
}

// Request and response types follow the bus and delivery-stream wire
// conventions (PascalCase).

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutEventsRequest {
    #[serde(default)]
    pub entries: Vec<PutEventsRequestEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutEventsRequestEntry {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub detail_type: String,
    /// JSON object encoded as a string
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_bus_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutEventsResponse {
    pub failed_entry_count: usize,
    pub entries: Vec<PutEventsResultEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutEventsResultEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PutEventsResultEntry {
    fn ok(id: String) -> Self {
        Self {
            event_id: Some(id),
            ..Self::default()
        }
    }

    fn failed(code: &str, message: String) -> Self {
        Self {
            error_code: Some(code.to_string()),
            error_message: Some(message),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRecordBatchRequest {
    pub records: Vec<RecordEntry>,
    #[serde(default)]
    pub aggregated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordEntry {
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRecordBatchResponse {
    pub failed_put_count: usize,
    pub request_responses: Vec<PutRecordResultEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRecordResultEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_seconds: u64,
    pub host: String,
    pub bus_name: String,
    pub stream_name: String,
    pub buffer: BufferStatus,
    pub stats: StatsSnapshot,
    pub tags: BTreeMap<String, String>,
}

/// Largest direct-put batch, matching the delivery stream API limit
const MAX_RECORDS_PER_REQUEST: usize = 500;

/// POST /events
pub async fn put_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PutEventsRequest>,
) -> Result<Json<PutEventsResponse>, ApiError> {
    if request.entries.is_empty() {
        return Err(ApiError::BadRequest("Entries cannot be empty".to_string()));
    }
    if request.entries.len() > state.max_entries_per_request {
        return Err(ApiError::BadRequest(format!(
            "at most {} entries per request, got {}",
            state.max_entries_per_request,
            request.entries.len()
        )));
    }

    let account = headers
        .get(ACCOUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut entries = Vec::with_capacity(request.entries.len());
    for entry in request.entries {
        entries.push(put_event_entry(&state, entry, account.clone()).await);
    }

    let failed_entry_count = entries.iter().filter(|e| e.error_code.is_some()).count();
    Ok(Json(PutEventsResponse {
        failed_entry_count,
        entries,
    }))
}

async fn put_event_entry(
    state: &AppState,
    entry: PutEventsRequestEntry,
    account: Option<String>,
) -> PutEventsResultEntry {
    if let Some(bus) = &entry.event_bus_name {
        if bus != &state.bus_name && bus != &state.bus_arn {
            return PutEventsResultEntry::failed(
                "UnknownEventBus",
                format!("event bus '{}' does not exist", bus),
            );
        }
    }

    let detail = match entry
        .detail
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
    {
        Some(Ok(detail)) => detail,
        Some(Err(e)) => {
            let rejected = Rejected::Malformed(format!("Detail is not valid JSON: {}", e));
            return PutEventsResultEntry::failed(rejected.error_code(), rejected.to_string());
        }
        None => {
            let rejected = Rejected::Malformed("Detail is required".to_string());
            return PutEventsResultEntry::failed(rejected.error_code(), rejected.to_string());
        }
    };

    let event = Event {
        source: entry.source,
        detail_type: entry.detail_type,
        detail,
        resources: entry.resources,
        account,
    };

    match state.ingress.submit(event).await {
        Ok(accepted) => PutEventsResultEntry::ok(accepted.id.to_string()),
        Err(rejected) => PutEventsResultEntry::failed(rejected.error_code(), rejected.to_string()),
    }
}

/// POST /delivery-stream/records
pub async fn put_records(
    State(state): State<AppState>,
    Json(request): Json<PutRecordBatchRequest>,
) -> Result<Json<PutRecordBatchResponse>, ApiError> {
    if request.records.is_empty() {
        return Err(ApiError::BadRequest("Records cannot be empty".to_string()));
    }
    if request.records.len() > MAX_RECORDS_PER_REQUEST {
        return Err(ApiError::BadRequest(format!(
            "at most {} records per request",
            MAX_RECORDS_PER_REQUEST
        )));
    }

    let mut request_responses = Vec::with_capacity(request.records.len());
    for record in request.records {
        let response = match state
            .ingress
            .put_record(record.data.into_bytes(), request.aggregated)
            .await
        {
            Ok(accepted) => PutRecordResultEntry {
                record_id: Some(accepted.id.to_string()),
                ..PutRecordResultEntry::default()
            },
            Err(rejected) => PutRecordResultEntry {
                error_code: Some(rejected.error_code().to_string()),
                error_message: Some(rejected.to_string()),
                ..PutRecordResultEntry::default()
            },
        };
        request_responses.push(response);
    }

    let failed_put_count = request_responses
        .iter()
        .filter(|r| r.error_code.is_some())
        .count();
    Ok(Json(PutRecordBatchResponse {
        failed_put_count,
        request_responses,
    }))
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        host: state.host.clone(),
        bus_name: state.bus_name.clone(),
        stream_name: state.stream_name.clone(),
        buffer: state.buffer.clone(),
        stats: state.stats.snapshot(),
        tags: state.parameters.tags.clone(),
    })
}

/// GET /parameters
pub async fn get_parameters(State(state): State<AppState>) -> Json<ParameterSet> {
    Json(state.parameters.as_ref().clone())
}

/// GET /schemas
pub async fn get_schemas(State(state): State<AppState>) -> Json<Vec<DiscoveredSchema>> {
    Json(state.schemas.list())
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
