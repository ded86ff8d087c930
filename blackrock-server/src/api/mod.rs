//! HTTP API endpoints

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use blackrock_core::search::Hit;
use blackrock_core::{
    AggregateRequest, Aggregation, BlackrockError, DocRef, Envelope, IndexStats, Query,
    SearchIndex, SearchResult, TimeWindow,
};
use bytes::Bytes;
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Application state
pub type AppState = Arc<SearchIndex>;

/// Buffer between the blocking fetch scan and the response body
const FETCH_PIPE_BYTES: usize = 64 * 1024;

/// Envelopes handed to one blocking ingest task by `/push/stream`
const PUSH_BATCH_LINES: usize = 512;

/// Create the API router
pub fn create_router(index: Arc<SearchIndex>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        // Ingest
        .route("/push", post(push))
        .route("/push/stream", post(push_stream))
        // Query
        .route("/search", post(search))
        .route("/fetch", post(fetch))
        .route("/aggregate", post(aggregate))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(index)
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: Query,
    #[serde(default)]
    pub from_sec: Option<i64>,
    #[serde(default)]
    pub to_sec: Option<i64>,
    #[serde(default = "default_size")]
    pub size: usize,
}

fn default_size() -> usize {
    blackrock_core::search::DEFAULT_SEARCH_SIZE
}

#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub query: Query,
    #[serde(default)]
    pub from_sec: Option<i64>,
    #[serde(default)]
    pub to_sec: Option<i64>,
    /// 0 streams every match
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct AggregateBody {
    pub query: Query,
    #[serde(default)]
    pub from_sec: Option<i64>,
    #[serde(default)]
    pub to_sec: Option<i64>,
    #[serde(flatten)]
    pub request: AggregateRequest,
}

#[derive(Debug, Default, Serialize)]
pub struct PushStreamResponse {
    pub accepted: usize,
    pub rejected: usize,
    /// `line: error` for every rejected envelope
    pub errors: Vec<String>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Index(#[from] BlackrockError),

    #[error("worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("failed to read request body: {0}")]
    Body(std::io::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Index(e)
                if e.is_validation()
                    || e.is_query()
                    || matches!(e, BlackrockError::Decode(_) | BlackrockError::Config(_)) =>
            {
                StatusCode::BAD_REQUEST
            }
            ApiError::Body(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

/// Decode a JSON body, reporting unknown query node types as such
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        let msg = e.to_string();
        let err = if msg.contains("unknown variant") {
            BlackrockError::UnknownType(msg)
        } else {
            BlackrockError::Decode(msg)
        };
        ApiError::Index(err)
    })
}

/// Run index work off the async runtime
async fn blocking<T, F>(index: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&SearchIndex) -> blackrock_core::Result<T> + Send + 'static,
{
    let index = index.clone();
    Ok(tokio::task::spawn_blocking(move || f(&index)).await??)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: blackrock_core::VERSION.to_string(),
    })
}

async fn stats(State(index): State<AppState>) -> Result<Json<IndexStats>, ApiError> {
    Ok(Json(blocking(&index, |index| index.stats()).await?))
}

async fn push(State(index): State<AppState>, body: Bytes) -> Result<Json<DocRef>, ApiError> {
    let envelope: Envelope = parse_body(&body)?;
    Ok(Json(blocking(&index, move |index| index.ingest(envelope)).await?))
}

/// Newline-delimited envelopes, ingested in batches while the body arrives
///
/// Bad lines are reported and skipped. The response is sent once the client
/// closes the stream.
async fn push_stream(
    State(index): State<AppState>,
    body: Body,
) -> Result<Json<PushStreamResponse>, ApiError> {
    let reader = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));
    tokio::pin!(reader);

    let mut response = PushStreamResponse::default();
    let mut batch = Vec::with_capacity(PUSH_BATCH_LINES);
    let mut line_no = 0;
    loop {
        let mut line = Vec::new();
        let read = reader.read_until(b'\n', &mut line).await.map_err(ApiError::Body)?;
        if read == 0 {
            break;
        }
        line_no += 1;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        batch.push((line_no, line));
        if batch.len() >= PUSH_BATCH_LINES {
            response = ingest_lines(&index, std::mem::take(&mut batch), response).await?;
        }
    }
    if !batch.is_empty() {
        response = ingest_lines(&index, batch, response).await?;
    }

    debug!("push stream: {} accepted, {} rejected", response.accepted, response.rejected);
    Ok(Json(response))
}

async fn ingest_lines(
    index: &AppState,
    batch: Vec<(usize, Vec<u8>)>,
    mut response: PushStreamResponse,
) -> Result<PushStreamResponse, ApiError> {
    blocking(index, move |index| {
        for (n, line) in batch {
            let result = serde_json::from_slice::<Envelope>(&line)
                .map_err(|e| BlackrockError::Decode(e.to_string()))
                .and_then(|envelope| index.ingest(envelope));
            match result {
                Ok(_) => response.accepted += 1,
                Err(e) if e.is_validation() || matches!(e, BlackrockError::Decode(_)) => {
                    response.rejected += 1;
                    response.errors.push(format!("{}: {}", n, e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(response)
    })
    .await
}

async fn search(State(index): State<AppState>, body: Bytes) -> Result<Json<SearchResult>, ApiError> {
    let request: SearchRequest = parse_body(&body)?;
    request.query.validate()?;
    let window = TimeWindow::resolve(request.from_sec, request.to_sec);
    debug!("search {} in {:?}", request.query, window);

    let result = blocking(&index, move |index| {
        index.search(&request.query, &window, request.size)
    })
    .await?;
    Ok(Json(result))
}

/// Streams matches as NDJSON; a client disconnect stops the scan
///
/// A failure after the response has started is sent as a final
/// `{"error": ...}` line.
async fn fetch(State(index): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: FetchRequest = parse_body(&body)?;
    request.query.validate()?;
    let window = TimeWindow::resolve(request.from_sec, request.to_sec);

    let (mut writer, reader) = tokio::io::duplex(FETCH_PIPE_BYTES);
    let runtime = tokio::runtime::Handle::current();
    let index = index.clone();

    tokio::task::spawn_blocking(move || {
        let result = index.fetch(&request.query, &window, request.limit, |hit: Hit| {
            let mut line = match serde_json::to_vec(&hit) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to encode hit {}: {}", hit.doc, e);
                    return true;
                }
            };
            line.push(b'\n');
            runtime.block_on(writer.write_all(&line)).is_ok()
        });
        if let Err(e) = result {
            warn!("Fetch stopped early: {}", e);
            let marker = ErrorResponse { error: e.to_string() };
            if let Ok(mut line) = serde_json::to_vec(&marker) {
                line.push(b'\n');
                // the client may already be gone
                let _ = runtime.block_on(writer.write_all(&line));
            }
        }
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response())
}

async fn aggregate(State(index): State<AppState>, body: Bytes) -> Result<Json<Aggregation>, ApiError> {
    let body: AggregateBody = parse_body(&body)?;
    body.query.validate()?;
    let window = TimeWindow::resolve(body.from_sec, body.to_sec);

    let result = blocking(&index, move |index| {
        index.aggregate(&body.query, &window, &body.request)
    })
    .await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use blackrock_core::IndexConfig;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(dir: &TempDir) -> Router {
        let index = SearchIndex::open(IndexConfig::with_data_dir(dir.path())).unwrap();
        create_router(Arc::new(index))
    }

    async fn post_json(app: &Router, uri: &str, body: &str) -> (StatusCode, Bytes) {
        let response = app
            .clone()
            .oneshot(
                Request::post(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes)
    }

    const EVENT: &str = r#"{"metadata": {"created_at_ns": 5000000000, "event_type": "click",
        "foreign_type": "user_id", "foreign_id": "42",
        "search": [{"key": "city", "value": "vinkeveen"}]}}"#;

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let response = app(&dir)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_push_then_search() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let (status, body) = post_json(&app, "/push", EVENT).await;
        assert_eq!(status, StatusCode::OK);
        let doc: DocRef = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc, DocRef { segment: 0, doc_id: 0 });

        let query = r#"{"query": {"term": {"field": "city", "value": "vinkeveen"}}, "from_sec": 0, "to_sec": 100}"#;
        let (status, body) = post_json(&app, "/search", query).await;
        assert_eq!(status, StatusCode::OK);
        let result: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(result["total"], 1);
        assert_eq!(result["hits"][0]["metadata"]["foreign_id"], "42");
    }

    #[tokio::test]
    async fn test_rejections() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let missing = r#"{"metadata": {"event_type": "click", "foreign_type": "user_id", "foreign_id": ""}}"#;
        let (status, _) = post_json(&app, "/push", missing).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = r#"{"query": {"fuzzy": {"field": "a"}}}"#;
        let (status, body) = post_json(&app, "/search", unknown).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("unknown query type"));

        let or_not = r#"{"query": {"or": {"queries": [], "not": {"term": {"field": "a", "value": "b"}}}}}"#;
        let (status, _) = post_json(&app, "/search", or_not).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_push_stream_and_fetch() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let bad = r#"{"metadata": {"event_type": "", "foreign_type": "user_id", "foreign_id": "1"}}"#;
        let lines = format!("{}\n{}\n\n{}\n", EVENT.replace('\n', " "), bad, EVENT.replace('\n', " "));
        let (status, body) = post_json(&app, "/push/stream", &lines).await;
        assert_eq!(status, StatusCode::OK);
        let result: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(result["accepted"], 2);
        assert_eq!(result["rejected"], 1);

        let query = r#"{"query": {"term": {"field": "blackrock", "value": "match_all"}}, "from_sec": 0, "to_sec": 100}"#;
        let (status, body) = post_json(&app, "/fetch", query).await;
        assert_eq!(status, StatusCode::OK);
        let hits: Vec<serde_json::Value> = String::from_utf8_lossy(&body)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(hits.len(), 2);
        assert!(hits[1]["doc_id"].as_u64() > hits[0]["doc_id"].as_u64());
    }

    #[tokio::test]
    async fn test_push_stream_beyond_body_limit() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let line = format!(
            r#"{{"metadata": {{"created_at_ns": 5000000000, "event_type": "click", "foreign_type": "user_id", "foreign_id": "42"}}, "payload": {:?}}}"#,
            vec![7u8; 600]
        );
        let count = 2 * 1024 * 1024 / line.len() + 100;
        let body = format!("{}\n", line).repeat(count);
        assert!(body.len() > 2 * 1024 * 1024);

        let (status, body) = post_json(&app, "/push/stream", &body).await;
        assert_eq!(status, StatusCode::OK);
        let result: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(result["accepted"], count);
        assert_eq!(result["rejected"], 0);
    }

    #[tokio::test]
    async fn test_fetch_reports_late_failure() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        post_json(&app, "/push", EVENT).await;

        // break the checksum of the only forward record
        let path = dir.path().join("3600/0/main.bin");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[16] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let query = r#"{"query": {"term": {"field": "blackrock", "value": "match_all"}}, "from_sec": 0, "to_sec": 100}"#;
        let (status, body) = post_json(&app, "/fetch", query).await;
        assert_eq!(status, StatusCode::OK);
        let lines: Vec<serde_json::Value> = String::from_utf8_lossy(&body)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0]["error"].as_str().unwrap().contains("checksum"));
    }

    #[tokio::test]
    async fn test_aggregate() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        post_json(&app, "/push", EVENT).await;

        let body = r#"{"query": {"term": {"field": "blackrock", "value": "match_all"}},
            "from_sec": 0, "to_sec": 100, "fields": ["city"], "sample_limit": 1}"#;
        let (status, body) = post_json(&app, "/aggregate", body).await;
        assert_eq!(status, StatusCode::OK);
        let result: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(result["search"]["city"]["vinkeveen"], 1);
        assert_eq!(result["sample"].as_array().unwrap().len(), 1);
    }
}
