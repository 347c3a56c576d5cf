use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::Value;
use subtle::ConstantTimeEq;
use tokio::task::JoinSet;

use crate::models::{Attachment, BuildRequest};
use crate::pipeline::RoundRunner;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub runner: Arc<dyn RoundRunner>,
    /// Shared secret every build request must carry.
    pub secret: String,
    pub rounds: RoundTracker,
}

/// Rounds spawned by the front door that may still be running.
#[derive(Default)]
pub struct RoundTracker {
    tasks: std::sync::Mutex<JoinSet<()>>,
}

impl RoundTracker {
    fn spawn<F>(&self, round: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        while tasks.try_join_next().is_some() {}
        tasks.spawn(round);
    }

    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Wait for every tracked round to finish.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "round task failed");
            }
        }
    }
}

pub type SharedState = Arc<AppState>;

pub const ACK_MESSAGE: &str = "Request received and is being processed.";

#[derive(Debug, Serialize)]
pub struct BuildAck {
    pub message: &'static str,
    pub task: String,
    pub round: u32,
    pub request_id: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/build", post(accept_build))
}

async fn health() -> &'static str {
    "ok"
}

// ── Validation ────────────────────────────────────────────────────────

fn secret_matches(provided: Option<&str>, expected: &str) -> bool {
    match provided {
        Some(provided) => bool::from(provided.as_bytes().ct_eq(expected.as_bytes())),
        None => false,
    }
}

fn required_str(body: &serde_json::Map<String, Value>, field: &str) -> Result<String, ApiError> {
    match body.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(ApiError::BadRequest(format!("Field '{}' must not be empty", field))),
        Some(_) => Err(ApiError::BadRequest(format!("Field '{}' must be a string", field))),
        None => Err(ApiError::BadRequest(format!("Missing required field '{}'", field))),
    }
}

fn required_round(body: &serde_json::Map<String, Value>) -> Result<u32, ApiError> {
    let value = body
        .get("round")
        .ok_or_else(|| ApiError::BadRequest("Missing required field 'round'".into()))?;
    value
        .as_u64()
        .filter(|r| *r >= 1)
        .and_then(|r| u32::try_from(r).ok())
        .ok_or_else(|| ApiError::BadRequest("Field 'round' must be a positive integer".into()))
}

fn is_absolute_http_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(r) if !r.is_empty() && !r.starts_with('/'))
}

fn attachments(body: &serde_json::Map<String, Value>) -> Result<Vec<Attachment>, ApiError> {
    let items = match body.get("attachments") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(ApiError::BadRequest("Field 'attachments' must be an array".into())),
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let obj = item
                .as_object()
                .ok_or_else(|| ApiError::BadRequest(format!("Attachment {} must be an object", i)))?;
            let name = required_str(obj, "name")
                .map_err(|_| ApiError::BadRequest(format!("Attachment {} needs a non-empty 'name'", i)))?;
            let url = required_str(obj, "url")
                .map_err(|_| ApiError::BadRequest(format!("Attachment {} needs a non-empty 'url'", i)))?;
            Ok(Attachment { name, url })
        })
        .collect()
}

/// Turn a raw body into a [`BuildRequest`]. Order: JSON shape, secret,
/// then fields.
pub fn validate_build_request(raw: &[u8], expected_secret: &str) -> Result<BuildRequest, ApiError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| ApiError::BadRequest(format!("Body is not valid JSON: {}", e)))?;
    let body = value
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("Body must be a JSON object".into()))?;

    if !secret_matches(body.get("secret").and_then(Value::as_str), expected_secret) {
        return Err(ApiError::Unauthorized);
    }

    let request = BuildRequest {
        email: required_str(body, "email")?,
        task: required_str(body, "task")?,
        round: required_round(body)?,
        nonce: required_str(body, "nonce")?,
        brief: required_str(body, "brief")?,
        attachments: attachments(body)?,
        evaluation_url: required_str(body, "evaluation_url")?,
    };

    if !is_absolute_http_url(&request.evaluation_url) {
        return Err(ApiError::BadRequest(
            "Field 'evaluation_url' must be an absolute http(s) URL".into(),
        ));
    }
    Ok(request)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn accept_build(State(state): State<SharedState>, body: Bytes) -> Result<Json<BuildAck>, ApiError> {
    let request = validate_build_request(&body, &state.secret).inspect_err(|e| {
        tracing::warn!(error = ?e, "rejected build request");
    })?;

    let ack = BuildAck {
        message: ACK_MESSAGE,
        task: request.task.clone(),
        round: request.round,
        request_id: uuid::Uuid::new_v4().to_string(),
    };
    tracing::info!(task = %ack.task, round = ack.round, request_id = %ack.request_id, "accepted build request");

    let runner = Arc::clone(&state.runner);
    state.rounds.spawn(async move {
        let report = runner.run_round(request).await;
        if report.is_done() {
            tracing::info!(task = %report.task, round = report.round, "round finished");
        } else {
            tracing::error!(
                task = %report.task,
                round = report.round,
                error = report.error.as_deref().unwrap_or("unknown"),
                "round did not complete"
            );
        }
    });

    Ok(Json(ack))
}
