//! Relay endpoint and health handlers.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::{debug, error, info};
use uuid::Uuid;

use chat_relay_core::error::{RelayError, ValidationError};
use chat_relay_core::types::RelayRequest;
use chat_relay_engine::QueryOptions;
use chat_relay_stream::{FrameStream, FrameWriter, Relay, assemble_prompt};

use crate::profiles::EndpointProfile;
use crate::state::AppState;

pub const METRIC_REQUESTS: &str = "relay_requests_total";

/// Body of every 500 response. Details stay in the server log.
pub const INTERNAL_ERROR_MESSAGE: &str =
    "Failed to process request. Check server logs for details.";

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Error response for a request rejected before streaming starts.
#[derive(Debug)]
pub struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self(e.into())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            RelayError::Validation(e) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": INTERNAL_ERROR_MESSAGE })),
            )
                .into_response(),
        }
    }
}

/// `POST /api/chat`
pub async fn chat(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    handle_relay(&state, &state.assistant, &body)
}

/// `POST /api/research`
pub async fn research(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    handle_relay(&state, &state.research, &body)
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "engine": state.engine.id(),
        "started_at": state.started_at.to_rfc3339(),
    }))
}

fn handle_relay(state: &Arc<AppState>, profile: &EndpointProfile, body: &[u8]) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let response = match prepare(profile, body, &request_id) {
        Ok((prompt, options)) => {
            let (writer, stream) = FrameWriter::channel();
            spawn_relay(state, profile.name, request_id.clone(), prompt, options, writer);
            stream_response(stream)
        }
        Err(e) => {
            match &e.0 {
                RelayError::Validation(v) => {
                    info!(%request_id, endpoint = profile.name, reason = %v, "Rejected request")
                }
                other => {
                    error!(%request_id, endpoint = profile.name, error = %other, "Failed to process request")
                }
            }
            e.into_response()
        }
    };

    state.telemetry.increment(
        METRIC_REQUESTS,
        1,
        &[
            ("endpoint", profile.name.to_string()),
            ("status", response.status().as_u16().to_string()),
        ],
    );
    response
}

/// Validate the body and build the engine prompt and options.
fn prepare(
    profile: &EndpointProfile,
    body: &[u8],
    request_id: &str,
) -> Result<(String, QueryOptions), ApiError> {
    let value: Value = serde_json::from_slice(body)?;
    if !value.get("turns").is_some_and(Value::is_array) {
        return Err(ValidationError::MissingTurns.into());
    }
    let request: RelayRequest = serde_json::from_value(value).map_err(|e| {
        RelayError::Setup(anyhow::Error::new(e).context("Malformed conversation turns"))
    })?;

    let prompt = assemble_prompt(&profile.system_prompt, &request)?;
    let model = profile.resolve_model(request.model_override.as_deref(), request_id);
    debug!(
        request_id,
        endpoint = profile.name,
        model,
        turns = request.turns.len(),
        "Accepted relay request"
    );
    Ok((prompt, profile.query_options(model)))
}

fn spawn_relay(
    state: &Arc<AppState>,
    endpoint: &'static str,
    request_id: String,
    prompt: String,
    options: QueryOptions,
    writer: FrameWriter,
) {
    let engine = state.engine.clone();
    let relay = Relay::new(endpoint, request_id.clone(), state.telemetry.clone());
    tokio::spawn(async move {
        let outcome = relay.run(engine.as_ref(), &prompt, &options, writer).await;
        debug!(%request_id, endpoint, ?outcome, "Relay finished");
    });
}

fn stream_response(stream: FrameStream) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}
