//! HTTP surface: the four assistant endpoints plus the metrics exposition,
//! health, and the optional admin routes.
//!
//! Every assistant request walks the same path: credential check, admission
//! check, body validation, one backend call, response validation. Exactly
//! one request metric is recorded per request, rejections included.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::ai::{self, Completion, GenerativeBackend};
use crate::auth::{api_key_from_headers, validate_service_api_key};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::limiter::RateLimiter;
use crate::metrics::MetricsSink;
use crate::validate;

#[derive(Clone)]
pub struct AppState {
    config: Arc<GatewayConfig>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<Mutex<MetricsSink>>,
    backend: Option<Arc<dyn GenerativeBackend>>,
}

impl AppState {
    pub fn new(config: GatewayConfig, limiter: RateLimiter, metrics: MetricsSink) -> Self {
        Self {
            config: Arc::new(config),
            limiter: Arc::new(limiter),
            metrics: Arc::new(Mutex::new(metrics)),
            backend: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn GenerativeBackend>) -> Self {
        self.backend = Some(backend);
        self
    }
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_exposition))
        .route("/api/analyze", post(analyze))
        .route("/api/translate", post(translate))
        .route("/api/voice-command", post(voice_command))
        .route("/api/form-help", post(form_help));

    if state.config.admin_token.is_some() {
        router = router
            .route("/admin/ratelimit/reset", post(admin_reset_bucket))
            .route("/admin/metrics/reset", post(admin_reset_metrics));
    }

    router.with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics_exposition(State(state): State<AppState>) -> Response {
    let rendered = state.metrics.lock().await.render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        rendered,
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeRequest {
    html: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateRequest {
    text: Option<String>,
    target_lang: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoiceCommandRequest {
    command: Option<String>,
    page_context: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormHelpRequest {
    field_name: Option<String>,
    field_type: Option<String>,
    context: Option<String>,
}

async fn analyze(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let started = Instant::now();
    let result = analyze_inner(&state, &headers, &body).await;
    finish(&state, "analyze", started, result).await
}

async fn translate(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let started = Instant::now();
    let result = translate_inner(&state, &headers, &body).await;
    finish(&state, "translate", started, result).await
}

async fn voice_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let result = voice_command_inner(&state, &headers, &body).await;
    finish(&state, "voice-command", started, result).await
}

async fn form_help(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let started = Instant::now();
    let result = form_help_inner(&state, &headers, &body).await;
    finish(&state, "form-help", started, result).await
}

async fn analyze_inner(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Value, GatewayError> {
    admit(state, headers).await?;
    let request: AnalyzeRequest = parse_body(body)?;
    let html = require_field(request.html, "Missing HTML content")?;

    let backend = configured_backend(state)?;
    let completion = backend
        .generate(&ai::page_analysis_prompt(&html))
        .await
        .map_err(|err| backend_failure("analyze", "Analysis failed", err))?;
    record_spend(state, backend.model(), &completion).await;

    let analysis = validate::page_analysis_or_default(&completion.text);
    Ok(to_payload(&analysis))
}

async fn translate_inner(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Value, GatewayError> {
    admit(state, headers).await?;
    // An optional sourceLang is accepted in the body and not used.
    let request: TranslateRequest = parse_body(body)?;
    let text = require_field(request.text, "Missing required fields")?;
    let target_lang = require_field(request.target_lang, "Missing required fields")?;

    let backend = configured_backend(state)?;
    let completion = backend
        .generate(&ai::translation_prompt(&text, &target_lang))
        .await
        .map_err(|err| backend_failure("translate", "Translation failed", err))?;
    record_spend(state, backend.model(), &completion).await;

    let result = validate::TranslationResult {
        translated_text: completion.text.trim().to_string(),
    };
    Ok(to_payload(&result))
}

async fn voice_command_inner(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Value, GatewayError> {
    admit(state, headers).await?;
    let request: VoiceCommandRequest = parse_body(body)?;
    let command = require_field(request.command, "Missing voice command")?;
    let page_context = request.page_context.unwrap_or_default();

    let backend = configured_backend(state)?;
    let completion = backend
        .generate(&ai::voice_command_prompt(&command, &page_context))
        .await
        .map_err(|err| backend_failure("voice-command", "Command processing failed", err))?;
    record_spend(state, backend.model(), &completion).await;

    let result = validate::voice_command_or_default(&completion.text);
    Ok(to_payload(&result))
}

async fn form_help_inner(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Value, GatewayError> {
    admit(state, headers).await?;
    let request: FormHelpRequest = parse_body(body)?;
    let field_name = require_field(request.field_name, "Missing required fields")?;
    let field_type = require_field(request.field_type, "Missing required fields")?;
    let context = request.context.unwrap_or_default();

    let backend = configured_backend(state)?;
    let completion = backend
        .generate(&ai::form_help_prompt(&field_name, &field_type, &context))
        .await
        .map_err(|err| backend_failure("form-help", "Help generation failed", err))?;
    record_spend(state, backend.model(), &completion).await;

    let result = validate::FormHelp {
        help_text: completion.text.trim().to_string(),
    };
    Ok(to_payload(&result))
}

/// Credential then budget, in that order: a bad key never consumes tokens,
/// and admission is decided before the body is even parsed.
async fn admit(state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    let Some(provided) = api_key_from_headers(headers) else {
        return Err(GatewayError::Unauthorized);
    };
    if !validate_service_api_key(
        state.config.service_api_key.as_deref(),
        Some(provided.as_str()),
    ) {
        return Err(GatewayError::Unauthorized);
    }

    if !state.limiter.check(&provided).await.is_admitted() {
        return Err(GatewayError::BudgetExceeded);
    }
    Ok(())
}

fn configured_backend(state: &AppState) -> Result<&Arc<dyn GenerativeBackend>, GatewayError> {
    state
        .backend
        .as_ref()
        .ok_or(GatewayError::BackendUnconfigured)
}

fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, GatewayError> {
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|_| GatewayError::BadRequest {
        message: "Malformed JSON body",
    })
}

fn require_field(value: Option<String>, message: &'static str) -> Result<String, GatewayError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(GatewayError::BadRequest { message }),
    }
}

fn backend_failure(
    endpoint: &'static str,
    message: &'static str,
    err: ai::BackendError,
) -> GatewayError {
    tracing::error!(endpoint, error = %err, "ai backend call failed");
    GatewayError::BackendFailure { message }
}

async fn record_spend(state: &AppState, model: &str, completion: &Completion) {
    let Some(tokens) = completion.total_tokens.filter(|tokens| *tokens > 0) else {
        return;
    };
    state.metrics.lock().await.record_cost(model, tokens);
}

fn to_payload<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| json!({}))
}

async fn finish(
    state: &AppState,
    endpoint: &'static str,
    started: Instant,
    result: Result<Value, GatewayError>,
) -> Response {
    let status = match &result {
        Ok(_) => 200,
        Err(err) => err.status_code(),
    };

    {
        let mut metrics = state.metrics.lock().await;
        metrics.record_request(endpoint, status, started.elapsed());
        metrics.incr(&format!("requests_{endpoint}"));
    }

    match result {
        Ok(payload) => (StatusCode::OK, Json(payload)).into_response(),
        Err(err) => {
            let status =
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResetBucketRequest {
    key: String,
}

fn admin_authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return false;
    };
    headers
        .get("x-admin-token")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|provided| provided == expected)
}

fn admin_unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Invalid or missing admin token" })),
    )
        .into_response()
}

async fn admin_reset_bucket(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !admin_authorized(&state, &headers) {
        return admin_unauthorized();
    }
    let Ok(request) = serde_json::from_slice::<ResetBucketRequest>(&body) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing bucket key" })),
        )
            .into_response();
    };
    state.limiter.reset(&request.key).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn admin_reset_metrics(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !admin_authorized(&state, &headers) {
        return admin_unauthorized();
    }
    state.metrics.lock().await.reset_all();
    StatusCode::NO_CONTENT.into_response()
}
