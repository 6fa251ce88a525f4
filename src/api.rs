#![forbid(unsafe_code)]

//! HTTP surface: API-key gate, per-key rate limit, and the streamed download.
//!
//! The video goes out as the response body. Comments and video metadata travel
//! alongside it as base64 headers so a client gets everything in one request.

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DownloadError, ErrorKind};
use crate::limiter::{FixedWindowLimiter, RateLimit, RetryAfter};
use crate::orchestrator::{ExtractionResult, Orchestrator};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const WORK_ID_HEADER: &str = "x-work-id";
pub const COMMENTS_HEADER: &str = "x-comments";
pub const METADATA_HEADER: &str = "x-video-metadata";

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    api_keys: Arc<Vec<String>>,
    limiter: Arc<FixedWindowLimiter>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, api_keys: Vec<String>, rate_limit: RateLimit) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            api_keys: Arc::new(api_keys),
            limiter: Arc::new(FixedWindowLimiter::new(rate_limit)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    retry_after: Option<Duration>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    fn rate_limited(RetryAfter(wait): RetryAfter) -> Self {
        Self {
            retry_after: Some(wait),
            ..Self::new(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        let status = match err.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::AuthRequired => StatusCode::FORBIDDEN,
            ErrorKind::UpstreamUnavailable => match err {
                DownloadError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            },
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        let mut response = (self.status, Json(body)).into_response();
        if let Some(wait) = self.retry_after {
            // Round up so clients never retry a moment too early.
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
        }
        response
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/download", post(download))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<DownloadRequest>,
) -> ApiResult<Response> {
    let key = authorize(&headers, &state.api_keys)?;
    state.limiter.check(key).map_err(|retry| {
        warn!(retry_after_secs = retry.0.as_secs(), "rate limit exceeded");
        ApiError::rate_limited(retry)
    })?;

    info!(url = %payload.url, "download requested");
    let result = state.orchestrator.download_video(&payload.url).await?;
    download_response(result)
}

fn authorize<'a>(headers: &'a HeaderMap, api_keys: &[String]) -> ApiResult<&'a str> {
    let key = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::unauthorized("API key is missing"))?;
    if !api_keys.iter().any(|known| known == key) {
        return Err(ApiError::unauthorized("Invalid API key"));
    }
    Ok(key)
}

fn download_response(result: ExtractionResult) -> ApiResult<Response> {
    let ExtractionResult {
        work_id,
        video_stream,
        filename,
        content_type,
        size_bytes,
        comments_text,
        metadata,
    } = result;

    let mut extra = vec![
        (header::CONTENT_TYPE, header_value(&content_type)?),
        (header::CONTENT_LENGTH, HeaderValue::from(size_bytes)),
        (
            header::CONTENT_DISPOSITION,
            header_value(&format!("attachment; filename=\"{filename}\""))?,
        ),
        (
            HeaderName::from_static(WORK_ID_HEADER),
            header_value(&work_id.to_string())?,
        ),
    ];
    if let Some(text) = comments_text {
        extra.push((
            HeaderName::from_static(COMMENTS_HEADER),
            header_value(&BASE64.encode(text))?,
        ));
    }
    if let Some(metadata) = metadata {
        let encoded = serde_json::to_vec(&metadata)
            .map_err(|err| ApiError::internal(format!("encoding metadata: {err}")))?;
        extra.push((
            HeaderName::from_static(METADATA_HEADER),
            header_value(&BASE64.encode(encoded))?,
        ));
    }

    let mut response = Body::from_stream(video_stream).into_response();
    response.headers_mut().extend(extra);
    Ok(response)
}

fn header_value(value: &str) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|err| ApiError::internal(format!("invalid header value: {err}")))
}
