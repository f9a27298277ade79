//! `GatewayError` → HTTP response mapping.
//!
//! Every failure leaves the server as `{"detail": "<message>"}` with a stable
//! status code. Internal failures carry a generic message; their detail is
//! only logged.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use layer_gateway::{ErrorKind, GatewayError, ValidationError};
use serde::Serialize;

#[derive(Debug)]
pub struct ApiError {
    status:      StatusCode,
    detail:      String,
    retry_after: Option<u64>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, detail: detail.into(), retry_after: None }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest  => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound    => StatusCode::NOT_FOUND,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Internal    => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        let status = status_for(e.kind());
        if status.is_server_error() {
            tracing::error!("[api] {e}");
        } else {
            tracing::debug!("[api] {status}: {e}");
        }
        Self { status, detail: e.public_message(), retry_after: e.retry_after() }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        GatewayError::from(e).into()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        // Malformed field values are plain bad input here, not 422.
        let status = match r.status() {
            StatusCode::UNPROCESSABLE_ENTITY => StatusCode::BAD_REQUEST,
            other                            => other,
        };
        Self { status, detail: r.body_text(), retry_after: None }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(r: QueryRejection) -> Self {
        Self::bad_request(r.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut res = (self.status, Json(ErrorBody { detail: &self.detail })).into_response();
        if let Some(seconds) = self.retry_after {
            res.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        res
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
