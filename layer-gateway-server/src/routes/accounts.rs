use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use layer_gateway::{AccountInfo, CodeOutcome, PhoneNumber, SessionInfo, StartOutcome};
use serde::{Deserialize, Deserializer, Serialize};

use super::{AppState, phone_param};
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/start", post(start))
        .route("/verify-code", post(verify_code))
        .route("/verify-password", post(verify_password))
        .route("/list", get(list))
        .route("/{phone_number}", delete(remove))
        .route("/{phone_number}/info", get(info))
}

// ─── Schemas ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub phone_number: PhoneNumber,
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub phone_number:    PhoneNumber,
    #[serde(deserialize_with = "text_or_number")]
    pub code:            String,
    pub phone_code_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    pub phone_number: PhoneNumber,
    pub password:     String,
}

/// Codes arrive as `"12345"` or `12345`.
fn text_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Text(s)   => s,
        Raw::Number(n) => n.to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub status:          &'static str,
    pub message:         &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_code_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserView {
    pub id:           i64,
    pub username:     Option<String>,
    pub phone_number: PhoneNumber,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub status:  &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user:    Option<UserView>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

impl AuthResponse {
    fn success(state: &AppState, phone: &PhoneNumber) -> Self {
        let user = state
            .manager
            .list_sessions()
            .into_iter()
            .find(|s| &s.phone_number == phone)
            .map(|s| UserView { id: s.user_id, username: s.username, phone_number: s.phone_number });
        Self { status: "success", message: "Authentication successful", user }
    }
}

// ─── Handlers ─────────────────────────────────────────────────────────────────

async fn start(
    State(state): State<AppState>,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<StartResponse>, ApiError> {
    let Json(req) = body?;
    let res = match state.manager.start_auth(&req.phone_number, &state.app).await? {
        StartOutcome::CodeSent { phone_code_hash } => StartResponse {
            status:          "code_sent",
            message:         "Code sent to phone number",
            phone_code_hash: Some(phone_code_hash),
        },
        StartOutcome::AlreadyAuthorized => StartResponse {
            status:          "already_authorized",
            message:         "Account is already authorized",
            phone_code_hash: None,
        },
    };
    Ok(Json(res))
}

async fn verify_code(
    State(state): State<AppState>,
    body: Result<Json<CodeRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(req) = body?;
    let outcome = state
        .manager
        .verify_code(&req.phone_number, &req.code, &req.phone_code_hash)
        .await?;
    Ok(Json(match outcome {
        CodeOutcome::Success          => AuthResponse::success(&state, &req.phone_number),
        CodeOutcome::PasswordRequired => AuthResponse {
            status:  "2fa_required",
            message: "2FA password required",
            user:    None,
        },
    }))
}

async fn verify_password(
    State(state): State<AppState>,
    body: Result<Json<PasswordRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(req) = body?;
    state.manager.verify_password(&req.phone_number, &req.password).await?;
    Ok(Json(AuthResponse::success(&state, &req.phone_number)))
}

async fn list(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.manager.list_sessions())
}

async fn remove(
    State(state): State<AppState>,
    Path(phone_number): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let phone = phone_param(&phone_number)?;
    state.manager.remove_session(&phone).await?;
    Ok(Json(MessageResponse { message: "Session removed successfully" }))
}

async fn info(
    State(state): State<AppState>,
    Path(phone_number): Path<String>,
) -> Result<Json<AccountInfo>, ApiError> {
    let phone = phone_param(&phone_number)?;
    Ok(Json(state.manager.account_info(&phone, &state.app).await?))
}
