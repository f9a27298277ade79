use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use layer_gateway::forward::{self, ForwardRequest};
use serde::Serialize;

use super::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/messages", post(forward_messages))
}

#[derive(Debug, Serialize)]
pub struct ForwardResponse {
    pub status:                &'static str,
    pub forwarded_message_ids: Vec<i32>,
}

async fn forward_messages(
    State(state): State<AppState>,
    body: Result<Json<ForwardRequest>, JsonRejection>,
) -> Result<Json<ForwardResponse>, ApiError> {
    let Json(req) = body?;
    let plan  = forward::plan_forward(&req)?;
    let lease = state.manager.get_client(&req.source_phone, &state.app).await?;
    let ids   = forward::forward_messages(lease.client(), &plan).await?;
    Ok(Json(ForwardResponse { status: "success", forwarded_message_ids: ids }))
}
