use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use layer_gateway::search::{self, Chat, Contact};
use layer_gateway::validation::{self, ChatFilter, SearchLimit};
use serde::{Deserialize, Serialize};

use super::{AppState, phone_param};
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/contacts", get(contacts))
        .route("/chats", get(chats))
}

#[derive(Debug, Deserialize)]
pub struct ContactsParams {
    pub phone_number: String,
    pub query:        String,
    pub limit:        Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ChatsParams {
    pub phone_number: String,
    pub query:        String,
    pub limit:        Option<usize>,
    pub chat_type:    Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ContactsResponse {
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Serialize)]
pub struct ChatsResponse {
    pub chats: Vec<Chat>,
}

fn limit_param(limit: Option<usize>) -> Result<SearchLimit, ApiError> {
    Ok(limit.map(SearchLimit::new).transpose()?.unwrap_or_default())
}

async fn contacts(
    State(state): State<AppState>,
    params: Result<Query<ContactsParams>, QueryRejection>,
) -> Result<Json<ContactsResponse>, ApiError> {
    let Query(p) = params?;
    let phone = phone_param(&p.phone_number)?;
    let limit = limit_param(p.limit)?;
    validation::require_query(&p.query)?;

    let lease    = state.manager.get_client(&phone, &state.app).await?;
    let contacts = search::search_contacts(lease.client(), &p.query, limit).await?;
    Ok(Json(ContactsResponse { contacts }))
}

async fn chats(
    State(state): State<AppState>,
    params: Result<Query<ChatsParams>, QueryRejection>,
) -> Result<Json<ChatsResponse>, ApiError> {
    let Query(p) = params?;
    let phone  = phone_param(&p.phone_number)?;
    let limit  = limit_param(p.limit)?;
    let filter = match p.chat_type.as_deref().map(str::trim) {
        None | Some("") => ChatFilter::All,
        Some(raw)       => raw.parse::<ChatFilter>()?,
    };
    validation::require_query(&p.query)?;

    let lease = state.manager.get_client(&phone, &state.app).await?;
    let chats = search::search_chats(lease.client(), &p.query, limit, filter).await?;
    Ok(Json(ChatsResponse { chats }))
}
