//! HTTP surface.
//!
//! | Method | Path                                 |
//! |--------|--------------------------------------|
//! | POST   | `/api/accounts/start`                |
//! | POST   | `/api/accounts/verify-code`          |
//! | POST   | `/api/accounts/verify-password`      |
//! | GET    | `/api/accounts/list`                 |
//! | GET    | `/api/accounts/{phone_number}/info`  |
//! | DELETE | `/api/accounts/{phone_number}`       |
//! | GET    | `/api/search/contacts`               |
//! | GET    | `/api/search/chats`                  |
//! | POST   | `/api/forward/messages`              |
//! | GET    | `/health`                            |

mod accounts;
mod forward;
mod search;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use layer_gateway::{AppCredentials, PhoneNumber, SessionManager};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub app:     AppCredentials,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/accounts", accounts::router())
        .nest("/api/search", search::router())
        .nest("/api/forward", forward::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Normalize a phone number taken from a path or query string.
fn phone_param(raw: &str) -> Result<PhoneNumber, ApiError> {
    Ok(PhoneNumber::parse(raw)?)
}

#[derive(Serialize)]
struct Health {
    status:  &'static str,
    version: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderMap, Method, Request, StatusCode, header};
    use http_body_util::BodyExt;
    use layer_gateway::testing::{FakeBehavior, FakeFactory};
    use layer_gateway::{
        ChatKind, GlobalSearchPage, InMemoryStore, RemoteChat, RemoteMessage, RemoteUser,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const PHONE: &str = "+15551234567";

    async fn app(behavior: FakeBehavior) -> (Router, Arc<FakeFactory>) {
        let factory = Arc::new(FakeFactory::new(behavior));
        let manager = SessionManager::open(factory.clone(), Arc::new(InMemoryStore::new()))
            .await
            .unwrap();
        let state = AppState { manager: Arc::new(manager), app: AppCredentials::new(1, "secret") };
        (router(state), factory)
    }

    async fn call(router: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let res     = router.clone().oneshot(req).await.unwrap();
        let status  = res.status();
        let headers = res.headers().clone();
        let bytes   = res.into_body().collect().await.unwrap().to_bytes();
        let body    = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, headers, body)
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    async fn login(router: &Router) {
        let (status, _, body) = call(router, post("/api/accounts/start", json!({ "phone_number": PHONE }))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let hash = body["phone_code_hash"].as_str().unwrap().to_string();
        let (status, _, body) = call(router, post("/api/accounts/verify-code", json!({
            "phone_number": PHONE,
            "code": "12345",
            "phone_code_hash": hash,
        }))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    // ── Health / CORS ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn health_reports_version() {
        let (router, _) = app(FakeBehavior::default()).await;
        let req = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "https://example.com")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = call(&router, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    // ── Accounts ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn login_list_and_remove() {
        let (router, factory) = app(FakeBehavior::default()).await;

        let (status, _, body) = call(&router, post("/api/accounts/start", json!({ "phone_number": 15551234567u64 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "code_sent");
        let hash = body["phone_code_hash"].as_str().unwrap().to_string();

        let (status, _, body) = call(&router, post("/api/accounts/verify-code", json!({
            "phone_number": "+1 555 123 4567",
            "code": 12345,
            "phone_code_hash": hash,
        }))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "success");
        assert_eq!(body["user"]["id"], 1001);
        assert_eq!(factory.live_connections(), 0);

        let (_, _, body) = call(&router, post("/api/accounts/start", json!({ "phone_number": PHONE }))).await;
        assert_eq!(body["status"], "already_authorized");
        assert!(body.get("phone_code_hash").is_none());

        let (status, _, body) = call(&router, request(Method::GET, "/api/accounts/list")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{ "phone_number": PHONE, "user_id": 1001, "username": "alice" }]));

        let (status, _, body) = call(&router, request(Method::GET, "/api/accounts/+15551234567/info")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_authorized"], true);

        let (status, _, body) = call(&router, request(Method::DELETE, "/api/accounts/+15551234567")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Session removed successfully");

        let (status, _, body) = call(&router, request(Method::DELETE, "/api/accounts/+15551234567")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].as_str().unwrap().contains("session not found"));
    }

    #[tokio::test]
    async fn two_factor_flow() {
        let (router, _) = app(FakeBehavior { password: Some("hunter2".into()), ..FakeBehavior::default() }).await;
        let (_, _, body) = call(&router, post("/api/accounts/start", json!({ "phone_number": PHONE }))).await;
        let hash = body["phone_code_hash"].as_str().unwrap().to_string();

        let (status, _, body) = call(&router, post("/api/accounts/verify-code", json!({
            "phone_number": PHONE, "code": "12345", "phone_code_hash": hash,
        }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "2fa_required");

        let (status, _, body) = call(&router, post("/api/accounts/verify-password", json!({
            "phone_number": PHONE, "password": "hunter2",
        }))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "success");
    }

    #[tokio::test]
    async fn invalid_phone_is_rejected_before_connecting() {
        let (router, factory) = app(FakeBehavior::default()).await;
        let (status, _, body) = call(&router, post("/api/accounts/start", json!({ "phone_number": "12ab" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
        assert_eq!(factory.clients_created(), 0);
    }

    #[tokio::test]
    async fn verify_without_start_is_bad_request() {
        let (router, _) = app(FakeBehavior::default()).await;
        let (status, _, body) = call(&router, post("/api/accounts/verify-code", json!({
            "phone_number": PHONE, "code": "12345", "phone_code_hash": "hash-1",
        }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("restart the authentication"));
    }

    #[tokio::test]
    async fn flood_wait_is_429_with_retry_after() {
        let (router, _) = app(FakeBehavior { sign_in_flood: Some(30), ..FakeBehavior::default() }).await;
        let (_, _, body) = call(&router, post("/api/accounts/start", json!({ "phone_number": PHONE }))).await;
        let hash = body["phone_code_hash"].as_str().unwrap().to_string();
        let (status, headers, _) = call(&router, post("/api/accounts/verify-code", json!({
            "phone_number": PHONE, "code": "12345", "phone_code_hash": hash,
        }))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(headers[header::RETRY_AFTER], "30");
    }

    // ── Search ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn contact_search_needs_a_session() {
        let (router, _) = app(FakeBehavior::default()).await;
        let (status, _, _) = call(&router, request(Method::GET, "/api/search/contacts?phone_number=%2B15551234567&query=ali")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn contact_search() {
        let behavior = FakeBehavior {
            contacts: vec![RemoteUser {
                id:         5,
                first_name: Some("Alice".into()),
                username:   Some("alice".into()),
                ..RemoteUser::default()
            }],
            ..FakeBehavior::default()
        };
        let (router, _) = app(behavior).await;
        login(&router).await;

        let (status, _, body) = call(&router, request(Method::GET, "/api/search/contacts?phone_number=%2B15551234567&query=ali&limit=5")).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["contacts"][0]["user_id"], 5);
        assert_eq!(body["contacts"][0]["link"], "https://t.me/alice");

        let (status, _, _) = call(&router, request(Method::GET, "/api/search/contacts?phone_number=%2B15551234567&query=ali&limit=0")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_search_with_filter() {
        let global = GlobalSearchPage {
            messages: vec![
                RemoteMessage { id: 1, chat_id: -1_000_000_000_777, text: Some("rust".into()), date: None, from_user: None },
                RemoteMessage { id: 2, chat_id: 42, text: Some("rust".into()), date: None, from_user: Some(42) },
            ],
            chats: vec![
                RemoteChat { id: -1_000_000_000_777, kind: ChatKind::Channel, title: Some("News".into()), username: Some("news".into()), members: Some(3400) },
                RemoteChat { id: 42, kind: ChatKind::Private, title: Some("Bob".into()), username: None, members: None },
            ],
        };
        let (router, _) = app(FakeBehavior { global, ..FakeBehavior::default() }).await;
        login(&router).await;

        let (status, _, body) = call(&router, request(Method::GET, "/api/search/chats?phone_number=15551234567&query=rust&chat_type=channel")).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let chats = body["chats"].as_array().unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0]["type"], "channel");
        assert_eq!(chats[0]["members_count"], 3400);
        assert_eq!(chats[0]["matching_messages"][0]["link"], "https://t.me/news/1");

        let (status, _, _) = call(&router, request(Method::GET, "/api/search/chats?phone_number=15551234567&query=rust&chat_type=bots")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // ── Forward ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn forward_messages() {
        let (router, factory) = app(FakeBehavior::default()).await;
        login(&router).await;

        let (status, _, body) = call(&router, post("/api/forward/messages", json!({
            "source_phone": PHONE,
            "source_chat": "durov",
            "destination_chat": -1001234567890i64,
            "message_ids": [10, 11],
            "remove_sender_info": true,
        }))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body, json!({ "status": "success", "forwarded_message_ids": [1000, 1001] }));
        assert_eq!(factory.forwarded()[0].random_ids.len(), 2);
    }

    #[tokio::test]
    async fn forward_rejections() {
        let (router, factory) = app(FakeBehavior { forward_result: Some(Vec::new()), ..FakeBehavior::default() }).await;
        login(&router).await;

        let (status, _, body) = call(&router, post("/api/forward/messages", json!({
            "source_phone": PHONE,
            "source_chat": ["https://t.me/a/1", "https://t.me/b/2"],
            "destination_chat": "dest",
        }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "All messages must be from the same chat");
        assert!(factory.forwarded().is_empty());

        let (status, _, body) = call(&router, post("/api/forward/messages", json!({
            "source_phone": PHONE,
            "source_chat": "a",
            "destination_chat": "dest",
            "message_ids": [1],
        }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "No messages were forwarded successfully");
    }
}
