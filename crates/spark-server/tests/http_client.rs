use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, LINK, RETRY_AFTER};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use spark_contracts::{ApiResource, SparkError, ROOM_PREFIX};
use spark_server::{HttpApi, SparkApi};

#[derive(Clone, Default)]
struct Fake {
    base: String,
    room_gets: Arc<AtomicUsize>,
    webhook_lists: Arc<AtomicUsize>,
    auth: Arc<Mutex<Vec<String>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl Fake {
    fn saw(&self, headers: &HeaderMap) {
        if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            self.auth.lock().push(value.to_string());
        }
    }
}

fn room(n: u32) -> Value {
    json!({"id": format!("{ROOM_PREFIX}{n}"), "title": format!("room {n}"), "type": "group"})
}

async fn list_rooms(
    State(fake): State<Fake>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    fake.saw(&headers);
    fake.queries.lock().push(query.clone());
    match query.get("cursor").map(String::as_str) {
        None => (
            [(LINK, format!("<{}/rooms?cursor=2>; rel=\"next\"", fake.base))],
            Json(json!({"items": [room(1), room(2)]})),
        )
            .into_response(),
        Some("2") => (
            [(LINK, format!("<{}/rooms?cursor=3>; rel=\"next\"", fake.base))],
            Json(json!({"items": [room(3)]})),
        )
            .into_response(),
        Some(_) => Json(json!({"items": [room(4)]})).into_response(),
    }
}

async fn get_room(State(fake): State<Fake>, Path(id): Path<String>) -> Response {
    if fake.room_gets.fetch_add(1, Ordering::SeqCst) == 0 {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(RETRY_AFTER, "0")],
            "slow down",
        )
            .into_response();
    }
    Json(json!({"id": id, "title": "fetched", "type": "direct"})).into_response()
}

async fn list_webhooks(State(fake): State<Fake>) -> Response {
    if fake.webhook_lists.fetch_add(1, Ordering::SeqCst) < 2 {
        return (StatusCode::TOO_MANY_REQUESTS, "no header").into_response();
    }
    Json(json!({"items": []})).into_response()
}

async fn get_person() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"message": "unknown person"}))).into_response()
}

async fn create_membership() -> Response {
    (StatusCode::CONFLICT, "already a member").into_response()
}

async fn create_message(
    State(fake): State<Fake>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    fake.saw(&headers);
    let mut created = body;
    created["id"] = json!("msg-1");
    Json(created).into_response()
}

async fn delete_webhook() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn start_fake() -> (HttpApi, Fake) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let fake = Fake {
        base: format!("http://{}", listener.local_addr().unwrap()),
        ..Fake::default()
    };
    let app = Router::new()
        .route("/rooms", get(list_rooms))
        .route("/rooms/{id}", get(get_room))
        .route("/webhooks", get(list_webhooks))
        .route("/webhooks/{id}", delete(delete_webhook))
        .route("/people/{id}", get(get_person))
        .route("/memberships", post(create_membership))
        .route("/messages", post(create_message))
        .with_state(fake.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let api = HttpApi::new(
        &fake.base,
        "secret-token",
        Duration::from_secs(5),
        Duration::from_millis(10),
    )
    .unwrap();
    (api, fake)
}

#[tokio::test]
async fn list_follows_link_pagination_in_order() {
    let (api, fake) = start_fake().await;
    let items = api
        .list(ApiResource::Rooms, &[("type", "group")])
        .await
        .unwrap();
    let titles: Vec<&str> = items.iter().map(|r| r["title"].as_str().unwrap()).collect();
    assert_eq!(titles, vec!["room 1", "room 2", "room 3", "room 4"]);

    let queries = fake.queries.lock();
    assert_eq!(queries.len(), 3);
    assert_eq!(queries[0].get("type").map(String::as_str), Some("group"));
    assert!(fake
        .auth
        .lock()
        .iter()
        .all(|v| v == "Bearer secret-token"));
}

#[tokio::test]
async fn rate_limited_get_is_retried_transparently() {
    let (api, fake) = start_fake().await;
    let id = format!("{ROOM_PREFIX}9");
    let room = api.get(ApiResource::Rooms, &id).await.unwrap();
    assert_eq!(room["title"], "fetched");
    assert_eq!(fake.room_gets.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_retry_after_uses_default_wait() {
    let (api, fake) = start_fake().await;
    let hooks = api.list(ApiResource::Webhooks, &[]).await.unwrap();
    assert!(hooks.is_empty());
    assert_eq!(fake.webhook_lists.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn not_found_maps_to_not_found() {
    let (api, _) = start_fake().await;
    let err = api.get(ApiResource::People, "nobody").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn conflict_maps_to_conflict() {
    let (api, _) = start_fake().await;
    let err = api
        .create(ApiResource::Memberships, json!({"roomId": "r", "personId": "p"}))
        .await
        .unwrap_err();
    match err {
        SparkError::Conflict { body } => assert_eq!(body, "already a member"),
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn create_returns_remote_record() {
    let (api, fake) = start_fake().await;
    let created = api
        .create(ApiResource::Messages, json!({"roomId": "r", "markdown": "hi"}))
        .await
        .unwrap();
    assert_eq!(created["id"], "msg-1");
    assert_eq!(created["markdown"], "hi");
    assert_eq!(fake.auth.lock().as_slice(), ["Bearer secret-token"]);
}

#[tokio::test]
async fn delete_accepts_no_content() {
    let (api, _) = start_fake().await;
    api.delete(ApiResource::Webhooks, "hook-1").await.unwrap();
}
