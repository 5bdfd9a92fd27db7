use crate::{router, AppState};
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use mockall::mock;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uc_core::source::{NormalizedSource, Replacement, RuleType, Source};
use uc_core::store::{MemorySourceStore, SourceStore, StoreError, StoreResult};
use uuid::Uuid;

mock! {
    pub Store {}

    #[async_trait]
    impl SourceStore for Store {
        async fn active_sources_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Source>>;
        async fn list_sources(&self, user_id: Uuid) -> StoreResult<Vec<Source>>;
        async fn get_source(&self, user_id: Uuid, source_id: Uuid) -> StoreResult<Source>;
        async fn create_source(&self, user_id: Uuid, input: NormalizedSource) -> StoreResult<Source>;
        async fn update_source(&self, user_id: Uuid, source_id: Uuid, input: NormalizedSource) -> StoreResult<Source>;
        async fn delete_source(&self, user_id: Uuid, source_id: Uuid) -> StoreResult<()>;
        async fn check_ready(&self) -> StoreResult<()>;
    }
}

fn source(user_id: Uuid, name: &str, rule_type: RuleType, priority: i32) -> Source {
    let now = Utc::now();
    Source {
        source_id: Uuid::new_v4(),
        user_id,
        name: name.to_string(),
        rule_type,
        rule_value: String::new(),
        param_name: String::new(),
        param_value: String::new(),
        replacements: vec![Replacement {
            selector: "#headline".to_string(),
            content: format!("<h1>{name}</h1>"),
        }],
        priority,
        active: true,
        created_at: now,
        updated_at: now,
    }
}

async fn seeded(user_id: Uuid) -> (Vec<Source>, Arc<MemorySourceStore>) {
    let mut facebook = source(user_id, "facebook", RuleType::ReferrerContains, 2);
    facebook.rule_value = "facebook.com".to_string();
    let mut email = source(user_id, "email", RuleType::UrlParamEquals, 1);
    email.param_name = "utm_source".to_string();
    email.param_value = "email".to_string();
    let mut paused = source(user_id, "paused", RuleType::ReferrerContains, 0);
    paused.rule_value = "facebook".to_string();
    paused.active = false;

    let sources = vec![facebook, email, paused];
    let store = MemorySourceStore::with_sources(sources.clone()).await;
    (sources, Arc::new(store))
}

fn app(store: Arc<dyn SourceStore>) -> Router {
    router(AppState::new(store, Duration::from_secs(300), 0))
}

async fn post_json(app: Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body");
    let payload: Value = serde_json::from_slice(&body).expect("json body");
    (status, payload)
}

#[tokio::test]
async fn referrer_rule_returns_its_replacements() {
    let user_id = Uuid::new_v4();
    let (sources, store) = seeded(user_id).await;

    let (status, body) = post_json(
        app(store),
        "/v1/content",
        json!({
            "user_id": user_id,
            "referrer": "https://www.facebook.com/groups/1",
            "url": "https://shop.example/landing"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["source_id"], sources[0].source_id.to_string());
    assert_eq!(body["replacements"][0]["selector"], "#headline");
    assert_eq!(body["replacements"][0]["content"], "<h1>facebook</h1>");
}

#[tokio::test]
async fn lower_priority_value_wins_when_both_match() {
    let user_id = Uuid::new_v4();
    let (sources, store) = seeded(user_id).await;

    let (status, body) = post_json(
        app(store),
        "/functions/v1/get_content",
        json!({
            "user_id": user_id,
            "referrer": "https://facebook.com",
            "url": "https://shop.example/?utm_source=email"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source_id"], sources[1].source_id.to_string());
}

#[tokio::test]
async fn no_match_returns_empty_list() {
    let user_id = Uuid::new_v4();
    let (_, store) = seeded(user_id).await;

    let (status, body) = post_json(
        app(store),
        "/v1/content",
        json!({
            "user_id": user_id,
            "referrer": null,
            "url": "not a url"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "replacements": [], "success": true }));
}

#[tokio::test]
async fn other_users_sources_are_never_used() {
    let owner = Uuid::new_v4();
    let (_, store) = seeded(owner).await;

    let (status, body) = post_json(
        app(store),
        "/v1/content",
        json!({
            "user_id": Uuid::new_v4(),
            "referrer": "https://facebook.com",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replacements"], json!([]));
}

#[tokio::test]
async fn missing_user_id_is_rejected_before_store_access() {
    let mut store = MockStore::new();
    store.expect_active_sources_for_user().never();

    let (status, body) = post_json(
        app(Arc::new(store)),
        "/v1/content",
        json!({ "referrer": "https://facebook.com", "url": "https://a.test" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "USER_ID_REQUIRED");
}

#[tokio::test]
async fn malformed_user_id_is_rejected() {
    let mut store = MockStore::new();
    store.expect_active_sources_for_user().never();

    let (status, body) = post_json(
        app(Arc::new(store)),
        "/v1/content",
        json!({ "user_id": "12345" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_USER_ID");
}

#[tokio::test]
async fn non_json_body_is_unsupported_media_type() {
    let (_, store) = seeded(Uuid::new_v4()).await;
    let request = Request::builder()
        .method("POST")
        .uri("/v1/content")
        .header("content-type", "text/plain")
        .body(Body::from("user_id=1"))
        .unwrap();

    let response = app(store).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn broken_json_is_bad_request() {
    let (_, store) = seeded(Uuid::new_v4()).await;
    let request = Request::builder()
        .method("POST")
        .uri("/v1/content")
        .header("content-type", "application/json")
        .body(Body::from("{\"user_id\":"))
        .unwrap();

    let response = app(store).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let payload: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(payload["code"], "INVALID_JSON");
}

#[tokio::test]
async fn repeated_lookup_is_served_from_cache() {
    let user_id = Uuid::new_v4();
    let mut matched = source(user_id, "cached", RuleType::ReferrerContains, 1);
    matched.rule_value = "google".to_string();

    let mut store = MockStore::new();
    store
        .expect_active_sources_for_user()
        .times(1)
        .returning(move |_| Ok(vec![matched.clone()]));
    let app = app(Arc::new(store));

    let payload = json!({
        "user_id": user_id,
        "referrer": "https://google.com/search",
        "url": "https://a.test/"
    });
    let (first_status, first) = post_json(app.clone(), "/v1/content", payload.clone()).await;
    let (second_status, second) = post_json(app, "/v1/content", payload).await;

    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(first["replacements"][0]["content"], "<h1>cached</h1>");
}

#[tokio::test]
async fn store_failure_is_internal_error() {
    let mut store = MockStore::new();
    store
        .expect_active_sources_for_user()
        .returning(|_| Err(StoreError::Decode("bad rule_type".to_string())));

    let (status, body) = post_json(
        app(Arc::new(store)),
        "/v1/content",
        json!({ "user_id": Uuid::new_v4() }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "STORE_ERROR");
}

#[tokio::test]
async fn rate_limit_applies_per_client() {
    let (_, store) = seeded(Uuid::new_v4()).await;
    let app = router(AppState::new(store, Duration::ZERO, 1))
        .layer(MockConnectInfo(SocketAddr::from(([192, 0, 2, 10], 4000))));

    let payload = json!({ "user_id": Uuid::new_v4() });
    let (first, _) = post_json(app.clone(), "/v1/content", payload.clone()).await;
    assert_eq!(first, StatusCode::OK);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/content")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().get("retry-after").is_some());
}

#[tokio::test]
async fn forwarded_for_header_does_not_reset_rate_limit() {
    let (_, store) = seeded(Uuid::new_v4()).await;
    let app = router(AppState::new(store, Duration::ZERO, 1))
        .layer(MockConnectInfo(SocketAddr::from(([192, 0, 2, 10], 4000))));
    let payload = json!({ "user_id": Uuid::new_v4() });

    let mut statuses = Vec::new();
    for hop in 1..=5u8 {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/content")
            .header("content-type", "application/json")
            .header("x-forwarded-for", format!("198.51.100.{hop}"))
            .body(Body::from(payload.to_string()))
            .unwrap();
        statuses.push(app.clone().oneshot(request).await.unwrap().status());
    }

    assert_eq!(statuses[0], StatusCode::OK);
    assert!(statuses[1..]
        .iter()
        .all(|status| *status == StatusCode::TOO_MANY_REQUESTS));
}

#[tokio::test]
async fn oversized_cache_ttl_still_serves_lookups() {
    let user_id = Uuid::new_v4();
    let (sources, store) = seeded(user_id).await;
    let app = router(AppState::new(store, Duration::from_secs(u64::MAX), 0));
    let payload = json!({ "user_id": user_id, "referrer": "https://facebook.com" });

    for _ in 0..2 {
        let (status, body) = post_json(app.clone(), "/v1/content", payload.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source_id"], sources[0].source_id.to_string());
    }
}

#[tokio::test]
async fn store_failure_message_is_generic() {
    let mut store = MockStore::new();
    store
        .expect_active_sources_for_user()
        .returning(|_| Err(StoreError::Decode("column uc.sources.rule_type".to_string())));

    let (status, body) = post_json(
        app(Arc::new(store)),
        "/v1/content",
        json!({ "user_id": Uuid::new_v4() }),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "STORE_ERROR");
    assert!(!body.to_string().contains("uc.sources"));
}

#[tokio::test]
async fn healthz_reports_store_readiness() {
    let mut store = MockStore::new();
    store
        .expect_check_ready()
        .returning(|| Err(StoreError::Decode("down".to_string())));

    let response = app(Arc::new(store))
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let (_, healthy) = seeded(Uuid::new_v4()).await;
    let response = app(healthy)
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn openapi_document_lists_content_route() {
    let (_, store) = seeded(Uuid::new_v4()).await;
    let response = app(store)
        .oneshot(
            Request::builder()
                .uri("/v1/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let doc: Value = serde_json::from_slice(&body).unwrap();
    assert!(doc["paths"].get("/v1/content").is_some());
}
