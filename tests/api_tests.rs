use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use kirtily::{
    build_router, build_state,
    config::Config,
    models::publication::Publication,
    services::{message::room_id, publication::PUBLICATION_TABLE},
    state::AppState,
    store::Query,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    state: Arc<AppState>,
    router: Router,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    async fn with_config(config: Config) -> Self {
        let state = build_state(config).await.unwrap();
        let router = build_router(state.clone());
        Self { state, router }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Vec<String>, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let cookies = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|value| value.to_str().unwrap().to_string())
            .collect();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, cookies, body)
    }

    /// 注册并登录，返回用户 ID 与请求用的 Cookie 头
    async fn signup(&self, username: &str) -> (String, String) {
        let email = format!("{}@example.com", username);
        let (status, _, body) = self
            .call(
                Method::POST,
                "/api/users/register",
                None,
                Some(json!({
                    "full_name": format!("{} Tester", username),
                    "username": username,
                    "email": email,
                    "password": "password1",
                    "confirm_password": "password1"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, cookies, _) = self
            .call(
                Method::POST,
                "/api/users/login",
                None,
                Some(json!({ "email": email, "password": "password1" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let cookie = cookies
            .iter()
            .filter_map(|c| c.split(';').next())
            .collect::<Vec<_>>()
            .join("; ");
        (id, cookie)
    }

    async fn count(&self, table: &str) -> usize {
        self.state.db.count(&Query::table(table)).await.unwrap()
    }
}

#[tokio::test]
async fn health_check_responds() {
    let app = TestApp::new().await;
    let (status, _, _) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn login_issues_http_only_session_cookies() {
    let app = TestApp::new().await;
    let (_, cookie) = app.signup("cookiemonster").await;
    assert!(cookie.contains("accessToken="));
    assert!(cookie.contains("refreshToken="));

    let (status, _, body) = app.call(Method::GET, "/api/users/account", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["email"], "cookiemonster@example.com");

    let (status, _, body) = app.call(Method::GET, "/api/users/account", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTHENTICATION_ERROR");

    let (status, cookies, _) = app.call(Method::POST, "/api/users/refresh", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(cookies[0].starts_with("accessToken="));
}

#[tokio::test]
async fn blocked_actor_is_vetoed_without_side_effects() {
    let app = TestApp::new().await;
    let (alice_id, alice) = app.signup("alice").await;
    let (bob_id, bob) = app.signup("bob").await;

    let (status, _, body) = app
        .call(
            Method::POST,
            "/api/publications",
            Some(&alice),
            Some(json!({ "content": "morning light", "hashtags": ["photo"] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let publication_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = app.call(Method::POST, "/api/users/bob/block", Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["blocked"], true);

    let notifications = app.count("notification").await;
    let messages = app.count("message").await;

    let (status, _, _) = app.call(Method::POST, "/api/users/alice/follow", Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = app
        .call(
            Method::POST,
            &format!("/api/publications/{}/reactions/inspiresMe", publication_id),
            Some(&bob),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = app
        .call(
            Method::POST,
            &format!("/api/publications/{}/comments", publication_id),
            Some(&bob),
            Some(json!({ "content": "lovely" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = app
        .call(
            Method::POST,
            &format!("/api/messages/{}", room_id(&alice_id, &bob_id)),
            Some(&bob),
            Some(json!({ "receiver": alice_id, "content": "hello?" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    assert_eq!(app.count("notification").await, notifications);
    assert_eq!(app.count("message").await, messages);
    assert_eq!(app.count("comment").await, 0);
}

#[tokio::test]
async fn follow_produces_a_notification_for_the_target() {
    let app = TestApp::new().await;
    let (_, alice) = app.signup("alicia").await;
    let (_, bob) = app.signup("roberto").await;

    let (status, _, body) = app.call(Method::POST, "/api/users/alicia/follow", Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["following"], true);

    let (status, _, body) = app.call(Method::GET, "/api/notifications", Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["data"]["notifications"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["content"], "roberto started following you");

    let (_, _, body) = app
        .call(Method::GET, "/api/notifications/unread-count", Some(&alice), None)
        .await;
    assert_eq!(body["data"]["unread"], 1);
}

#[tokio::test]
async fn soft_deleted_publication_is_hidden_but_kept() {
    let app = TestApp::new().await;
    let (_, alice) = app.signup("author").await;

    let (_, _, body) = app
        .call(
            Method::POST,
            "/api/publications",
            Some(&alice),
            Some(json!({ "content": "short lived" })),
        )
        .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/publications/{}", id);

    let (status, _, _) = app.call(Method::DELETE, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = app.call(Method::GET, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let stored: Publication = app
        .state
        .db
        .get_by_id(PUBLICATION_TABLE, &id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.deleted);
}

#[tokio::test]
async fn message_history_survives_without_live_connections() {
    let app = TestApp::new().await;
    let (alice_id, alice) = app.signup("sender").await;
    let (bob_id, bob) = app.signup("receiver").await;
    let room = room_id(&bob_id, &alice_id);

    let (status, _, body) = app
        .call(
            Method::POST,
            &format!("/api/messages/{}", room),
            Some(&alice),
            Some(json!({ "receiver": bob_id, "content": "are you there?" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let message_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _, body) = app
        .call(Method::GET, &format!("/api/messages/{}", room), Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "are you there?");

    for _ in 0..2 {
        let (status, _, body) = app
            .call(
                Method::PATCH,
                &format!("/api/messages/read/{}", message_id),
                Some(&bob),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["read"], true);
    }
    assert_eq!(app.count("message").await, 1);
}

#[tokio::test]
async fn admin_routes_require_the_admin_role() {
    let app = TestApp::new().await;
    let (_, user) = app.signup("regular").await;

    let (status, _, _) = app.call(Method::GET, "/api/admin/stats", Some(&user), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) = app.call(Method::GET, "/api/admin/stats", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_fields_are_rejected() {
    let app = TestApp::new().await;
    let (_, alice) = app.signup("strict").await;

    let (status, _, _) = app
        .call(
            Method::POST,
            "/api/publications",
            Some(&alice),
            Some(json!({ "content": "hello there", "author": "someone-else" })),
        )
        .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn spoofed_forwarded_for_does_not_reset_the_rate_limit() {
    let app = TestApp::with_config(Config {
        rate_limit_requests: 2,
        ..Config::default()
    })
    .await;

    let mut statuses = Vec::new();
    for i in 0..3 {
        let request = Request::builder()
            .uri("/api/notifications")
            .header("x-forwarded-for", format!("203.0.113.{}", i))
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        statuses.push(response.status());
    }

    assert_eq!(statuses[0], StatusCode::UNAUTHORIZED);
    assert_eq!(statuses[1], StatusCode::UNAUTHORIZED);
    assert_eq!(statuses[2], StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn mark_all_notifications_read_clears_the_unread_count() {
    let app = TestApp::new().await;
    let (_, star) = app.signup("celebrity").await;
    for name in ["fanone", "fantwo", "fanthree"] {
        let (_, fan) = app.signup(name).await;
        let (status, _, _) = app
            .call(Method::POST, "/api/users/celebrity/follow", Some(&fan), None)
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, _, body) = app
        .call(Method::GET, "/api/notifications/unread-count", Some(&star), None)
        .await;
    assert_eq!(body["data"]["unread"], 3);

    let (status, _, _) = app
        .call(Method::PATCH, "/api/notifications", Some(&star), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, _, body) = app
        .call(Method::GET, "/api/notifications/unread-count", Some(&star), None)
        .await;
    assert_eq!(body["data"]["unread"], 0);
}
