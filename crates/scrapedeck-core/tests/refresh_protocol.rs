mod common;

use std::time::Duration;

use common::{admin_user, bearer, harness};
use scrapedeck_core::auth::CredentialStore;
use scrapedeck_core::{ApiError, SessionState};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn files_body() -> serde_json::Value {
    json!({
        "success": true,
        "files": [{"name": "example.json", "size": 1024, "createdAt": "2024-04-10T08:30:00Z"}]
    })
}

async fn mount_refresh(server: &MockServer, body: serde_json::Value, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn valid_credential_never_refreshes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .and(header("authorization", bearer("good-token").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_body()))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, json!({"success": true, "accessToken": "unused"}), 0).await;

    let h = harness(&server, Some("good-token"));
    let files = h.console.api.list_files().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "example.json");
}

#[tokio::test]
async fn non_auth_failures_pass_through_without_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files/missing.json"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "File not found"})))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, json!({"success": true, "accessToken": "unused"}), 0).await;

    let h = harness(&server, Some("good-token"));
    let err = h.console.api.get_file("missing.json").await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
    assert_eq!(err.user_message("fallback"), "File not found");
}

#[tokio::test]
async fn expired_credential_is_refreshed_and_me_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me"))
        .and(header("authorization", bearer("expired-token").as_str()))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me"))
        .and(header("authorization", bearer("new-token").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "user": admin_user()})))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, json!({"success": true, "accessToken": "new-token"}), 1).await;

    let h = harness(&server, Some("expired-token"));
    let state = h.console.session.resolve_session().await;

    match state {
        SessionState::Authenticated(identity) => {
            assert_eq!(identity.id, 1);
            assert_eq!(identity.username, "admin");
        }
        other => panic!("expected authenticated session, got {:?}", other),
    }
    assert_eq!(h.credentials.access_token().unwrap().as_deref(), Some("new-token"));
    assert!(h.navigator.visits().is_empty());
}

#[tokio::test]
async fn forbidden_also_triggers_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .and(header("authorization", bearer("old").as_str()))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .and(header("authorization", bearer("fresh").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_body()))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, json!({"success": true, "accessToken": "fresh"}), 1).await;

    let h = harness(&server, Some("old"));
    assert_eq!(h.console.api.list_files().await.unwrap().len(), 1);
}

#[tokio::test]
async fn persistent_rejection_is_retried_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(&server, json!({"success": true, "accessToken": "new-token"}), 1).await;

    let h = harness(&server, Some("expired-token"));
    let err = h.console.api.list_files().await.unwrap_err();

    assert!(matches!(err, ApiError::Unauthorized(_)));
    // The refresh itself succeeded, so the session is not torn down
    assert_eq!(h.credentials.access_token().unwrap().as_deref(), Some("new-token"));
    assert!(h.navigator.visits().is_empty());
}

#[tokio::test]
async fn new_credential_replaces_old_for_later_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .and(header("authorization", bearer("old").as_str()))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .and(header("authorization", bearer("new").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_body()))
        .expect(3)
        .mount(&server)
        .await;
    mount_refresh(&server, json!({"success": true, "accessToken": "new"}), 1).await;

    let h = harness(&server, Some("old"));
    for _ in 0..3 {
        h.console.api.list_files().await.unwrap();
    }
}

#[tokio::test]
async fn refresh_rejection_ends_session_and_redirects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me"))
        .and(header("authorization", bearer("tok").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "user": admin_user()})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(&server, json!({"success": false}), 1).await;

    let h = harness(&server, Some("tok"));
    assert!(matches!(h.console.session.resolve_session().await, SessionState::Authenticated(_)));

    let err = h.console.api.list_files().await.unwrap_err();

    assert!(matches!(err, ApiError::RefreshFailed(_)));
    assert_eq!(h.credentials.access_token().unwrap(), None);
    assert_eq!(h.console.session.state(), SessionState::Anonymous);
    assert_eq!(h.navigator.visits(), vec!["/login".to_string()]);

    // A later request goes out bare and does not start another refresh
    let err = h.console.api.list_files().await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized(_)));
    let requests = server.received_requests().await.unwrap();
    let last_files = requests
        .iter()
        .rev()
        .find(|r| r.url.path() == "/api/files")
        .expect("follow-up request should have been sent");
    assert!(!last_files.headers.contains_key("authorization"));
    assert_eq!(h.navigator.visits().len(), 1);
}

#[tokio::test]
async fn anonymous_session_is_not_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, json!({"success": true, "accessToken": "ghost"}), 0).await;

    let h = harness(&server, None);
    assert_eq!(h.console.session.resolve_session().await, SessionState::Anonymous);

    let err = h.console.api.list_files().await.unwrap_err();

    assert!(matches!(err, ApiError::Unauthorized(_)));
    assert_eq!(h.credentials.access_token().unwrap(), None);
    assert_eq!(h.console.session.state(), SessionState::Anonymous);
    assert!(h.navigator.visits().is_empty());
}

#[tokio::test]
async fn refresh_finishing_after_logout_is_discarded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "user": admin_user()})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "accessToken": "late-token"}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, Some("tok"));
    assert!(matches!(h.console.session.resolve_session().await, SessionState::Authenticated(_)));

    let (result, ()) = tokio::join!(h.console.api.list_files(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.console.session.logout().await;
    });

    assert!(matches!(result, Err(ApiError::RefreshFailed(_))));
    assert_eq!(h.credentials.access_token().unwrap(), None);
    assert_eq!(h.console.session.state(), SessionState::Anonymous);
    // Logout was deliberate, so there is no redirect
    assert!(h.navigator.visits().is_empty());
}

#[tokio::test]
async fn refresh_server_error_ends_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, Some("tok"));
    let err = h.console.api.list_files().await.unwrap_err();

    assert!(matches!(err, ApiError::RefreshFailed(_)));
    assert_eq!(h.credentials.access_token().unwrap(), None);
    assert_eq!(h.navigator.visits(), vec!["/login".to_string()]);
}

#[tokio::test]
async fn malformed_refresh_payload_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, Some("tok"));
    let err = h.console.api.list_files().await.unwrap_err();
    assert!(matches!(err, ApiError::RefreshFailed(_)));
    assert_eq!(h.credentials.access_token().unwrap(), None);
}

#[tokio::test]
async fn refresh_sends_no_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .and(header("authorization", bearer("expired").as_str()))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .and(header("authorization", bearer("renewed").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_body()))
        .mount(&server)
        .await;
    mount_refresh(&server, json!({"success": true, "accessToken": "renewed"}), 1).await;

    let h = harness(&server, Some("expired"));
    h.console.api.list_files().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let refresh = requests
        .iter()
        .find(|r| r.url.path() == "/api/auth/refresh-token")
        .expect("refresh request should have been sent");
    assert!(!refresh.headers.contains_key("authorization"));
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .and(header("authorization", bearer("stale").as_str()))
        .respond_with(ResponseTemplate::new(401))
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .and(header("authorization", bearer("shared").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_body()))
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "accessToken": "shared"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, Some("stale"));
    let calls = (0..5).map(|_| h.console.api.list_files());
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(h.credentials.access_token().unwrap().as_deref(), Some("shared"));
}

#[tokio::test]
async fn concurrent_waiters_all_observe_refresh_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .respond_with(ResponseTemplate::new(401))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"success": false}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, Some("stale"));
    let calls = (0..3).map(|_| h.console.api.list_files());
    let results = futures::future::join_all(calls).await;

    assert!(results
        .iter()
        .all(|r| matches!(r, Err(ApiError::RefreshFailed(_)))));
    assert_eq!(h.navigator.visits().len(), 1);
}

#[tokio::test]
async fn rate_limited_requests_back_off_and_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(files_body()))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server, Some("tok"));
    assert_eq!(h.console.api.list_files().await.unwrap().len(), 1);
}

#[tokio::test]
async fn rate_limit_gives_up_after_configured_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/files"))
        .respond_with(ResponseTemplate::new(429))
        .expect(4)
        .mount(&server)
        .await;

    let h = harness(&server, Some("tok"));
    let err = h.console.api.list_files().await.unwrap_err();
    assert!(matches!(err, ApiError::RateLimited));
}
