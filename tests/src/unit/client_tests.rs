use super::{client_for, signed_in, test_runtime};
use httpmock::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;
use triage_core::{ApiClient, ApiEnvelope, AuthEvent, ClientError, ClientSettings, ErrorKind, TokenStore};

fn refreshed_body() -> Value {
    json!({
        "code": 200,
        "message": "ok",
        "data": { "token": "fresh", "refreshToken": "r2", "expiresIn": 1800 }
    })
}

#[test]
fn attaches_bearer_token() {
    let server = MockServer::start();
    let profile = server.mock(|when, then| {
        when.method(GET)
            .path("/api/users/profile")
            .header("authorization", "Bearer t1");
        then.status(200)
            .json_body(json!({"code": 200, "data": {"username": "nurse", "role": "user"}}));
    });
    let dir = TempDir::new().expect("temp dir");
    let client = client_for(&server.base_url(), &dir);
    signed_in(&client, "t1", "r1");

    let runtime = test_runtime();
    let envelope: ApiEnvelope<Value> = runtime
        .block_on(client.get("/api/users/profile"))
        .expect("profile");

    assert_eq!(envelope.into_data().expect("data")["username"], "nurse");
    profile.assert_hits(1);
}

#[test]
fn bodiless_request_sends_no_content_type() {
    let server = MockServer::start();
    let sessions = server.mock(|when, then| {
        when.method(GET)
            .path("/api/chat/sessions")
            .header_missing("content-type");
        then.status(200).json_body(json!({"code": 200, "data": []}));
    });
    let dir = TempDir::new().expect("temp dir");
    let client = client_for(&server.base_url(), &dir);
    signed_in(&client, "t1", "r1");

    let runtime = test_runtime();
    let envelope: ApiEnvelope<Value> = runtime
        .block_on(client.get("/api/chat/sessions"))
        .expect("sessions");

    assert_eq!(envelope.into_data().expect("data"), json!([]));
    sessions.assert_hits(1);
}

#[test]
fn expired_token_is_refreshed_and_request_replayed() {
    let server = MockServer::start();
    let stale = server.mock(|when, then| {
        when.path("/api/triage/assess").header("authorization", "Bearer stale");
        then.status(401).json_body(json!({"detail": "Token expired"}));
    });
    let refresh = server.mock(|when, then| {
        when.method(POST)
            .path("/api/auth/refresh")
            .json_body(json!({"refreshToken": "r1", "refresh_token": "r1"}));
        then.status(200).json_body(refreshed_body());
    });
    let fresh = server.mock(|when, then| {
        when.path("/api/triage/assess").header("authorization", "Bearer fresh");
        then.status(200)
            .json_body(json!({"code": 200, "data": {"level": 2}}));
    });
    let dir = TempDir::new().expect("temp dir");
    let client = client_for(&server.base_url(), &dir);
    signed_in(&client, "stale", "r1");
    let mut events = client.subscribe();

    let runtime = test_runtime();
    let envelope: ApiEnvelope<Value> = runtime
        .block_on(client.post("/api/triage/assess", &json!({"symptoms": ["fever"]})))
        .expect("assessment after refresh");

    assert_eq!(envelope.into_data().expect("data")["level"], 2);
    stale.assert_hits(1);
    refresh.assert_hits(1);
    fresh.assert_hits(1);
    assert_eq!(events.try_recv(), Ok(AuthEvent::Refreshed));

    let persisted = TokenStore::persistent(dir.path().join("credentials.json"));
    let credentials = persisted.get().expect("refreshed credentials on disk");
    assert_eq!(credentials.access_token, "fresh");
    assert_eq!(credentials.refresh_token, "r2");
}

#[test]
fn concurrent_unauthorized_requests_share_one_refresh() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.header("authorization", "Bearer stale");
        then.status(401);
    });
    let refresh = server.mock(|when, then| {
        when.method(POST).path("/api/auth/refresh");
        then.status(200).json_body(refreshed_body());
    });
    let fresh = server.mock(|when, then| {
        when.method(GET)
            .path_includes("/api/knowledge/")
            .header("authorization", "Bearer fresh");
        then.status(200).json_body(json!({"code": 200, "data": {}}));
    });
    let dir = TempDir::new().expect("temp dir");
    let client = client_for(&server.base_url(), &dir);
    signed_in(&client, "stale", "r1");

    let runtime = test_runtime();
    let results = runtime.block_on(async {
        let calls = (0..4).map(|i| {
            let client = client.clone();
            async move { client.get::<Value>(&format!("/api/knowledge/{i}")).await }
        });
        futures::future::join_all(calls).await
    });

    assert!(results.iter().all(Result::is_ok), "{results:?}");
    refresh.assert_hits(1);
    fresh.assert_hits(4);
}

#[test]
fn rejected_refresh_signs_everyone_out() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.header("authorization", "Bearer stale");
        then.status(401);
    });
    let refresh = server.mock(|when, then| {
        when.method(POST).path("/api/auth/refresh");
        then.status(401).json_body(json!({"detail": "Invalid refresh token"}));
    });
    let dir = TempDir::new().expect("temp dir");
    let client = client_for(&server.base_url(), &dir);
    signed_in(&client, "stale", "r1");
    let mut events = client.subscribe();

    let runtime = test_runtime();
    let results = runtime.block_on(async {
        let first = client.get::<Value>("/api/chat/sessions");
        let second = client.get::<Value>("/api/users/profile");
        futures::join!(first, second)
    });

    for result in [results.0, results.1] {
        let err = result.expect_err("refresh failed");
        assert!(err.is_auth(), "{err:?}");
    }
    refresh.assert_hits(1);
    assert!(!client.tokens().has_token());
    assert!(!dir.path().join("credentials.json").exists());
    assert!(matches!(events.try_recv(), Ok(AuthEvent::SessionExpired { .. })));
}

#[test]
fn forbidden_is_not_refreshed() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/api/admin/users");
        then.status(403).json_body(json!({"detail": "Admin only"}));
    });
    let refresh = server.mock(|when, then| {
        when.path("/api/auth/refresh");
        then.status(200).json_body(refreshed_body());
    });
    let dir = TempDir::new().expect("temp dir");
    let client = client_for(&server.base_url(), &dir);
    signed_in(&client, "t1", "r1");

    let runtime = test_runtime();
    let err = runtime
        .block_on(client.get::<Value>("/api/admin/users"))
        .expect_err("forbidden");

    assert_eq!(err.kind(), ErrorKind::Forbidden);
    refresh.assert_hits(0);
    assert!(client.tokens().has_token());
}

#[test]
fn unreachable_server_is_a_network_error() {
    let settings = ClientSettings {
        token_file: None,
        ..ClientSettings::default()
    }
    .with_base_url("http://127.0.0.1:9");
    let client = ApiClient::new(settings).expect("client");

    let runtime = test_runtime();
    let err = runtime
        .block_on(client.get::<Value>("/api/system/health"))
        .expect_err("nothing listens on the discard port");
    assert!(matches!(err, ClientError::Network(_)), "{err:?}");
}
