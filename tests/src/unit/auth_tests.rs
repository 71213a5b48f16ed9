use super::{client_for, test_runtime};
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use triage_core::{AuthApi, SessionGate};

fn login_body() -> serde_json::Value {
    json!({
        "code": 200,
        "message": "Login successful",
        "data": {
            "access_token": "a1",
            "refresh_token": "r1",
            "token_type": "bearer",
            "expires_in": 1800,
            "user": { "id": "u-1", "username": "dr.lee", "role": "admin", "realName": "Dr. Lee" }
        }
    })
}

#[test]
fn login_persists_tokens_for_the_next_process() {
    let server = MockServer::start();
    let login = server.mock(|when, then| {
        when.method(POST)
            .path("/api/auth/login")
            .json_body(json!({"username": "dr.lee", "password": "pw"}));
        then.status(200).json_body(login_body());
    });
    let profile = server.mock(|when, then| {
        when.method(GET)
            .path("/api/users/profile")
            .header("authorization", "Bearer a1");
        then.status(200).json_body(json!({
            "code": 200,
            "data": { "id": "u-1", "username": "dr.lee", "role": "admin" }
        }));
    });
    let dir = TempDir::new().expect("temp dir");
    let runtime = test_runtime();

    let first = client_for(&server.base_url(), &dir);
    let user = runtime
        .block_on(AuthApi::new(first).login("dr.lee", "pw"))
        .expect("login")
        .expect("user");
    assert_eq!(user.display_name(), "Dr. Lee");
    login.assert_hits(1);

    // A fresh client restores the session from disk.
    let gate = SessionGate::new(client_for(&server.base_url(), &dir));
    assert!(runtime.block_on(gate.initialize()));
    assert!(gate.has_role("admin"));
    assert!(!gate.has_role("super_admin"));
    profile.assert_hits(1);

    gate.logout();
    assert!(!gate.is_logged_in());
    assert!(!dir.path().join("credentials.json").exists());
}

#[test]
fn failed_login_leaves_no_credentials() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/auth/login");
        then.status(401)
            .json_body(json!({"detail": "Incorrect username or password"}));
    });
    let refresh = server.mock(|when, then| {
        when.path("/api/auth/refresh");
        then.status(200);
    });
    let dir = TempDir::new().expect("temp dir");
    let client = client_for(&server.base_url(), &dir);

    let runtime = test_runtime();
    let err = runtime
        .block_on(AuthApi::new(client.clone()).login("dr.lee", "wrong"))
        .expect_err("bad password");

    assert_eq!(err.status(), Some(401));
    refresh.assert_hits(0);
    assert!(!client.tokens().has_token());
}
