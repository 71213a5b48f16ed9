use super::{client_for, signed_in, test_runtime};
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use triage_core::{
    ChatApi, ChatMode, ReplyAccumulator, SessionUpdate, StreamEventKind,
};
use tokio::sync::mpsc;

const TRANSCRIPT: &str = concat!(
    "data: {\"type\":\"session_info\",\"data\":{\"session_id\":\"s-9\",\"title\":\"Chest pain\"}}\n\n",
    "data: {\"type\":\"thinking\",\"content\":\"Checking red flags\"}\n\n",
    "data: {\"type\":\"answer_start\",\"message_id\":41}\n\n",
    "data: {\"type\":\"answer\",\"content\":\"Seek emergency care \"}\n\n",
    "data: {\"type\":\"answer\",\"content\":\"now.\"}\n\n",
    "data: {\"type\":\"usage\",\"data\":{\"total_tokens\":120}}\n\n",
    "data: {\"type\":\"done\"}\n\n",
);

async fn collect(mut rx: mpsc::UnboundedReceiver<SessionUpdate>) -> (ReplyAccumulator, Vec<SessionUpdate>) {
    let mut reply = ReplyAccumulator::new();
    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        if let SessionUpdate::Event(event) = &update {
            reply.apply(event);
        }
        updates.push(update);
    }
    (reply, updates)
}

#[test]
fn streams_a_reply_in_a_new_session() {
    let server = MockServer::start();
    let stream = server.mock(|when, then| {
        when.method(POST)
            .path("/api/chat/messages")
            .header("authorization", "Bearer t1")
            .header("accept", "text/event-stream")
            .json_body(json!({"content": "crushing chest pain", "mode": "kb"}));
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(TRANSCRIPT);
    });
    let dir = TempDir::new().expect("temp dir");
    let client = client_for(&server.base_url(), &dir);
    signed_in(&client, "t1", "r1");
    let chat = ChatApi::new(client);

    let runtime = test_runtime();
    let (reply, updates) = runtime.block_on(async {
        let (tx, rx) = mpsc::unbounded_channel();
        chat.send_message_auto_session("crushing chest pain", ChatMode::Kb, tx)
            .await
            .expect("stream opens");
        collect(rx).await
    });

    stream.assert_hits(1);
    assert_eq!(reply.answer, "Seek emergency care now.");
    assert_eq!(reply.thinking, "Checking red flags");
    assert_eq!(reply.message_id.as_deref(), Some("41"));
    assert_eq!(reply.session.as_ref().map(|s| s["session_id"].clone()), Some(json!("s-9")));
    assert!(reply.finished);
    assert_eq!(updates.last(), Some(&SessionUpdate::Completed));
    assert_eq!(
        updates
            .iter()
            .filter(|u| matches!(u, SessionUpdate::Completed | SessionUpdate::Failed(_)))
            .count(),
        1
    );
}

#[test]
fn stream_open_refreshes_an_expired_token() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/api/chat/sessions/s-1/messages")
            .header("authorization", "Bearer stale");
        then.status(401);
    });
    let refresh = server.mock(|when, then| {
        when.method(POST).path("/api/auth/refresh");
        then.status(200).json_body(json!({
            "code": 200,
            "data": {"token": "fresh", "refreshToken": "r2"}
        }));
    });
    server.mock(|when, then| {
        when.path("/api/chat/sessions/s-1/messages")
            .header("authorization", "Bearer fresh");
        then.status(200)
            .body("data: {\"type\":\"answer\",\"content\":\"ok\"}\n\ndata: {\"type\":\"done\"}\n\n");
    });
    let dir = TempDir::new().expect("temp dir");
    let client = client_for(&server.base_url(), &dir);
    signed_in(&client, "stale", "r1");
    let chat = ChatApi::new(client);

    let runtime = test_runtime();
    let (reply, _) = runtime.block_on(async {
        let (tx, rx) = mpsc::unbounded_channel();
        chat.send_message_stream("s-1", "follow up", ChatMode::Graph, tx)
            .await
            .expect("stream opens after refresh");
        collect(rx).await
    });

    refresh.assert_hits(1);
    assert_eq!(reply.answer, "ok");
}

#[test]
fn server_error_event_ends_the_stream() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/api/chat/messages");
        then.status(200).body(concat!(
            "data: {\"type\":\"answer\",\"content\":\"partial\"}\n\n",
            "data: {\"type\":\"error\",\"message\":\"LLM backend unavailable\"}\n\n",
            "data: {\"type\":\"answer\",\"content\":\"never shown\"}\n\n",
        ));
    });
    let dir = TempDir::new().expect("temp dir");
    let client = client_for(&server.base_url(), &dir);
    signed_in(&client, "t1", "r1");
    let chat = ChatApi::new(client);

    let runtime = test_runtime();
    let (reply, updates) = runtime.block_on(async {
        let (tx, rx) = mpsc::unbounded_channel();
        chat.send_message_auto_session("hi", ChatMode::Kb, tx)
            .await
            .expect("stream opens");
        collect(rx).await
    });

    assert_eq!(reply.answer, "partial");
    assert_eq!(reply.error.as_deref(), Some("LLM backend unavailable"));
    let kinds: Vec<_> = updates
        .iter()
        .filter_map(|u| match u {
            SessionUpdate::Event(e) => Some(e.kind),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![StreamEventKind::Answer, StreamEventKind::Error]);
    assert_eq!(updates.last(), Some(&SessionUpdate::Completed));
}

#[test]
fn rejected_stream_request_is_returned_not_streamed() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/api/chat/sessions/gone/messages");
        then.status(404).json_body(json!({"detail": "Chat session not found"}));
    });
    let dir = TempDir::new().expect("temp dir");
    let client = client_for(&server.base_url(), &dir);
    signed_in(&client, "t1", "r1");
    let chat = ChatApi::new(client);

    let runtime = test_runtime();
    let (result, mut rx) = runtime.block_on(async {
        let (tx, rx) = mpsc::unbounded_channel();
        let result = chat.send_message_stream("gone", "hi", ChatMode::Kb, tx).await;
        (result, rx)
    });

    let err = result.err().expect("404 surfaces at open");
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.user_message(), "The requested resource does not exist.");
    assert!(rx.try_recv().is_err());
}
