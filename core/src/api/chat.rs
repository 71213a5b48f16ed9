use crate::client::{ApiClient, ApiEnvelope, RequestOptions};
use crate::error::ClientResult;
use crate::session::{SessionHandle, StreamObserver};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Retrieval backend used to answer a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Knowledge-base retrieval.
    #[default]
    Kb,
    /// Knowledge-graph retrieval.
    Graph,
}

impl ChatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatMode::Kb => "kb",
            ChatMode::Graph => "graph",
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kb" => Ok(ChatMode::Kb),
            "graph" => Ok(ChatMode::Graph),
            other => Err(format!("unknown chat mode `{other}` (expected kb or graph)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "last_message")]
    pub last_message: Option<String>,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<String>,
    #[serde(default, alias = "updated_at")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, deserialize_with = "crate::stream::string_or_number")]
    pub id: Option<String>,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub references: Vec<Value>,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<String>,
}

#[derive(Clone)]
pub struct ChatApi {
    client: ApiClient,
}

impl ChatApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn list_sessions(&self, mode: ChatMode) -> ClientResult<Vec<ChatSession>> {
        let envelope: ApiEnvelope<Vec<ChatSession>> = self
            .client
            .get_with(
                "/api/chat/sessions",
                RequestOptions::default().query("mode", mode.as_str()),
            )
            .await?;
        Ok(envelope.data.unwrap_or_default())
    }

    pub async fn session_messages(&self, session_id: &str) -> ClientResult<Vec<ChatMessage>> {
        let envelope: ApiEnvelope<Vec<ChatMessage>> = self
            .client
            .get(&format!("/api/chat/sessions/{session_id}"))
            .await?;
        Ok(envelope.data.unwrap_or_default())
    }

    pub async fn create_session(&self, title: &str, mode: ChatMode) -> ClientResult<ChatSession> {
        let envelope: ApiEnvelope<ChatSession> = self
            .client
            .post("/api/chat/sessions", &json!({ "title": title, "mode": mode }))
            .await?;
        envelope.into_data()
    }

    pub async fn delete_session(&self, session_id: &str) -> ClientResult<()> {
        let _: Value = self
            .client
            .delete(
                &format!("/api/chat/sessions/{session_id}"),
                RequestOptions::default(),
            )
            .await?;
        Ok(())
    }

    /// Deletes every session of `mode`.
    pub async fn clear_sessions(&self, mode: ChatMode) -> ClientResult<()> {
        let _: Value = self
            .client
            .delete(
                "/api/chat/sessions",
                RequestOptions::default().query("mode", mode.as_str()),
            )
            .await?;
        Ok(())
    }

    /// Streams the assistant's reply to `content` within an existing session.
    pub async fn send_message_stream(
        &self,
        session_id: &str,
        content: &str,
        mode: ChatMode,
        observer: impl StreamObserver,
    ) -> ClientResult<SessionHandle> {
        self.client
            .open_stream(
                &format!("/api/chat/sessions/{session_id}/messages"),
                json!({ "content": content, "mode": mode }),
                observer,
            )
            .await
    }

    /// Like [`ChatApi::send_message_stream`], letting the backend create the session.
    /// The new session arrives as a `session_info` event.
    pub async fn send_message_auto_session(
        &self,
        content: &str,
        mode: ChatMode,
        observer: impl StreamObserver,
    ) -> ClientResult<SessionHandle> {
        self.client
            .open_stream(
                "/api/chat/messages",
                json!({ "content": content, "mode": mode }),
                observer,
            )
            .await
    }
}
