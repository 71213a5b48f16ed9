//! Decoding of the `data: <json>` line protocol used by the chat endpoints.
//!
//! The server writes one JSON event per line. Network chunks do not respect
//! line boundaries, so the parser keeps the unterminated tail of the last chunk
//! and only decodes a frame once its newline has arrived.

use crate::error::{ClientError, ClientResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const DATA_PREFIX: &str = "data: ";
const SNIPPET_LEN: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    Thinking,
    AnswerStart,
    Answer,
    Done,
    Error,
    UserMessage,
    AssistantMessage,
    Usage,
    SessionInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: StreamEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StreamEvent {
    pub fn new(kind: StreamEventKind) -> Self {
        Self {
            kind,
            content: None,
            message_id: None,
            data: None,
            message: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// `done` and `error` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, StreamEventKind::Done | StreamEventKind::Error)
    }
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Incremental decoder for one stream. Not reusable across streams.
#[derive(Debug, Default)]
pub struct StreamEventParser {
    buffer: String,
    // Trailing bytes of a UTF-8 sequence split across chunks.
    pending: Vec<u8>,
}

impl StreamEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and decodes every frame whose line terminator has now
    /// been seen. Malformed frames come back as `ClientError::Parse` in place.
    pub fn feed(&mut self, chunk: &str) -> Vec<ClientResult<StreamEvent>> {
        self.buffer.push_str(chunk);
        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let tail = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, tail);
        complete.split('\n').filter_map(parse_frame).collect()
    }

    /// Byte-oriented `feed` that tolerates multi-byte characters split across chunks.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<ClientResult<StreamEvent>> {
        self.pending.extend_from_slice(chunk);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Incomplete character at the end; wait for the next chunk.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
        self.feed(&text)
    }

    /// Decodes a trailing frame that was never newline-terminated, then empties
    /// the buffer.
    pub fn flush(&mut self) -> Option<StreamEvent> {
        if !self.pending.is_empty() {
            let rest = String::from_utf8_lossy(&self.pending).into_owned();
            self.buffer.push_str(&rest);
            self.pending.clear();
        }
        let tail = std::mem::take(&mut self.buffer);
        match parse_frame(&tail)? {
            Ok(event) => Some(event),
            Err(err) => {
                tracing::warn!(%err, "dropping unterminated stream frame");
                None
            }
        }
    }

    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending.clear();
    }
}

fn parse_frame(line: &str) -> Option<ClientResult<StreamEvent>> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    Some(serde_json::from_str(payload).map_err(|err| {
        ClientError::Parse(format!("{err} in `{}`", snippet(payload)))
    }))
}

fn snippet(payload: &str) -> String {
    if payload.chars().count() <= SNIPPET_LEN {
        return payload.to_string();
    }
    let mut acc: String = payload.chars().take(SNIPPET_LEN).collect();
    acc.push('…');
    acc
}

/// Folds a chat stream into the pieces a chat view renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyAccumulator {
    pub thinking: String,
    pub answer: String,
    pub message_id: Option<String>,
    pub session: Option<Value>,
    pub user_message: Option<Value>,
    pub assistant_message: Option<Value>,
    pub usage: Option<Value>,
    pub error: Option<String>,
    pub finished: bool,
}

impl ReplyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &StreamEvent) {
        match event.kind {
            StreamEventKind::Thinking => {
                if let Some(content) = &event.content {
                    self.thinking.push_str(content);
                }
            }
            StreamEventKind::AnswerStart => {
                if event.message_id.is_some() {
                    self.message_id = event.message_id.clone();
                }
            }
            StreamEventKind::Answer => {
                if let Some(content) = &event.content {
                    self.answer.push_str(content);
                }
            }
            StreamEventKind::SessionInfo => self.session = event.data.clone(),
            StreamEventKind::UserMessage => self.user_message = event.data.clone(),
            StreamEventKind::AssistantMessage => self.assistant_message = event.data.clone(),
            StreamEventKind::Usage => self.usage = event.data.clone(),
            StreamEventKind::Done => {
                if self.answer.is_empty() {
                    if let Some(content) = &event.content {
                        self.answer.push_str(content);
                    }
                }
                self.finished = true;
            }
            StreamEventKind::Error => {
                self.error = Some(
                    event
                        .message
                        .clone()
                        .or_else(|| event.content.clone())
                        .unwrap_or_else(|| "stream reported an error".to_string()),
                );
                self.finished = true;
            }
        }
    }
}
