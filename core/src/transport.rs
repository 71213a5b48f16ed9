use crate::config::ClientSettings;
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

pub type ByteStream = BoxStream<'static, ClientResult<Bytes>>;

/// A request as handed to the wire, before and after token attachment.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub bearer: Option<String>,
    /// The body will be consumed incrementally; no whole-request timeout applies.
    pub streaming: bool,
    pub(crate) retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            bearer: None,
            streaming: false,
            retried: false,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }
}

/// Status line plus an unread body.
pub struct TransportResponse {
    pub status: u16,
    body: Option<ByteStream>,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl TransportResponse {
    pub fn new(status: u16, body: ByteStream) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }

    pub fn without_body(status: u16) -> Self {
        Self { status, body: None }
    }

    pub fn from_text(status: u16, text: impl Into<String>) -> Self {
        let bytes = Bytes::from(text.into());
        Self::new(status, stream::once(async move { Ok(bytes) }).boxed())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn into_body(self) -> Option<ByteStream> {
        self.body
    }

    /// Reads the whole body. A missing body reads as empty.
    pub async fn text(self) -> ClientResult<String> {
        let Some(mut body) = self.body else {
            return Ok(String::new());
        };
        let mut collected = Vec::new();
        while let Some(chunk) = body.next().await {
            collected.extend_from_slice(&chunk?);
        }
        String::from_utf8(collected)
            .map_err(|err| ClientError::Protocol(format!("response is not UTF-8: {err}")))
    }
}

/// The seam between the client and the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> ClientResult<TransportResponse>;
}

/// `reqwest`-backed transport used outside of tests.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(settings: &ClientSettings) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: normalize_base_url(&settings.base_url),
            timeout: settings.timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> ClientResult<TransportResponse> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url_for(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if request.streaming {
            builder = builder.header(ACCEPT, "text/event-stream");
        } else {
            builder = builder.timeout(self.timeout);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from))
            .boxed();
        Ok(TransportResponse::new(status, body))
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
