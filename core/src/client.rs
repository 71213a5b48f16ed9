use crate::auth::{AuthEvent, TokenStore};
use crate::config::ClientSettings;
use crate::error::{ClientError, ClientResult};
use crate::refresh::RefreshCoordinator;
use crate::session::{SessionHandle, SessionUpdate, StreamObserver, StreamSession};
use crate::transport::{ApiRequest, ReqwestTransport, Transport, TransportResponse};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// Per-request knobs.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    /// Attach the bearer token and recover from 401s. Off for login-type calls.
    pub authorized: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            query: Vec::new(),
            authorized: true,
        }
    }
}

impl RequestOptions {
    pub fn anonymous() -> Self {
        Self {
            authorized: false,
            ..Self::default()
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// The `{code, message, data, timestamp}` wrapper the backend puts around payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default = "default_code")]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

fn default_code() -> u16 {
    200
}

impl<T> ApiEnvelope<T> {
    pub fn into_data(self) -> ClientResult<T> {
        self.data
            .ok_or_else(|| ClientError::Protocol(format!("response carried no data: {}", self.message)))
    }
}

struct ClientInner {
    settings: ClientSettings,
    transport: Arc<dyn Transport>,
    coordinator: RefreshCoordinator,
}

/// Authorized JSON and streaming client. Clones share tokens and refresh state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Builds a `reqwest`-backed client, restoring saved credentials if configured.
    pub fn new(settings: ClientSettings) -> ClientResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(&settings)?);
        let tokens = match &settings.token_file {
            Some(path) => TokenStore::persistent(path.clone()),
            None => TokenStore::in_memory(),
        };
        Ok(Self::with_transport(settings, transport, tokens))
    }

    pub fn with_transport(
        settings: ClientSettings,
        transport: Arc<dyn Transport>,
        tokens: TokenStore,
    ) -> Self {
        let coordinator =
            RefreshCoordinator::new(transport.clone(), tokens, settings.refresh_path.clone());
        Self {
            inner: Arc::new(ClientInner {
                settings,
                transport,
                coordinator,
            }),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    pub fn tokens(&self) -> &TokenStore {
        self.inner.coordinator.tokens()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.coordinator.subscribe()
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> ClientResult<T> {
        let mut request = ApiRequest::new(method, path).with_query(options.query);
        request.body = body;
        debug!(method = %request.method, path, "sending request");
        let response = self.dispatch(request, options.authorized).await?;
        let status = response.status;
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(ClientError::http(status, text));
        }
        decode_payload(&text)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.request(Method::GET, path, None, RequestOptions::default())
            .await
    }

    pub async fn get_with<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> ClientResult<T> {
        self.request(Method::GET, path, None, options).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        let body = to_body(body)?;
        self.request(Method::POST, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        let body = to_body(body)?;
        self.request(Method::PUT, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> ClientResult<T> {
        self.request(Method::DELETE, path, None, options).await
    }

    /// POSTs `body` to `path` and feeds the response body to `observer`.
    ///
    /// Failures before the body starts (transport, non-2xx, auth) are returned
    /// here and are not reported to the observer.
    pub async fn open_stream(
        &self,
        path: &str,
        body: Value,
        observer: impl StreamObserver,
    ) -> ClientResult<SessionHandle> {
        let request = ApiRequest::new(Method::POST, path)
            .with_body(body)
            .streaming();
        let response = self.dispatch(request, true).await?;
        if !response.is_success() {
            let status = response.status;
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::http(status, text));
        }
        let body = response
            .into_body()
            .ok_or_else(|| ClientError::Protocol("stream response has no body".to_string()))?;
        let handle = StreamSession::start(body, observer);
        info!(path, session = %handle.id(), "stream opened");
        Ok(handle)
    }

    /// [`ApiClient::open_stream`] with the updates delivered over a channel.
    pub async fn open_event_channel(
        &self,
        path: &str,
        body: Value,
    ) -> ClientResult<(SessionHandle, mpsc::UnboundedReceiver<SessionUpdate>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.open_stream(path, body, tx).await?;
        Ok((handle, rx))
    }

    async fn dispatch(&self, request: ApiRequest, authorized: bool) -> ClientResult<TransportResponse> {
        if authorized {
            self.inner.coordinator.authorize_and_send(request).await
        } else {
            self.inner.transport.send(request).await
        }
    }
}

fn to_body<B: Serialize + ?Sized>(body: &B) -> ClientResult<Value> {
    serde_json::to_value(body)
        .map_err(|err| ClientError::Protocol(format!("request body is not serializable: {err}")))
}

/// Decodes a 2xx body, surfacing envelope-level business errors.
fn decode_payload<T: DeserializeOwned>(text: &str) -> ClientResult<T> {
    let value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
    };
    if let Some(code) = value.get("code").and_then(Value::as_u64) {
        if code != 200 && code != 201 {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string();
            return Err(ClientError::Http {
                status: u16::try_from(code).unwrap_or(u16::MAX),
                body: message,
            });
        }
    }
    serde_json::from_value(value)
        .map_err(|err| ClientError::Protocol(format!("unexpected response shape: {err}")))
}
