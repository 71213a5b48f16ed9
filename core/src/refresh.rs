//! Single-flight recovery from expired access tokens.
//!
//! The first request that sees a 401 becomes the refresh leader. Requests that
//! hit 401 while the leader's refresh call is outstanding wait in a FIFO queue
//! and are handed the outcome when it settles. Every replay is marked as
//! retried; a retried request that is still rejected is an authentication
//! failure, never another refresh.

use crate::auth::{auth_channel, AuthEvent, Credentials, TokenStore};
use crate::error::{ClientError, ClientResult};
use crate::transport::{ApiRequest, Transport, TransportResponse};
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

const UNAUTHORIZED: u16 = 401;

/// A caller parked behind an in-flight refresh.
struct PendingRequest {
    ticket: u64,
    responder: oneshot::Sender<ClientResult<String>>,
}

#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    queue: VecDeque<PendingRequest>,
    next_ticket: u64,
}

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    tokens: TokenStore,
    refresh_path: String,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<AuthEvent>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: TokenStore,
        refresh_path: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            tokens,
            refresh_path: refresh_path.into(),
            state: Mutex::new(RefreshState::default()),
            events: auth_channel(),
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.lock().refreshing
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Stores credentials obtained from a login.
    pub fn sign_in(&self, credentials: Credentials) {
        self.tokens.set(credentials);
        self.emit(AuthEvent::SignedIn);
    }

    pub fn sign_out(&self) {
        self.tokens.clear();
        self.emit(AuthEvent::SignedOut);
    }

    /// Sends `request` with the current access token, recovering once from a 401.
    pub async fn authorize_and_send(&self, mut request: ApiRequest) -> ClientResult<TransportResponse> {
        request.bearer = self.tokens.access_token();
        let response = self.transport.send(request.clone()).await?;
        if response.status != UNAUTHORIZED {
            return Ok(response);
        }
        if request.retried {
            return Err(self.reject_retry(&request));
        }
        drop(response);

        let token = self.fresh_token(request.bearer.as_deref()).await?;
        request.retried = true;
        request.bearer = Some(token);
        debug!(method = %request.method, path = %request.path, "replaying request with refreshed token");
        let response = self.transport.send(request.clone()).await?;
        if response.status == UNAUTHORIZED {
            return Err(self.reject_retry(&request));
        }
        Ok(response)
    }

    /// Returns a token newer than `stale`, refreshing only if nobody else is.
    async fn fresh_token(&self, stale: Option<&str>) -> ClientResult<String> {
        loop {
            let waiter = {
                let mut state = self.state.lock();
                if state.refreshing {
                    let (responder, rx) = oneshot::channel();
                    let ticket = state.next_ticket;
                    state.next_ticket += 1;
                    state.queue.push_back(PendingRequest { ticket, responder });
                    debug!(ticket, queued = state.queue.len(), "waiting on in-flight token refresh");
                    Some(rx)
                } else {
                    // Another request already refreshed after this one was sent.
                    if let Some(current) = self.tokens.access_token() {
                        if Some(current.as_str()) != stale {
                            return Ok(current);
                        }
                    }
                    state.refreshing = true;
                    None
                }
            };

            match waiter {
                Some(rx) => match rx.await {
                    Ok(outcome) => return outcome,
                    // The leader was dropped mid-refresh; compete to lead again.
                    Err(_) => continue,
                },
                None => break,
            }
        }

        let mut guard = RefreshGuard {
            coordinator: self,
            armed: true,
        };
        let outcome = self.refresh().await;
        guard.armed = false;
        self.settle(outcome)
    }

    async fn refresh(&self) -> ClientResult<Credentials> {
        let refresh_token = self
            .tokens
            .refresh_token()
            .ok_or_else(|| ClientError::Auth("no refresh token available".to_string()))?;
        info!(path = %self.refresh_path, "refreshing access token");
        let request = ApiRequest::new(Method::POST, self.refresh_path.clone())
            // The backend reads `refresh_token`; camelCase matches the rest of the client payloads.
            .with_body(json!({ "refreshToken": &refresh_token, "refresh_token": &refresh_token }));
        let response = self.transport.send(request).await?;
        let status = response.status;
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(ClientError::Auth(format!(
                "refresh endpoint returned HTTP {status}"
            )));
        }
        parse_refresh_response(&body)
    }

    fn settle(&self, outcome: ClientResult<Credentials>) -> ClientResult<String> {
        match outcome {
            Ok(credentials) => {
                let token = credentials.access_token.clone();
                self.tokens.set(credentials);
                let waiters = self.finish();
                info!(replayed = waiters.len(), "access token refreshed");
                for waiter in waiters {
                    debug!(ticket = waiter.ticket, "releasing queued request");
                    let _ = waiter.responder.send(Ok(token.clone()));
                }
                self.emit(AuthEvent::Refreshed);
                Ok(token)
            }
            Err(err) => {
                let err = match err {
                    ClientError::Auth(_) => err,
                    other => ClientError::Auth(format!("token refresh failed: {other}")),
                };
                self.tokens.clear();
                let waiters = self.finish();
                warn!(%err, rejected = waiters.len(), "token refresh failed");
                for waiter in waiters {
                    let _ = waiter.responder.send(Err(err.clone()));
                }
                self.emit(AuthEvent::SessionExpired {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn finish(&self) -> VecDeque<PendingRequest> {
        let mut state = self.state.lock();
        state.refreshing = false;
        std::mem::take(&mut state.queue)
    }

    fn reject_retry(&self, request: &ApiRequest) -> ClientError {
        let err = ClientError::Auth(format!(
            "{} {} still unauthorized after token refresh",
            request.method, request.path
        ));
        warn!(%err, "giving up on request");
        self.tokens.clear();
        self.emit(AuthEvent::SessionExpired {
            reason: err.to_string(),
        });
        err
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Releases the refresh slot if the leading future is dropped before settling.
struct RefreshGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let waiters = self.coordinator.finish();
            warn!(waiting = waiters.len(), "token refresh abandoned");
        }
    }
}

fn parse_refresh_response(body: &str) -> ClientResult<Credentials> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| ClientError::Auth(format!("refresh response is not JSON: {err}")))?;
    let payload = value
        .get("data")
        .filter(|data| data.is_object())
        .unwrap_or(&value);
    let access = first_str(payload, &["accessToken", "access_token", "token"]);
    let refresh = first_str(payload, &["refreshToken", "refresh_token"]);
    let expires_in = ["expiresIn", "expires_in"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_i64));
    match (access, refresh) {
        (Some(access), Some(refresh)) => {
            Ok(Credentials::new(access, refresh).expiring_in(expires_in))
        }
        _ => Err(ClientError::Auth(
            "refresh response did not carry an access/refresh token pair".to_string(),
        )),
    }
}

fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}
