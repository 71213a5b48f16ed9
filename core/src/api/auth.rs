use crate::auth::Credentials;
use crate::client::{ApiClient, ApiEnvelope, RequestOptions};
use crate::error::ClientResult;
use parking_lot::RwLock;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, deserialize_with = "crate::stream::string_or_number")]
    pub id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default, alias = "real_name")]
    pub real_name: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> &str {
        self.real_name.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Position of a role on the `user < admin < super_admin` ladder. Unknown roles rank 0.
pub fn role_level(role: &str) -> u8 {
    match role {
        "user" => 1,
        "admin" => 2,
        "super_admin" => 3,
        _ => 0,
    }
}

#[derive(Clone)]
pub struct AuthApi {
    client: ApiClient,
}

impl AuthApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Exchanges a username and password for tokens and stores them.
    pub async fn login(&self, username: &str, password: &str) -> ClientResult<Option<UserProfile>> {
        let path = self.client.settings().login_path.clone();
        let envelope: ApiEnvelope<LoginResponse> = self
            .client
            .request(
                Method::POST,
                &path,
                Some(json!({ "username": username, "password": password })),
                RequestOptions::anonymous(),
            )
            .await?;
        let login = envelope.into_data()?;
        self.client.coordinator().sign_in(
            Credentials::new(login.access_token, login.refresh_token).expiring_in(login.expires_in),
        );
        info!(username, "signed in");
        Ok(login.user)
    }

    /// Logout is local: the backend keeps no session state for bearer tokens.
    pub fn logout(&self) {
        self.client.coordinator().sign_out();
    }

    pub async fn profile(&self) -> ClientResult<UserProfile> {
        let path = self.client.settings().profile_path.clone();
        let envelope: ApiEnvelope<UserProfile> = self.client.get(&path).await?;
        envelope.into_data()
    }
}

/// Tracks who is signed in, for the front end's route guards.
#[derive(Clone)]
pub struct SessionGate {
    api: AuthApi,
    tokens: crate::auth::TokenStore,
    user: Arc<RwLock<Option<UserProfile>>>,
}

impl SessionGate {
    pub fn new(client: ApiClient) -> Self {
        Self {
            tokens: client.tokens().clone(),
            api: AuthApi::new(client),
            user: Arc::new(RwLock::new(None)),
        }
    }

    /// Restores the signed-in user from stored credentials.
    ///
    /// Returns `false` without a network call when no token is stored. A failed
    /// profile fetch signs the user out.
    pub async fn initialize(&self) -> bool {
        if !self.tokens.has_token() {
            return false;
        }
        match self.api.profile().await {
            Ok(profile) => {
                *self.user.write() = Some(profile);
                true
            }
            Err(err) => {
                warn!(error = %err, "stored session is no longer valid");
                self.logout();
                false
            }
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> ClientResult<()> {
        let user = match self.api.login(username, password).await? {
            Some(user) => user,
            None => self.api.profile().await?,
        };
        *self.user.write() = Some(user);
        Ok(())
    }

    pub fn logout(&self) {
        self.user.write().take();
        self.api.logout();
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.user.read().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.user.read().is_some() && self.tokens.has_token()
    }

    pub fn has_role(&self, required: &str) -> bool {
        self.user
            .read()
            .as_ref()
            .is_some_and(|user| role_level(&user.role) >= role_level(required))
    }
}
