use serde::Serialize;

/// Failure modes surfaced by the API client.
///
/// The enum is `Clone` because one refresh failure is delivered to every caller
/// that was queued behind it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("malformed stream frame: {0}")]
    Parse(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Coarse classification of an error for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    ServerError,
    Unavailable,
    Http,
    Parse,
    Protocol,
}

impl ClientError {
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Auth(_) => ErrorKind::Unauthorized,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Http { status, .. } => match status {
                400 | 422 => ErrorKind::BadRequest,
                401 => ErrorKind::Unauthorized,
                403 => ErrorKind::Forbidden,
                404 => ErrorKind::NotFound,
                429 => ErrorKind::RateLimited,
                502..=504 => ErrorKind::Unavailable,
                500..=599 => ErrorKind::ServerError,
                _ => ErrorKind::Http,
            },
        }
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Network => "Network error, check your connection.".to_string(),
            ErrorKind::BadRequest => format!("Invalid request: {}", self.detail()),
            ErrorKind::Unauthorized => "Your session has expired, please sign in again.".to_string(),
            ErrorKind::Forbidden => "Permission denied, contact an administrator.".to_string(),
            ErrorKind::NotFound => "The requested resource does not exist.".to_string(),
            ErrorKind::RateLimited => "Too many requests, please try again later.".to_string(),
            ErrorKind::ServerError => "Server error, please try again later.".to_string(),
            ErrorKind::Unavailable => "Service temporarily unavailable.".to_string(),
            ErrorKind::Http | ErrorKind::Parse | ErrorKind::Protocol => {
                let detail = self.detail();
                if detail.is_empty() {
                    "Request failed.".to_string()
                } else {
                    detail
                }
            }
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Http { body, .. } => extract_message(body).unwrap_or_else(|| body.clone()),
            Self::Network(msg)
            | Self::Auth(msg)
            | Self::Parse(msg)
            | Self::Protocol(msg) => msg.clone(),
        }
    }
}

/// Pulls `message` or `detail` out of a JSON error body, if there is one.
fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .or_else(|| value.get("detail"))
        .and_then(|field| field.as_str())
        .map(str::to_owned)
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
