pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod refresh;
pub mod session;
pub mod store;
pub mod stream;
pub mod telemetry;
pub mod transport;


pub use api::{AuthApi, ChatApi, ChatMode, SessionGate, UserProfile};
pub use auth::{AuthEvent, Credentials, TokenStore};
pub use client::{ApiClient, ApiEnvelope, RequestOptions};
pub use config::{ClientSettings, ConfigError};
pub use error::{ClientError, ClientResult, ErrorKind};
pub use refresh::RefreshCoordinator;
pub use session::{SessionHandle, SessionUpdate, StreamCallbacks, StreamObserver, StreamSession};
pub use stream::{ReplyAccumulator, StreamEvent, StreamEventKind, StreamEventParser};
pub use transport::{ApiRequest, ByteStream, ReqwestTransport, Transport, TransportResponse};
