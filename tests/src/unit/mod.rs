mod auth_tests;
mod client_tests;
mod stream_tests;

use tempfile::TempDir;
use triage_core::{ApiClient, ClientSettings, Credentials};

pub(crate) fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

/// Client pointed at `base_url` with its credential file inside `dir`.
pub(crate) fn client_for(base_url: &str, dir: &TempDir) -> ApiClient {
    let settings = ClientSettings {
        token_file: Some(dir.path().join("credentials.json")),
        ..ClientSettings::default()
    }
    .with_base_url(base_url);
    ApiClient::new(settings).expect("client")
}

pub(crate) fn signed_in(client: &ApiClient, access: &str, refresh: &str) {
    client.tokens().set(Credentials::new(access, refresh));
}
