use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const BASE_URL_ENV: &str = "TRIAGE_API_BASE_URL";
pub const TIMEOUT_ENV: &str = "TRIAGE_API_TIMEOUT_SECS";

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
// LLM-backed endpoints can take a long time to answer.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout: Duration,
    pub login_path: String,
    pub refresh_path: String,
    pub profile_path: String,
    pub token_file: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            login_path: "/api/auth/login".to_string(),
            refresh_path: "/api/auth/refresh".to_string(),
            profile_path: "/api/users/profile".to_string(),
            token_file: Some(config_dir().join("credentials.json")),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("client configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Invalid(detail) => format!("API client not configured: {detail}. Update triage.yaml."),
        }
    }
}

impl ClientSettings {
    /// Loads `triage.yaml` if present, then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match locate_config_file() {
            Some(path) => {
                let contents = fs::read_to_string(&path).map_err(|err| {
                    ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
                })?;
                Self::from_yaml(&contents)?
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: TriageConfig = serde_yaml::from_str(contents)
            .map_err(|err| ConfigError::Invalid(format!("invalid triage.yaml: {err}")))?;
        let settings = resolve_api_settings(config.api.unwrap_or_default());
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.base_url = base_url.trim().to_string();
        }
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{TIMEOUT_ENV} must be a whole number of seconds"))
            })?;
            self.timeout = Duration::from_secs(secs);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|err| ConfigError::Invalid(format!("bad base url `{}`: {err}", self.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "base url must be http or https, got `{}`",
                url.scheme()
            )));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be positive".to_string()));
        }
        Ok(())
    }
}

fn resolve_api_settings(section: ApiSection) -> ClientSettings {
    let defaults = ClientSettings::default();
    let pick = |value: Option<String>, fallback: String| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(fallback)
    };
    ClientSettings {
        base_url: pick(section.base_url, defaults.base_url),
        timeout: section
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
        login_path: pick(section.login_path, defaults.login_path),
        refresh_path: pick(section.refresh_path, defaults.refresh_path),
        profile_path: pick(section.profile_path, defaults.profile_path),
        token_file: section.token_file.or(defaults.token_file),
    }
}

fn locate_config_file() -> Option<PathBuf> {
    triage_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn triage_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("triage");
        paths.push(config_dir.join("triage.yaml"));
        paths.push(config_dir.join("triage.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".triage").join("triage.yaml"));
        paths.push(home_dir.join(".triage").join("triage.yml"));
    } else {
        paths.push(PathBuf::from("triage.yaml"));
        paths.push(PathBuf::from("triage.yml"));
    }
    paths
}

fn config_dir() -> PathBuf {
    if let Some(base) = BaseDirs::new() {
        base.config_dir().join("triage")
    } else {
        PathBuf::from(".triage")
    }
}

#[derive(Debug, Deserialize)]
struct TriageConfig {
    api: Option<ApiSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiSection {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    login_path: Option<String>,
    #[serde(default)]
    refresh_path: Option<String>,
    #[serde(default)]
    profile_path: Option<String>,
    #[serde(default)]
    token_file: Option<PathBuf>,
}
