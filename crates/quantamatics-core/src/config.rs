use crate::logging::LogLevel;
use crate::retry::RetryConfig;

pub const DEFAULT_API_ENDPOINT: &str = "https://api.quantamatics.com";
pub const API_ENDPOINT_ENV: &str = "QMC_API_ENDPOINT";
pub const CACHED_TOKEN_ENV: &str = "QMC_API_CACHED_JWT_TOKEN";
pub const API_KEY_ENV: &str = "QMC_API_KEY";

/// Settings for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL every relative API path is appended to.
    pub endpoint: String,
    /// Bearer token handed over by the hosting platform, if any.
    pub token: Option<String>,
    pub api_key: Option<String>,
    pub enable_caching: bool,
    pub enable_compression: bool,
    /// Sent as `X-QMC-Client-Version`.
    pub client_version: String,
    pub retry: RetryConfig,
    pub log_level: LogLevel,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from(DEFAULT_API_ENDPOINT),
            token: None,
            api_key: None,
            enable_caching: true,
            enable_compression: false,
            client_version: String::from(env!("CARGO_PKG_VERSION")),
            retry: RetryConfig::default(),
            log_level: LogLevel::Disabled,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `QMC_API_ENDPOINT`, `QMC_API_CACHED_JWT_TOKEN`,
    /// `QMC_API_KEY` and `QMC_LOG_LEVEL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(endpoint) = non_empty_env(API_ENDPOINT_ENV) {
            config.endpoint = endpoint;
        }
        config.token = non_empty_env(CACHED_TOKEN_ENV);
        config.api_key = non_empty_env(API_KEY_ENV);
        config.log_level = LogLevel::from_env();
        config
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.enable_caching = enabled;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Endpoint without a trailing slash, or `None` when unset.
    pub(crate) fn base_url(&self) -> Option<&str> {
        let trimmed = self.endpoint.trim().trim_end_matches('/');
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
