//! Authenticated request path shared by every entity, panel and gateway call.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::Value as JsonValue;

use crate::config::ClientConfig;
use crate::error::QmcError;
use crate::http_client::{HttpAuth, HttpClient, HttpMethod, HttpRequest, ReqwestHttpClient};
use crate::params::{ParamValue, Params, ParamsEncoding};
use crate::table::{content_encoding, decode_payload, Table};
use crate::token;

const USER_AGENT: &str = "Quantamatics-RustLib";
const LOGIN_PATH: &str = "/api/account/login";

/// A relative API call and its per-call overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub path: String,
    pub params: Params,
    /// Overrides [`ClientConfig::enable_compression`] when set.
    pub compression: Option<bool>,
    /// Overrides [`ClientConfig::enable_caching`] when set.
    pub caching: Option<bool>,
    pub encoding: ParamsEncoding,
    pub method: HttpMethod,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Params::new(),
            compression: None,
            caching: None,
            encoding: ParamsEncoding::Url,
            method: HttpMethod::Get,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            ..Self::get(path)
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name, value);
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = Some(enabled);
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching = Some(enabled);
        self
    }

    pub fn with_encoding(mut self, encoding: ParamsEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// Successful (HTTP 200) response: lower-cased headers and the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

#[derive(Debug, Default)]
struct Credentials {
    token: Option<String>,
    api_key: Option<String>,
}

/// Process-scoped client context.
///
/// Construct one at startup, wrap it in an `Arc` and hand it to entities,
/// panels and the gateway client. All calls share the one transport, so
/// concurrent requests reuse its connection pool.
pub struct Session {
    config: ClientConfig,
    credentials: Mutex<Credentials>,
    http: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.config.endpoint)
            .field("enable_caching", &self.config.enable_caching)
            .field("enable_compression", &self.config.enable_compression)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Session over the production reqwest transport.
    pub fn new(config: ClientConfig) -> Result<Self, QmcError> {
        Ok(Self::with_http_client(config, Arc::new(ReqwestHttpClient::new()?)))
    }

    /// Session configured from the process environment.
    pub fn from_env() -> Result<Self, QmcError> {
        Self::new(ClientConfig::from_env())
    }

    pub fn with_http_client(config: ClientConfig, http: Arc<dyn HttpClient>) -> Self {
        let credentials = Credentials {
            token: config.token.clone(),
            api_key: config.api_key.clone(),
        };
        Self {
            config,
            credentials: Mutex::new(credentials),
            http,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn set_api_key(&self, api_key: impl Into<String>) {
        self.lock_credentials().api_key = Some(api_key.into());
    }

    /// Stores a bearer token obtained outside of [`Session::login`].
    pub fn set_token(&self, token: impl Into<String>) {
        self.lock_credentials().token = Some(token.into());
    }

    pub fn has_credentials(&self) -> bool {
        let credentials = self.lock_credentials();
        credentials.token.is_some() || credentials.api_key.is_some()
    }

    /// The cached bearer token, provided it stays valid for more than 100 s.
    pub fn get_api_token(&self) -> Result<String, QmcError> {
        self.get_api_token_at(token::unix_now())
    }

    /// [`Session::get_api_token`] evaluated at `now` (unix seconds).
    pub fn get_api_token_at(&self, now: i64) -> Result<String, QmcError> {
        let cached = self.lock_credentials().token.clone();
        let Some(cached) = cached else {
            return Err(QmcError::config(
                "Access Token Not Set. Use login() Method to Set Access Token",
            ));
        };

        if token::is_fresh(token::expiry(&cached)?, now) {
            Ok(cached)
        } else {
            Err(QmcError::auth("Token expired"))
        }
    }

    /// Exchanges credentials for a bearer token and caches it.
    pub async fn login(&self, user: &str, password: &str) -> Result<bool, QmcError> {
        let base = self.base_url()?;
        let body = serde_json::json!({ "email": user, "password": password });
        let request = self
            .default_request(HttpMethod::Post, format!("{base}{LOGIN_PATH}"))
            .with_header("Content-Type", "application/json")
            .with_header("Accept", "application/json")
            .with_body(body.to_string());

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|error| QmcError::connection(base, error))?;

        match response.status {
            200 => {
                let payload: JsonValue = serde_json::from_str(&response.body).map_err(|error| {
                    QmcError::decode(format!("Error decoding login response: {error}"))
                })?;
                let token = payload
                    .get("token")
                    .and_then(JsonValue::as_str)
                    .ok_or_else(|| QmcError::decode("Login response did not include a token"))?;
                self.set_token(token);
                tracing::debug!(user, "login succeeded");
                Ok(true)
            }
            401 => Err(QmcError::auth("Authentication Failed")),
            status => Err(QmcError::http(status, &response.body)),
        }
    }

    /// Sends `request` with auth, compression and caching headers, retrying
    /// 5xx responses per the configured [`RetryConfig`](crate::RetryConfig).
    pub async fn handle_request(&self, request: &ApiRequest) -> Result<ApiResponse, QmcError> {
        tracing::debug!(path = %request.path, "=== handle request ===");

        let base = self.base_url()?;
        let auth = self.auth()?;
        let http_request = self.build_request(base, request, &auth);
        tracing::debug!(params = ?request.params, "requesting with parameters");

        let retry = &self.config.retry;
        let attempts = retry.attempts();
        let started = Instant::now();
        let mut last_failure: Option<(u16, String)> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = retry.delay_for_retry(attempt - 1);
                tokio::time::sleep(delay).await;
            }

            let response = self
                .http
                .execute(http_request.clone())
                .await
                .map_err(|error| QmcError::connection(base, error))?;

            tracing::debug!(
                attempt = attempt + 1,
                status = response.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "round trip"
            );

            match response.status {
                status if retry.should_retry_status(status) => {
                    tracing::debug!(status, "received server error, retrying");
                    last_failure = Some((status, response.body));
                }
                401 => return Err(QmcError::auth("Authentication Failed")),
                400 => return Err(QmcError::client(400, &response.body)),
                200 => {
                    tracing::debug!(bytes = response.body.len(), "size of response object");
                    return Ok(ApiResponse {
                        headers: response.headers,
                        body: response.body,
                    });
                }
                status => return Err(QmcError::http(status, &response.body)),
            }
        }

        let (status, body) = last_failure.unwrap_or((0, String::new()));
        Err(QmcError::server(status, &body))
    }

    /// [`Session::handle_request`] followed by schema-driven table decoding.
    pub async fn api_wrapper(&self, request: &ApiRequest) -> Result<Table, QmcError> {
        let response = self.handle_request(request).await?;
        tracing::debug!(headers = ?response.headers, "response headers");

        let payload = decode_payload(&response.body, content_encoding(&response.headers))?;
        if let Some(retrieval_time) = &payload.retrieval_time {
            tracing::debug!(%retrieval_time, "result generation time (cache)");
        }
        Ok(payload.table)
    }

    fn base_url(&self) -> Result<&str, QmcError> {
        self.config
            .base_url()
            .ok_or_else(|| QmcError::config("API Endpoint not Defined"))
    }

    fn auth(&self) -> Result<HttpAuth, QmcError> {
        let credentials = self.lock_credentials();
        if let Some(token) = &credentials.token {
            Ok(HttpAuth::BearerToken(token.clone()))
        } else if let Some(api_key) = &credentials.api_key {
            Ok(HttpAuth::api_key(api_key.clone()))
        } else {
            Err(QmcError::config(
                "Not logged in or have not provided an API key",
            ))
        }
    }

    fn default_request(&self, method: HttpMethod, url: String) -> HttpRequest {
        HttpRequest::new(method, url)
            .with_header("User-Agent", USER_AGENT)
            .with_header("X-QMC-Client-Version", self.config.client_version.clone())
    }

    fn build_request(&self, base: &str, request: &ApiRequest, auth: &HttpAuth) -> HttpRequest {
        let mut url = format!("{base}{}", request.path);
        let mut body = None;

        match request.encoding {
            ParamsEncoding::Url => {
                let query = request.params.to_query_string();
                if !query.is_empty() {
                    url.push(if url.contains('?') { '&' } else { '?' });
                    url.push_str(&query);
                }
            }
            ParamsEncoding::Json => body = Some(request.params.to_json().to_string()),
        }

        let mut http_request = self.default_request(request.method, url).with_auth(auth);

        if request.method == HttpMethod::Post || body.is_some() {
            http_request = http_request
                .with_header("Content-Type", "application/json")
                .with_header("Accept", "application/json");
        }

        let compression = request.compression.unwrap_or(self.config.enable_compression);
        http_request = http_request.with_header(
            "Accept-Encoding",
            if compression { "br" } else { "identity" },
        );
        tracing::debug!(compression, "response compression");

        let caching = request.caching.unwrap_or(self.config.enable_caching);
        if !caching {
            http_request = http_request.with_header("Cache-Control", "no-cache");
        }
        tracing::debug!(caching, "response caching");

        match body {
            Some(body) => http_request.with_body(body),
            None => http_request,
        }
    }

    fn lock_credentials(&self) -> std::sync::MutexGuard<'_, Credentials> {
        self.credentials
            .lock()
            .expect("session credentials lock is not poisoned")
    }
}
