use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::QmcError;

/// HTTP methods used by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Authentication applied to outgoing requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    BearerToken(String),
    Header { name: String, value: String },
}

impl HttpAuth {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::Header {
            name: String::from("X-Api-Key"),
            value: key.into(),
        }
    }

    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        match self {
            Self::BearerToken(token) => {
                headers.insert(String::from("authorization"), format!("Bearer {token}"));
            }
            Self::Header { name, value } => {
                headers.insert(name.to_ascii_lowercase(), value.clone());
            }
        }
    }
}

/// A fully built request handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// `None` leaves the request without a total timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_auth(mut self, auth: &HttpAuth) -> Self {
        auth.apply(&mut self.headers);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Status, headers (lower-cased names) and decoded body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200, body).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport-level failure: nothing usable came back from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    message: String,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Transport contract used by the session. Implementations must be shareable
/// across tasks so concurrent requests can reuse one connection pool.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;
}

/// Production transport backed by a single long-lived `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    /// Client with brotli decoding enabled and no total timeout.
    pub fn new() -> Result<Self, QmcError> {
        Self::from_builder(reqwest::Client::builder().brotli(true))
    }

    /// Builds the shared client, surfacing builder failures instead of
    /// falling back to an unconfigured client.
    pub fn from_builder(builder: reqwest::ClientBuilder) -> Result<Self, QmcError> {
        let client = builder
            .build()
            .map_err(|error| QmcError::config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
            };

            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }

            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::new(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    HttpError::new(format!("connection failed: {e}"))
                } else {
                    HttpError::new(format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|value| (name.as_str().to_ascii_lowercase(), value.to_owned()))
                })
                .collect::<BTreeMap<_, _>>();
            let body = response
                .text()
                .await
                .map_err(|e| HttpError::new(format!("failed to read response body: {e}")))?;

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}

/// In-memory transport for deterministic offline tests.
///
/// Replays queued outcomes in order and records every request it receives.
/// Once the queue is drained each call fails with a transport error.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    outcomes: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: HttpResponse) -> &Self {
        self.outcomes
            .lock()
            .expect("scripted outcomes lock is not poisoned")
            .push_back(Ok(response));
        self
    }

    pub fn push_status(&self, status: u16, body: impl Into<String>) -> &Self {
        self.push_response(HttpResponse::new(status, body))
    }

    pub fn push_json(&self, body: impl Into<String>) -> &Self {
        self.push_response(HttpResponse::ok_json(body))
    }

    pub fn push_error(&self, error: HttpError) -> &Self {
        self.outcomes
            .lock()
            .expect("scripted outcomes lock is not poisoned")
            .push_back(Err(error));
        self
    }

    /// Every request executed so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .expect("scripted requests lock is not poisoned")
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .expect("scripted requests lock is not poisoned")
            .len()
    }

    pub fn remaining(&self) -> usize {
        self.outcomes
            .lock()
            .expect("scripted outcomes lock is not poisoned")
            .len()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            self.requests
                .lock()
                .expect("scripted requests lock is not poisoned")
                .push(request);
            self.outcomes
                .lock()
                .expect("scripted outcomes lock is not poisoned")
                .pop_front()
                .unwrap_or_else(|| Err(HttpError::new("no scripted response left")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_auth_populates_authorization_header() {
        let request = HttpRequest::get("https://example.test/api")
            .with_auth(&HttpAuth::BearerToken(String::from("token-123")));

        assert_eq!(request.header("Authorization"), Some("Bearer token-123"));
    }

    #[test]
    fn api_key_auth_uses_lower_cased_header_name() {
        let request = HttpRequest::get("https://example.test/api").with_auth(&HttpAuth::api_key("k-1"));

        assert_eq!(request.headers.get("x-api-key").map(String::as_str), Some("k-1"));
        assert_eq!(request.header("X-Api-Key"), Some("k-1"));
    }

    #[test]
    fn requests_have_no_timeout_unless_asked() {
        let request = HttpRequest::post("https://example.test/api");
        assert_eq!(request.timeout, None);

        let bounded = request.with_timeout(Duration::from_secs(5));
        assert_eq!(bounded.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn failing_client_builder_is_reported() {
        let error = ReqwestHttpClient::from_builder(reqwest::Client::builder().user_agent("bad\nagent"))
            .expect_err("invalid user agent");

        assert_eq!(error.kind(), crate::ErrorKind::Config);
        assert!(error.message().starts_with("failed to build HTTP client"));
        assert!(ReqwestHttpClient::new().is_ok());
    }

    #[tokio::test]
    async fn scripted_client_replays_in_order_and_records_requests() {
        let client = ScriptedHttpClient::new();
        client.push_status(503, "busy").push_json("{}");

        let first = client
            .execute(HttpRequest::get("https://example.test/a"))
            .await
            .expect("scripted response");
        let second = client
            .execute(HttpRequest::get("https://example.test/b"))
            .await
            .expect("scripted response");
        let drained = client.execute(HttpRequest::get("https://example.test/c")).await;

        assert_eq!(first.status, 503);
        assert_eq!(second.header("Content-Type"), Some("application/json"));
        assert!(drained.is_err());
        assert_eq!(client.request_count(), 3);
        assert_eq!(client.requests()[1].url, "https://example.test/b");
    }
}
