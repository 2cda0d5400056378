//! Blocking facade over [`crate::Session`].
//!
//! Owns a current-thread tokio runtime and drives the asynchronous path to
//! completion on the calling thread. Calling it from inside an already
//! running runtime panics, as `Runtime::block_on` does.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::config::ClientConfig;
use crate::error::QmcError;
use crate::http_client::HttpClient;
use crate::session::{ApiRequest, ApiResponse};
use crate::table::Table;

#[derive(Debug)]
pub struct Session {
    inner: Arc<crate::Session>,
    runtime: Runtime,
}

impl Session {
    pub fn new(config: ClientConfig) -> Result<Self, QmcError> {
        Self::from_session(Arc::new(crate::Session::new(config)?))
    }

    pub fn with_http_client(config: ClientConfig, http: Arc<dyn HttpClient>) -> Result<Self, QmcError> {
        Self::from_session(Arc::new(crate::Session::with_http_client(config, http)))
    }

    pub fn from_session(inner: Arc<crate::Session>) -> Result<Self, QmcError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| QmcError::config(format!("failed to start runtime: {error}")))?;
        Ok(Self { inner, runtime })
    }

    /// Shared asynchronous session, for constructing entities and panels.
    pub fn session(&self) -> Arc<crate::Session> {
        Arc::clone(&self.inner)
    }

    /// Runs any future (entity loads, panel loads) to completion.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn set_api_key(&self, api_key: impl Into<String>) {
        self.inner.set_api_key(api_key);
    }

    pub fn set_token(&self, token: impl Into<String>) {
        self.inner.set_token(token);
    }

    pub fn get_api_token(&self) -> Result<String, QmcError> {
        self.inner.get_api_token()
    }

    pub fn login(&self, user: &str, password: &str) -> Result<bool, QmcError> {
        self.runtime.block_on(self.inner.login(user, password))
    }

    pub fn handle_request(&self, request: &ApiRequest) -> Result<ApiResponse, QmcError> {
        self.runtime.block_on(self.inner.handle_request(request))
    }

    pub fn api_wrapper(&self, request: &ApiRequest) -> Result<Table, QmcError> {
        self.runtime.block_on(self.inner.api_wrapper(request))
    }
}
