use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Classification of every failure surfaced by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing endpoint or credentials.
    Config,
    /// HTTP 401 or an expired/undecodable token.
    Auth,
    /// HTTP 400.
    Client,
    /// Repeated 5xx after the retry budget was exhausted.
    Server,
    /// Any other non-200 status.
    Http,
    /// DNS, connect, timeout or body read failure.
    Connection,
    /// Malformed response body.
    Decode,
    /// Unrecognized column type in a response schema.
    Schema,
    /// A remote gateway function reported a logical error.
    Execution,
    /// Unexpected result cardinality or missing local data.
    Data,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Auth => "auth",
            Self::Client => "client",
            Self::Server => "server",
            Self::Http => "http",
            Self::Connection => "connection",
            Self::Decode => "decode",
            Self::Schema => "schema",
            Self::Execution => "execution",
            Self::Data => "data",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error type returned by session, gateway, entity and panel calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QmcError {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
}

impl QmcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::debug!(kind = kind.as_str(), "{message}");
        Self {
            kind,
            message,
            status: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn client(status: u16, body: &str) -> Self {
        Self::new(
            ErrorKind::Client,
            format!("HTTP Client Error: {status} - {body}"),
        )
        .with_status(status)
    }

    pub fn server(status: u16, body: &str) -> Self {
        Self::new(
            ErrorKind::Server,
            format!("Multiple HTTP Server Errors, Last Error: {status} - {body}"),
        )
        .with_status(status)
    }

    pub fn http(status: u16, body: &str) -> Self {
        Self::new(
            ErrorKind::Http,
            format!("Error Accessing Endpoint: {status} - {body}"),
        )
        .with_status(status)
    }

    pub fn connection(endpoint: &str, cause: impl Display) -> Self {
        Self::new(
            ErrorKind::Connection,
            format!("Can not establish connection to {endpoint}: {cause}"),
        )
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Schema, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Data, message)
    }

    fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status observed when the failure came from a response.
    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            ErrorKind::Config => "qmc.config",
            ErrorKind::Auth => "qmc.auth",
            ErrorKind::Client => "qmc.client",
            ErrorKind::Server => "qmc.server",
            ErrorKind::Http => "qmc.http",
            ErrorKind::Connection => "qmc.connection",
            ErrorKind::Decode => "qmc.decode",
            ErrorKind::Schema => "qmc.schema",
            ErrorKind::Execution => "qmc.execution",
            ErrorKind::Data => "qmc.data",
        }
    }
}

impl From<polars::prelude::PolarsError> for QmcError {
    fn from(error: polars::prelude::PolarsError) -> Self {
        Self::data(format!("table operation failed: {error}"))
    }
}
