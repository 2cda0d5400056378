//! # Quantamatics Core
//!
//! Client context, transport and typed data access for the Quantamatics
//! financial data API.
//!
//! ## Overview
//!
//! - **Session** owning one long-lived transport, credentials and the retry policy
//! - **Typed tables** decoded from the server's `{schema, data}` payloads
//! - **Gateway client** for listing and running remote functions
//! - **Domain entities** for instruments, companies, KPIs and calendar periods
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`blocking`] | Blocking facade running the async path on a private runtime |
//! | [`config`] | Client configuration from defaults, environment and builders |
//! | [`domain`] | Instrument, Company, Universe, KPI, FinancialStatement, CalendarPeriods |
//! | [`error`] | `QmcError` and its kinds |
//! | [`gateway`] | Remote function gateway |
//! | [`http_client`] | HTTP transport abstraction (reqwest and scripted) |
//! | [`logging`] | Optional `tracing` subscriber bootstrap |
//! | [`params`] | Request parameters and their URL/JSON encodings |
//! | [`retry`] | Retry policy for 5xx responses |
//! | [`session`] | Authenticated request path |
//! | [`settings`] | Symbology, statement and dataset enumerations |
//! | [`table`] | Column-oriented typed tables and the response decoder |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quantamatics_core::{ClientConfig, Instrument, InstrumentQuery, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), quantamatics_core::QmcError> {
//!     let session = Arc::new(Session::new(ClientConfig::from_env())?);
//!     let instrument = Instrument::load(session, InstrumentQuery::symbol("ROST"), 1).await?;
//!     println!("{:?}", instrument.company().await?.name);
//!     Ok(())
//! }
//! ```

pub mod blocking;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod http_client;
pub mod logging;
pub mod params;
pub mod retry;
pub mod session;
pub mod settings;
pub mod table;
mod token;

pub use config::{ClientConfig, DEFAULT_API_ENDPOINT};
pub use domain::{
    CalendarPeriod, CalendarPeriods, CalendarSubject, Company, FinancialStatement, Instrument,
    InstrumentQuery, Kpi, KpiQuery, PeriodMode, Universe, UniverseQuery,
};
pub use error::{ErrorKind, QmcError};
pub use gateway::{FunctionMetadata, GatewayClient};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use logging::{init_logging, LogLevel};
pub use params::{ParamValue, Params, ParamsEncoding};
pub use retry::RetryConfig;
pub use session::{ApiRequest, ApiResponse, Session};
pub use settings::{DatasetType, FinancialStatementType, SymbologyType};
pub use table::{Column, ColumnSchema, ColumnType, Table, Value};
