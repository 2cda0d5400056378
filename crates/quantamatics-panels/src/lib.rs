//! # Quantamatics Panels
//!
//! Loads consumer-card panels through a [`quantamatics_core::Session`] and
//! reshapes the raw rows into named measures and dimensions.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`mapping`] | Measure/dimension field mapping and the transform registry |
//! | [`measures`] | Row sets, measure transforms and their application |
//! | [`panel`] | Panel state machine, daily gap filling, calendar-period aggregation |
//! | [`providers`] | Facteus summary and 1010data panels |
//! | [`registry`] | Supported panels and the factory keyed by display name |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quantamatics_core::{ClientConfig, Session};
//! use quantamatics_panels::{LoadRequest, PanelRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), quantamatics_core::QmcError> {
//!     let session = Arc::new(Session::new(ClientConfig::from_env())?);
//!     let registry = PanelRegistry::new(session);
//!     let mut panel = registry.get_panel("USCP Summary v3.1").await?;
//!     let daily = panel.load_data(LoadRequest::ticker("ROST")).await?;
//!     println!("{} rows", daily.row_count());
//!     Ok(())
//! }
//! ```

pub mod mapping;
pub mod measures;
pub mod panel;
pub mod providers;
pub mod registry;

pub use mapping::{
    DimensionSpec, Granularity, MeasureFn, MeasureFunctions, MeasureRegistry, MeasureSpec,
    MeasureStage, PanelMapping,
};
pub use measures::{apply_measures, MeasureError, MeasureInputs, MeasureOutcome, SkippedMeasure};
pub use panel::{aggregate_daily, complete_daily_range, Panel, PanelState};
pub use providers::{FacteusSummaryPanel, LoadRequest, PanelProvider, TenTenPanel};
pub use registry::{PanelRegistry, SupportedPanel};
