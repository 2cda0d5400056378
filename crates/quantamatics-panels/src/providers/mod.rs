//! Provider panels: the data-loading half of every supported panel.

mod facteus;
mod tenten;

use std::future::Future;
use std::pin::Pin;

pub use facteus::FacteusSummaryPanel;
pub use tenten::{sum_aligned, TenTenPanel};

use quantamatics_core::{Instrument, Kpi, QmcError, Table};

use crate::panel::{Panel, DATE};

/// Arguments of [`PanelProvider::load_data`].
#[derive(Debug, Clone)]
pub struct LoadRequest<'a> {
    pub ticker: Option<String>,
    pub instrument: Option<&'a Instrument>,
    pub kpi: Option<&'a Kpi>,
    pub brands: Option<Vec<String>>,
    pub dimensions: Vec<String>,
    /// `None` requests every measure that has a request field.
    pub measures: Option<Vec<String>>,
    pub normalized: bool,
}

impl Default for LoadRequest<'_> {
    fn default() -> Self {
        Self {
            ticker: None,
            instrument: None,
            kpi: None,
            brands: None,
            dimensions: vec![String::from(DATE)],
            measures: Some(
                ["Spend", "Transaction Count", "Cardholder Count"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
            normalized: true,
        }
    }
}

impl<'a> LoadRequest<'a> {
    pub fn ticker(ticker: impl Into<String>) -> Self {
        Self {
            ticker: Some(ticker.into()),
            ..Self::default()
        }
    }

    pub fn instrument(instrument: &'a Instrument) -> Self {
        Self {
            instrument: Some(instrument),
            ..Self::default()
        }
    }

    pub fn with_kpi(mut self, kpi: &'a Kpi) -> Self {
        self.kpi = Some(kpi);
        self
    }

    pub fn with_brands(mut self, brands: Vec<String>) -> Self {
        self.brands = Some(brands);
        self
    }

    pub fn with_dimensions<S: Into<String>>(mut self, dimensions: impl IntoIterator<Item = S>) -> Self {
        self.dimensions = dimensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_measures<S: Into<String>>(mut self, measures: impl IntoIterator<Item = S>) -> Self {
        self.measures = Some(measures.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_all_measures(mut self) -> Self {
        self.measures = None;
        self
    }

    pub fn with_normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }
}

/// A supported panel that knows how to fetch and reshape its own data.
pub trait PanelProvider: Send + Sync {
    fn panel(&self) -> &Panel;

    fn panel_mut(&mut self) -> &mut Panel;

    fn load_data<'a>(
        &'a mut self,
        request: LoadRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<&'a Table, QmcError>> + Send + 'a>>;
}
