use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use quantamatics_core::{ApiRequest, DatasetType, QmcError, Session, Table};

use super::{LoadRequest, PanelProvider};
use crate::mapping::{DimensionSpec, MeasureFunctions, MeasureSpec, MeasureStage, PanelMapping};
use crate::measures::card_summary;
use crate::panel::Panel;

const SUMMARY_LOAD_PATH: &str = "/api/data/panel/summaryDataLoad";

/// Facteus consumer card summary panels (USCP Summary, Pulse and their
/// variants).
#[derive(Debug)]
pub struct FacteusSummaryPanel {
    panel: Panel,
}

impl FacteusSummaryPanel {
    pub async fn init(session: Arc<Session>, panel_name: &str) -> Result<Self, QmcError> {
        let panel = Panel::init(
            session,
            panel_name,
            Some(DatasetType::ConsumerCardPayments),
            Self::mapping(),
        )
        .await?;
        Ok(Self { panel })
    }

    /// Builds the panel without looking it up on the server.
    pub fn with_panel_name(session: Arc<Session>, panel_name: &str) -> Self {
        Self {
            panel: Panel::new(
                session,
                panel_name,
                Some(DatasetType::ConsumerCardPayments),
                Self::mapping(),
            ),
        }
    }

    pub fn mapping() -> PanelMapping {
        PanelMapping::new()
            .with_measure(
                MeasureSpec::fetched("Spend", "spend", "normalized spend", "spend"),
                MeasureFunctions::both(card_summary::spend, card_summary::spend),
            )
            .with_measure(
                MeasureSpec::fetched(
                    "Transaction Count",
                    "transaction count",
                    "normalized transaction count",
                    "transaction_count",
                ),
                MeasureFunctions::both(card_summary::transaction_count, card_summary::transaction_count),
            )
            .with_measure(
                MeasureSpec::fetched("Cardholder Count", "card count", "normalized card count", "card_count"),
                MeasureFunctions::both(
                    card_summary::cardholder_count,
                    card_summary::cardholder_count_aggregate,
                ),
            )
            .with_measure(
                MeasureSpec::derived("Spend per Transaction"),
                MeasureFunctions::both(
                    card_summary::spend_per_transaction,
                    card_summary::spend_per_transaction,
                ),
            )
            .with_measure(
                MeasureSpec::derived("Transactions per Card"),
                MeasureFunctions::both(
                    card_summary::transactions_per_card,
                    card_summary::transactions_per_card_aggregate,
                ),
            )
            .with_measure(
                MeasureSpec::derived("Spend per Card"),
                MeasureFunctions::both(card_summary::spend_per_card, card_summary::spend_per_card_aggregate),
            )
            .with_dimension(DimensionSpec::new("Age Group", "generation", "generation"))
            .with_dimension(DimensionSpec::new("Region", "region", "region"))
            .with_dimension(DimensionSpec::new("Card Type", "card type", "card_type"))
            .with_dimension(DimensionSpec::new("Date", "date", "date"))
            .with_dimension(DimensionSpec::new("Ticker", "ticker", "ticker"))
            .with_dimension(DimensionSpec::new("Exchange", "exchange", "exchange"))
            .with_dimension(DimensionSpec::new("Brand", "merchant", "merchant"))
    }

    async fn load(&mut self, request: LoadRequest<'_>) -> Result<&Table, QmcError> {
        let ticker = self
            .panel
            .get_ticker(request.instrument, request.ticker.as_deref())
            .await?;

        let mapping = self.panel.mapping();
        let measures = mapping.request_measures(request.measures.as_deref(), request.normalized)?;
        let dimensions = mapping.request_dimensions(&request.dimensions)?;

        let merchants = match request.kpi {
            Some(kpi) if !kpi.brands.is_empty() => Some(kpi.brands.clone()),
            _ => request.brands,
        };

        let api_request = ApiRequest::get(SUMMARY_LOAD_PATH)
            .with_compression(true)
            .with_param("panelName", self.panel.name())
            .with_param("ticker", ticker)
            .with_param("merchants", merchants)
            .with_param("dimensions", dimensions)
            .with_param("measures", measures);

        let data = self.panel.session().api_wrapper(&api_request).await?;
        tracing::debug!(panel = %self.panel.name(), rows = data.row_count(), "loaded summary data");

        self.panel.set_data(data);
        self.panel
            .run_pipeline(&request.dimensions, request.measures.as_deref(), MeasureStage::PreProcess)
    }
}

impl PanelProvider for FacteusSummaryPanel {
    fn panel(&self) -> &Panel {
        &self.panel
    }

    fn panel_mut(&mut self) -> &mut Panel {
        &mut self.panel
    }

    fn load_data<'a>(
        &'a mut self,
        request: LoadRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<&'a Table, QmcError>> + Send + 'a>> {
        Box::pin(self.load(request))
    }
}
