use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use polars::prelude::*;
use quantamatics_core::{ApiRequest, QmcError, Session, Table};

use super::{LoadRequest, PanelProvider};
use crate::mapping::{DimensionSpec, MeasureFunctions, MeasureSpec, MeasureStage, PanelMapping};
use crate::measures::card_summary;
use crate::panel::Panel;

const SUMMARY_LOAD_PATH: &str = "/api/data/panel/summaryDataLoad";

/// 1010data credit/debit card panels.
///
/// A combined panel has no data of its own: it loads the credit and the
/// debit panel of its family and adds them up.
#[derive(Debug)]
pub struct TenTenPanel {
    panel: Panel,
    sources: Vec<String>,
}

impl TenTenPanel {
    pub async fn init(session: Arc<Session>, panel_name: &str) -> Result<Self, QmcError> {
        let panel = Panel::init(session, panel_name, None, Self::mapping()).await?;
        Ok(Self {
            panel,
            sources: vec![panel_name.to_owned()],
        })
    }

    /// A combined panel fed by `sources`.
    pub async fn combined(session: Arc<Session>, panel_name: &str, sources: &[&str]) -> Result<Self, QmcError> {
        let panel = Panel::init(session, panel_name, None, Self::mapping()).await?;
        Ok(Self {
            panel,
            sources: sources.iter().map(|source| (*source).to_owned()).collect(),
        })
    }

    /// Builds the panel without looking it up on the server.
    pub fn with_sources(session: Arc<Session>, panel_name: &str, sources: &[&str]) -> Self {
        Self {
            panel: Panel::new(session, panel_name, None, Self::mapping()),
            sources: sources.iter().map(|source| (*source).to_owned()).collect(),
        }
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn mapping() -> PanelMapping {
        PanelMapping::new()
            .with_measure(
                MeasureSpec::fetched("Spend", "spend", "normalized spend", "spend"),
                MeasureFunctions::aggregate_only(card_summary::spend),
            )
            .with_measure(
                MeasureSpec::fetched(
                    "Transaction Count",
                    "transaction count",
                    "normalized transaction count",
                    "transaction_count",
                ),
                MeasureFunctions::aggregate_only(card_summary::transaction_count),
            )
            .with_measure(
                MeasureSpec::fetched("Cardholder Count", "card count", "normalized card count", "card_count"),
                MeasureFunctions::aggregate_only(card_summary::cardholder_count),
            )
            .with_measure(
                MeasureSpec::derived("Spend per Transaction"),
                MeasureFunctions::aggregate_only(card_summary::spend_per_transaction),
            )
            .with_measure(
                MeasureSpec::derived("Transactions per Card"),
                MeasureFunctions::aggregate_only(card_summary::transactions_per_card),
            )
            .with_measure(
                MeasureSpec::derived("Spend per Card"),
                MeasureFunctions::aggregate_only(card_summary::spend_per_card),
            )
            .with_dimension(DimensionSpec::new("Date", "date", "date"))
            .with_dimension(DimensionSpec::new("Ticker", "ticker", "ticker"))
            .with_dimension(DimensionSpec::new("Exchange", "exchange", "exchange"))
    }

    async fn load(&mut self, request: LoadRequest<'_>) -> Result<&Table, QmcError> {
        let ticker = self
            .panel
            .get_ticker(request.instrument, request.ticker.as_deref())
            .await?;

        // 1010data only serves normalized figures.
        let mapping = self.panel.mapping();
        let measures = mapping.request_measures(request.measures.as_deref(), true)?;
        let dimensions = mapping.request_dimensions(&request.dimensions)?;
        let keys = request
            .dimensions
            .iter()
            .filter_map(|name| mapping.dimension(name).map(|spec| spec.return_field.clone()))
            .collect::<Vec<_>>();

        let mut combined: Option<Table> = None;
        for source in &self.sources {
            let api_request = ApiRequest::get(SUMMARY_LOAD_PATH)
                .with_compression(true)
                .with_param("panelName", source.as_str())
                .with_param("ticker", ticker.as_str())
                .with_param("dimensions", dimensions.clone())
                .with_param("measures", measures.clone());
            let data = self.panel.session().api_wrapper(&api_request).await?;
            tracing::debug!(panel = %source, rows = data.row_count(), "loaded summary data");

            combined = Some(match combined {
                None => data,
                Some(total) => sum_aligned(&total, &data, &keys)?,
            });
        }

        self.panel.set_data(combined.unwrap_or_default());
        self.panel
            .run_pipeline(&request.dimensions, request.measures.as_deref(), MeasureStage::Aggregate)
    }
}

impl PanelProvider for TenTenPanel {
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

/// Adds two tables row-aligned on `keys`.
///
/// Both tables are stacked and grouped by `keys`. Numeric columns are
/// summed with missing rows or cells counted as zero, integers as 64-bit;
/// any other column keeps its first non-null value. Output rows are ordered
/// by `keys`.
pub fn sum_aligned(left: &Table, right: &Table, keys: &[String]) -> Result<Table, QmcError> {
    for key in keys {
        if !left.has_column(key) || !right.has_column(key) {
            return Err(QmcError::data(format!("Panel data does not have {key} column")));
        }
    }

    let mut stacked = left.clone();
    stacked.append(right)?;

    let totals = stacked
        .frame()
        .get_columns()
        .iter()
        .filter(|series| !keys.iter().any(|key| key == series.name()))
        .map(|series| {
            let name = series.name();
            match series.dtype() {
                DataType::Float32 | DataType::Float64 => col(name).sum(),
                dtype if dtype.is_numeric() => col(name).cast(DataType::Int64).sum(),
                _ => col(name).drop_nulls().first(),
            }
        })
        .collect::<Vec<_>>();

    let frame = if keys.is_empty() {
        stacked.into_frame().lazy().select(totals).collect()?
    } else {
        stacked
            .into_frame()
            .lazy()
            .group_by_stable(keys.iter().map(|key| col(key)).collect::<Vec<_>>())
            .agg(totals)
            .collect()?
    };

    let summed = Table::from(frame);
    let order = left
        .column_names()
        .into_iter()
        .chain(right.column_names())
        .fold(Vec::<&str>::new(), |mut order, name| {
            if !order.contains(&name) {
                order.push(name);
            }
            order
        });
    summed.select(&order)?.sort_by(keys)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use quantamatics_core::{ClientConfig, Column, ColumnType, RetryConfig, ScriptedHttpClient, Value};
    use serde_json::json;
    use time::macros::date;

    use super::*;

    fn payload(rows: serde_json::Value) -> String {
        json!({
            "schema": {
                "date": {"type": "date", "nullable": false},
                "spend": {"type": "float64", "nullable": true},
                "transaction_count": {"type": "int64", "nullable": true},
                "card_count": {"type": "int64", "nullable": true}
            },
            "data": rows
        })
        .to_string()
    }

    #[test]
    fn sums_rows_sharing_keys_and_keeps_unmatched_rows() {
        let left = Table::from_columns(vec![
            Column::typed("date", ColumnType::Date, vec![date!(2024 - 01 - 01).into(), date!(2024 - 01 - 02).into()]),
            Column::typed("spend", ColumnType::Float64, vec![Value::Float(1.5), Value::Float(2.0)]),
        ])
        .expect("valid");
        let right = Table::from_columns(vec![
            Column::typed("date", ColumnType::Date, vec![date!(2024 - 01 - 02).into(), date!(2024 - 01 - 03).into()]),
            Column::typed("spend", ColumnType::Float64, vec![Value::Float(3.0), Value::Float(4.0)]),
        ])
        .expect("valid");

        let summed = sum_aligned(&left, &right, &[String::from("date")]).expect("sums");

        assert_eq!(summed.row_count(), 3);
        assert_eq!(summed.value(0, "spend"), Some(Value::Float(1.5)));
        assert_eq!(summed.value(1, "spend"), Some(Value::Float(5.0)));
        assert_eq!(summed.value(2, "spend"), Some(Value::Float(4.0)));
    }

    #[test]
    fn int32_counts_are_widened_before_summing() {
        let day = || vec![Value::from(date!(2024 - 01 - 01))];
        let left = Table::from_columns(vec![
            Column::typed("date", ColumnType::Date, day()),
            Column::typed("card_count", ColumnType::Int32, vec![Value::Int(2_000_000_000)]),
            Column::typed("ticker", ColumnType::Str, vec![Value::Null]),
        ])
        .expect("valid");
        let right = Table::from_columns(vec![
            Column::typed("date", ColumnType::Date, day()),
            Column::typed("card_count", ColumnType::Int32, vec![Value::Int(2_000_000_000)]),
            Column::typed("ticker", ColumnType::Str, vec![Value::from("ROST")]),
        ])
        .expect("valid");

        let summed = sum_aligned(&left, &right, &[String::from("date")]).expect("sums");

        assert_eq!(summed.row_count(), 1);
        assert_eq!(summed.column_names(), vec!["date", "card_count", "ticker"]);
        assert_eq!(summed.value(0, "card_count"), Some(Value::Int(4_000_000_000)));
        assert_eq!(summed.value(0, "ticker"), Some(Value::from("ROST")));
    }

    #[tokio::test]
    async fn combined_panel_adds_credit_and_debit_figures() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(payload(json!([
            {"date": "2024-01-01", "spend": 100.0, "transaction_count": 10, "card_count": 4}
        ])))
        .push_json(payload(json!([
            {"date": "2024-01-01", "spend": 50.0, "transaction_count": 5, "card_count": 1}
        ])));
        let config = ClientConfig::default().with_retry(RetryConfig::fixed(Duration::ZERO, 3));
        let session = Session::with_http_client(config, Arc::clone(&http) as Arc<dyn quantamatics_core::HttpClient>);
        session.set_api_key("test-key");

        let mut provider = TenTenPanel::with_sources(
            Arc::new(session),
            "1010data Combined Fixed Panel",
            &["1010data Credit Fixed Panel", "1010data Debit Fixed Panel"],
        );
        let table = provider
            .load_data(LoadRequest::ticker("ROST").with_normalized(false))
            .await
            .expect("loads");

        assert_eq!(table.row_count(), 1);
        assert_eq!(table.value(0, "Spend"), Some(Value::Float(150.0)));
        assert_eq!(table.value(0, "Transaction Count"), Some(Value::Float(15.0)));
        assert_eq!(table.value(0, "Spend per Card"), Some(Value::Float(30.0)));

        let requests = http.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].url.contains("panelName=1010data%20Credit%20Fixed%20Panel"));
        assert!(requests[1].url.contains("panelName=1010data%20Debit%20Fixed%20Panel"));
        assert!(requests[0].url.contains("measures=normalized%20spend"));
        assert!(!requests[0].url.contains("merchants"));
    }
}
