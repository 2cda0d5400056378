//! Panel state machine and the reshaping steps shared by every provider.

use std::sync::Arc;

use polars::prelude::*;
use quantamatics_core::table::{add_days, date_from_days, days_between};
use quantamatics_core::{
    ApiRequest, CalendarPeriod, CalendarPeriods, CalendarSubject, DatasetType, Instrument, Kpi,
    PeriodMode, QmcError, Session, Table, Value,
};

use crate::mapping::{Granularity, MeasureStage, PanelMapping};
use crate::measures::{apply_measures, MeasureOutcome, SkippedMeasure};

pub const DATE: &str = "Date";
pub const PERIOD_LABEL: &str = "PeriodLabel";
pub const PERIOD_TO_DATE: &str = "PeriodToDate";
pub const PERIOD_START_DATE: &str = "PeriodStartDate";
pub const PERIOD_END_DATE: &str = "PeriodEndDate";
pub const IS_CURRENT_QUARTER: &str = "IsCurrentQuarter";

/// Lifecycle of a panel's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    Uninitialized,
    Loaded,
    FieldsMapped,
    DateCompleted,
    MeasuresComputed,
}

/// A named remote dataset plus its mapping and the currently held rows.
#[derive(Debug)]
pub struct Panel {
    session: Arc<Session>,
    name: String,
    dataset_type: Option<DatasetType>,
    dataset_id: Option<i64>,
    provider_id: Option<i64>,
    provider_name: Option<String>,
    mapping: PanelMapping,
    data: Option<Table>,
    aggregated: Option<Table>,
    skipped: Vec<SkippedMeasure>,
    state: PanelState,
}

impl Panel {
    /// A panel that has not been looked up on the server.
    pub fn new(
        session: Arc<Session>,
        name: impl Into<String>,
        dataset_type: Option<DatasetType>,
        mapping: PanelMapping,
    ) -> Self {
        Self {
            session,
            name: name.into(),
            dataset_type,
            dataset_id: None,
            provider_id: None,
            provider_name: None,
            mapping,
            data: None,
            aggregated: None,
            skipped: Vec::new(),
            state: PanelState::Uninitialized,
        }
    }

    /// Looks the panel up by name. An unknown panel keeps empty ids; more
    /// than one match is an error.
    pub async fn init(
        session: Arc<Session>,
        name: impl Into<String>,
        dataset_type: Option<DatasetType>,
        mapping: PanelMapping,
    ) -> Result<Self, QmcError> {
        let mut panel = Self::new(session, name, dataset_type, mapping);
        let request = ApiRequest::get("/api/data/panel/init").with_param("panelName", panel.name.as_str());
        let table = panel.session.api_wrapper(&request).await?;

        match table.row_count() {
            0 => tracing::debug!(panel = %panel.name, "panel not registered on the server"),
            1 => {
                panel.dataset_id = table.first("dataset_id")?.as_i64();
                panel.provider_id = table.first("provider_id")?.as_i64();
                panel.provider_name = table.first("provider_name")?.as_str().map(str::to_owned);
            }
            _ => return Err(QmcError::data("More than one panel found")),
        }

        Ok(panel)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn dataset_type(&self) -> Option<DatasetType> {
        self.dataset_type
    }

    pub fn dataset_id(&self) -> Option<i64> {
        self.dataset_id
    }

    pub fn provider_id(&self) -> Option<i64> {
        self.provider_id
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider_name.as_deref()
    }

    pub fn mapping(&self) -> &PanelMapping {
        &self.mapping
    }

    pub fn state(&self) -> PanelState {
        self.state
    }

    pub fn granularity(&self) -> Granularity {
        self.mapping.granularity
    }

    pub fn data(&self) -> Option<&Table> {
        self.data.as_ref()
    }

    pub fn aggregated(&self) -> Option<&Table> {
        self.aggregated.as_ref()
    }

    /// Measures dropped by the last measure application.
    pub fn skipped_measures(&self) -> &[SkippedMeasure] {
        &self.skipped
    }

    /// Replaces the held rows with freshly loaded raw data.
    pub fn set_data(&mut self, data: Table) {
        self.data = Some(data);
        self.aggregated = None;
        self.skipped.clear();
        self.state = PanelState::Loaded;
    }

    fn require_data(&self) -> Result<&Table, QmcError> {
        self.data
            .as_ref()
            .ok_or_else(|| QmcError::data("No panel data available"))
    }

    /// Ticker from an explicit string (cut at the first `-` or space) or
    /// from the instrument's Facteus symbology.
    pub async fn get_ticker(
        &self,
        instrument: Option<&Instrument>,
        ticker: Option<&str>,
    ) -> Result<String, QmcError> {
        if let Some(ticker) = ticker {
            return Ok(strip_ticker(ticker));
        }

        let Some(instrument) = instrument else {
            return Err(QmcError::data("No ticker or instrument provided"));
        };
        let symbology = instrument.get_symbology().await?;
        symbology
            .get("Facteus")
            .map(|symbol| strip_ticker(symbol))
            .ok_or_else(|| {
                QmcError::data(format!(
                    "Instrument {} has no Facteus symbology",
                    instrument.id
                ))
            })
    }

    /// Renames raw return fields to their display names.
    pub fn map_return_fields(&mut self) -> Result<(), QmcError> {
        let renames = self.mapping.return_field_renames();
        let data = self
            .data
            .as_mut()
            .ok_or_else(|| QmcError::data("No panel data available"))?;
        data.rename_columns(&renames)?;
        self.state = PanelState::FieldsMapped;
        Ok(())
    }

    /// Fills calendar gaps in the `Date` column, see [`complete_daily_range`].
    pub fn complete_daily_range(&mut self) -> Result<(), QmcError> {
        let completed = complete_daily_range(self.require_data()?)?;
        self.data = Some(completed);
        self.state = PanelState::DateCompleted;
        Ok(())
    }

    /// Applies every mapped measure to the held rows and replaces them with
    /// the result.
    pub fn apply_measures(
        &mut self,
        dimensions: &[String],
        stage: MeasureStage,
        as_aggregate: bool,
    ) -> Result<MeasureOutcome, QmcError> {
        let outcome = apply_measures(&self.mapping, self.require_data()?, dimensions, stage, as_aggregate)?;
        self.data = Some(outcome.table.clone());
        self.skipped = outcome.skipped.clone();
        self.state = PanelState::MeasuresComputed;
        Ok(outcome)
    }

    /// Map return fields, fill the daily range when `Date` is requested,
    /// then apply the `stage` transforms row by row.
    ///
    /// `measures` names the measures the caller asked for (`None` means every
    /// fetchable one). Losing some of them is logged; losing all of them is
    /// an error.
    pub fn run_pipeline(
        &mut self,
        dimensions: &[String],
        measures: Option<&[String]>,
        stage: MeasureStage,
    ) -> Result<&Table, QmcError> {
        self.map_return_fields()?;
        if dimensions.iter().any(|dimension| dimension == DATE) {
            self.complete_daily_range()?;
        }
        let outcome = self.apply_measures(dimensions, stage, false)?;

        let requested = match measures {
            Some(names) => names.to_vec(),
            None => self
                .mapping
                .measures
                .iter()
                .filter(|spec| spec.request_field.is_some())
                .map(|spec| spec.name.clone())
                .collect(),
        };
        let lost = outcome
            .skipped
            .iter()
            .filter(|skipped| requested.contains(&skipped.name))
            .map(|skipped| format!("{} ({})", skipped.name, skipped.reason))
            .collect::<Vec<_>>();

        if !requested.is_empty() && requested.iter().all(|name| !outcome.computed.contains(name)) {
            return Err(QmcError::data(format!(
                "None of the requested measures could be computed: {}",
                lost.join(", ")
            )));
        }
        if !lost.is_empty() {
            tracing::warn!(panel = %self.name, measures = ?lost, "requested measures were skipped");
        }
        self.require_data()
    }

    /// Aggregates the held daily rows into calendar periods.
    ///
    /// Periods come from `calendar_periods` when given, otherwise from the
    /// KPI's own calendar.
    pub async fn aggregate_to_calendar_periods(
        &mut self,
        dimensions: &[String],
        kpi: Option<&Kpi>,
        calendar_periods: Option<&CalendarPeriods>,
        complete_current_quarter: bool,
    ) -> Result<&Table, QmcError> {
        if self.data.is_none() {
            return Err(QmcError::data("No panel data available to aggregate"));
        }

        let loaded;
        let periods = match (calendar_periods, kpi) {
            (Some(periods), _) => periods,
            (None, Some(kpi)) => {
                let kpi_id = kpi.id.ok_or_else(|| QmcError::data("KPI has no id"))?;
                loaded = CalendarPeriods::load(
                    Arc::clone(&self.session),
                    CalendarSubject::Kpi(kpi_id),
                    PeriodMode::Reported,
                )
                .await?;
                &loaded
            }
            (None, None) => {
                return Err(QmcError::data(
                    "Need a KPI or Calendar Periods object to aggregate to",
                ))
            }
        };

        let outcome = match self.mapping.granularity {
            Granularity::Daily => aggregate_daily(
                &self.mapping,
                self.require_data()?,
                dimensions,
                periods.periods(),
                complete_current_quarter,
            )?,
        };

        self.skipped = outcome.skipped;
        Ok(&*self.aggregated.insert(outcome.table))
    }

    /// Declared measures, or only those present in the held data.
    pub fn get_measures(&self, all: bool) -> Vec<String> {
        self.present(self.mapping.measure_names(), all)
    }

    /// Declared dimensions, or only those present in the held data.
    pub fn get_dimensions(&self, all: bool) -> Vec<String> {
        self.present(self.mapping.dimension_names(), all)
    }

    fn present(&self, names: Vec<String>, all: bool) -> Vec<String> {
        if all {
            return names;
        }
        match &self.data {
            Some(data) => names.into_iter().filter(|name| data.has_column(name)).collect(),
            None => Vec::new(),
        }
    }
}

fn strip_ticker(ticker: &str) -> String {
    let base = ticker.split('-').next().unwrap_or(ticker);
    base.split(' ').next().unwrap_or(base).to_owned()
}

/// Reindexes `data` to every day between its first and last `Date`.
///
/// The data is left-joined onto the full day range and ordered by date.
/// Null cells are then zero-filled: numbers get `0`, flags get `false` and
/// text gets `"0"`.
pub fn complete_daily_range(data: &Table) -> Result<Table, QmcError> {
    let Some((first, last)) = date_bounds(data)? else {
        return Ok(data.clone());
    };

    let range = Series::new(DATE, (first..=last).collect::<Vec<i32>>()).cast(&DataType::Date)?;
    let joined = DataFrame::new(vec![range])?
        .lazy()
        .join(
            data.frame().clone().lazy().with_column(col(DATE).cast(DataType::Date)),
            [col(DATE)],
            [col(DATE)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    let fills = joined
        .get_columns()
        .iter()
        .filter(|series| series.name() != DATE)
        .filter_map(|series| {
            let dtype = series.dtype();
            let filled = if dtype.is_numeric() {
                col(series.name()).fill_null(lit(0)).cast(dtype.clone())
            } else if *dtype == DataType::Boolean {
                col(series.name()).fill_null(lit(false))
            } else if *dtype == DataType::String {
                col(series.name()).fill_null(lit("0"))
            } else {
                return None;
            };
            Some(filled)
        })
        .collect::<Vec<_>>();

    let filled = Table::from(joined.lazy().with_columns(fills).collect()?);
    filled.select(&data.column_names())?.sort_by(&[DATE])
}

/// First and last day of the `Date` column, as days since the epoch.
fn date_bounds(data: &Table) -> Result<Option<(i32, i32)>, QmcError> {
    let days = data
        .column(DATE)
        .ok_or_else(|| QmcError::data("Panel data does not have Date column"))?
        .cast(&DataType::Date)?
        .cast(&DataType::Int32)?;
    let days = days.i32()?;
    Ok(days.min().zip(days.max()))
}

/// Buckets daily rows into `periods` and aggregates each bucket.
///
/// A period is dropped when it starts before the first or after the last
/// data day, or when it ends after the last data day unless it is the
/// current period and `complete_current_quarter` is set. When the last data
/// day falls inside the current period, every retained period also gets a
/// period-to-date row covering the same number of days from its own start.
pub fn aggregate_daily(
    mapping: &PanelMapping,
    data: &Table,
    dimensions: &[String],
    periods: &[CalendarPeriod],
    complete_current_quarter: bool,
) -> Result<MeasureOutcome, QmcError> {
    let (min_date, max_date) = date_bounds(data)?
        .and_then(|(first, last)| date_from_days(first).zip(date_from_days(last)))
        .ok_or_else(|| QmcError::data("No panel data available to aggregate"))?;

    let elapsed_days = periods
        .iter()
        .find(|period| period.is_current)
        .filter(|current| current.start <= max_date && current.end >= max_date)
        .map(|current| days_between(current.start, max_date));

    let mut aggregated = Table::new();
    let mut computed: Vec<String> = Vec::new();
    let mut skipped: Vec<SkippedMeasure> = Vec::new();
    let mut seen: Vec<&str> = Vec::new();

    for period in periods {
        if seen.contains(&period.name.as_str()) {
            continue;
        }
        seen.push(&period.name);

        if period.end > max_date && !(period.is_current && complete_current_quarter) {
            continue;
        }
        if period.start > max_date || period.start < min_date {
            continue;
        }

        let mut windows = vec![(false, period.end)];
        if let Some(days) = elapsed_days {
            let end = add_days(period.start, days).ok_or_else(|| {
                QmcError::data(format!("period-to-date window of {} is out of range", period.name))
            })?;
            windows.push((true, end));
        }

        for (to_date, end) in windows {
            let rows = data.between_dates(DATE, period.start, end)?;
            let outcome = apply_measures(mapping, &rows, dimensions, MeasureStage::Aggregate, true)?;

            let mut block = outcome.table;
            block.push_constant(PERIOD_LABEL, Value::Str(period.name.clone()))?;
            block.push_constant(PERIOD_TO_DATE, Value::Bool(to_date))?;
            block.push_constant(PERIOD_START_DATE, Value::Date(period.start))?;
            block.push_constant(PERIOD_END_DATE, Value::Date(end))?;
            block.push_constant(IS_CURRENT_QUARTER, Value::Bool(period.is_current))?;
            aggregated.append(&block)?;

            for name in outcome.computed {
                if !computed.contains(&name) {
                    computed.push(name);
                }
            }
            for miss in outcome.skipped {
                if !skipped.iter().any(|known| known.name == miss.name) {
                    skipped.push(miss);
                }
            }
        }
    }

    aggregated.reorder_front(&[
        PERIOD_LABEL,
        PERIOD_TO_DATE,
        PERIOD_START_DATE,
        PERIOD_END_DATE,
        IS_CURRENT_QUARTER,
    ])?;
    let table = aggregated.sort_by(&[PERIOD_TO_DATE, PERIOD_LABEL])?;

    Ok(MeasureOutcome {
        table,
        computed,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use quantamatics_core::{Column, ColumnType};
    use time::macros::date;
    use time::Date;

    use super::*;
    use crate::mapping::{MeasureFunctions, MeasureSpec};
    use crate::measures::card_summary;

    fn spend_mapping() -> PanelMapping {
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
    }

    fn daily(from: Date, days: i64, spend: f64) -> Table {
        let dates = (0..days)
            .filter_map(|offset| add_days(from, offset))
            .map(Value::Date)
            .collect::<Vec<_>>();
        let count = dates.len();
        Table::from_columns(vec![
            Column::typed(DATE, ColumnType::Date, dates),
            Column::typed("Spend", ColumnType::Float64, vec![Value::Float(spend); count]),
            Column::typed("Transaction Count", ColumnType::Int64, vec![Value::Int(1); count]),
        ])
        .expect("valid table")
    }

    #[test]
    fn gap_days_are_inserted_with_zeroes() {
        let data = Table::from_columns(vec![
            Column::typed(
                DATE,
                ColumnType::Date,
                vec![date!(2024 - 03 - 03).into(), date!(2024 - 03 - 01).into()],
            ),
            Column::typed("Spend", ColumnType::Float64, vec![Value::Float(7.0), Value::Float(5.0)]),
            Column::typed("Ticker", ColumnType::Str, vec!["ROST".into(), "ROST".into()]),
        ])
        .expect("valid table");

        let completed = complete_daily_range(&data).expect("completes");

        assert_eq!(completed.row_count(), 3);
        assert_eq!(completed.value(0, DATE), Some(Value::Date(date!(2024 - 03 - 01))));
        assert_eq!(completed.value(1, DATE), Some(Value::Date(date!(2024 - 03 - 02))));
        assert_eq!(completed.value(1, "Spend"), Some(Value::Float(0.0)));
        assert_eq!(completed.value(1, "Ticker"), Some(Value::from("0")));
        assert_eq!(completed.column_type(DATE), Some(ColumnType::Date));
        assert_eq!(completed.value(2, "Spend"), Some(Value::Float(7.0)));
    }

    #[test]
    fn missing_date_column_is_reported() {
        let data = Table::from_columns(vec![Column::new("Spend", vec![Value::Float(1.0)])]).expect("valid");
        let error = complete_daily_range(&data).expect_err("no Date");
        assert_eq!(error.message(), "Panel data does not have Date column");
    }

    #[test]
    fn current_period_gets_full_and_period_to_date_rows() {
        let data = daily(date!(2024 - 01 - 01), 45, 1.0);
        let mut previous = CalendarPeriod::new("Q1", date!(2024 - 01 - 01), date!(2024 - 01 - 31), true);
        previous.is_previous = true;
        let mut current = CalendarPeriod::new("Q2", date!(2024 - 02 - 01), date!(2024 - 02 - 29), false);
        current.is_current = true;
        let future = CalendarPeriod::new("Q3", date!(2024 - 03 - 01), date!(2024 - 03 - 31), false);

        let outcome = aggregate_daily(&spend_mapping(), &data, &[], &[previous, current, future], true)
            .expect("aggregates");
        let table = outcome.table;

        assert_eq!(
            &table.column_names()[..5],
            &[PERIOD_LABEL, PERIOD_TO_DATE, PERIOD_START_DATE, PERIOD_END_DATE, IS_CURRENT_QUARTER]
        );
        // Q1 and Q2, each with a full row and a period-to-date row.
        assert_eq!(table.row_count(), 4);

        let q2_full = (0..4)
            .find(|row| {
                table.value(*row, PERIOD_LABEL) == Some(Value::from("Q2"))
                    && table.value(*row, PERIOD_TO_DATE) == Some(Value::Bool(false))
            })
            .expect("Q2 full row");
        let q2_to_date = (0..4)
            .find(|row| {
                table.value(*row, PERIOD_LABEL) == Some(Value::from("Q2"))
                    && table.value(*row, PERIOD_TO_DATE) == Some(Value::Bool(true))
            })
            .expect("Q2 period-to-date row");

        // Data ends on Feb 14: 14 days of Q2 are available.
        assert_eq!(table.value(q2_full, "Spend"), Some(Value::Float(14.0)));
        assert_eq!(table.value(q2_to_date, "Spend"), Some(Value::Float(14.0)));
        assert_eq!(
            table.value(q2_to_date, PERIOD_END_DATE),
            Some(Value::Date(date!(2024 - 02 - 14)))
        );

        // Q1 period-to-date covers the same 14 elapsed days from its own start.
        let q1_to_date = (0..4)
            .find(|row| {
                table.value(*row, PERIOD_LABEL) == Some(Value::from("Q1"))
                    && table.value(*row, PERIOD_TO_DATE) == Some(Value::Bool(true))
            })
            .expect("Q1 period-to-date row");
        assert_eq!(table.value(q1_to_date, "Spend"), Some(Value::Float(14.0)));

        // Sorted by PeriodToDate, then PeriodLabel.
        assert_eq!(table.value(0, PERIOD_LABEL), Some(Value::from("Q1")));
        assert_eq!(table.value(0, PERIOD_TO_DATE), Some(Value::Bool(false)));
        assert_eq!(table.value(3, PERIOD_TO_DATE), Some(Value::Bool(true)));
    }

    #[test]
    fn in_progress_period_is_dropped_without_complete_current_quarter() {
        let data = daily(date!(2024 - 01 - 01), 45, 1.0);
        let mut current = CalendarPeriod::new("Q2", date!(2024 - 02 - 01), date!(2024 - 02 - 29), false);
        current.is_current = true;
        let closed = CalendarPeriod::new("Q1", date!(2024 - 01 - 01), date!(2024 - 01 - 31), true);

        let outcome = aggregate_daily(&spend_mapping(), &data, &[], &[closed, current], false)
            .expect("aggregates");

        let labels = outcome.table.values(PERIOD_LABEL).unwrap_or_default();
        assert!(labels.iter().all(|label| *label == Value::from("Q1")));
        assert_eq!(outcome.table.row_count(), 2);
    }

    #[test]
    fn periods_starting_before_the_data_are_dropped() {
        let data = daily(date!(2024 - 01 - 10), 60, 1.0);
        let early = CalendarPeriod::new("Q1", date!(2024 - 01 - 01), date!(2024 - 01 - 31), true);
        let full = CalendarPeriod::new("Q2", date!(2024 - 02 - 01), date!(2024 - 02 - 29), true);

        let outcome =
            aggregate_daily(&spend_mapping(), &data, &[], &[early, full], true).expect("aggregates");

        assert_eq!(outcome.table.row_count(), 1);
        assert_eq!(outcome.table.value(0, PERIOD_LABEL), Some(Value::from("Q2")));
        assert_eq!(outcome.table.value(0, "Spend"), Some(Value::Float(29.0)));
    }
}
