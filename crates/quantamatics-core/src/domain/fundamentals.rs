use std::sync::{Arc, OnceLock};

use time::{Date, OffsetDateTime};

use super::{first_int, first_text};
use crate::error::QmcError;
use crate::session::{ApiRequest, Session};
use crate::settings::{DatasetType, FinancialStatementType};
use crate::table::{Column, Table, Value};

pub const DEFAULT_HISTORY_VALUE_TYPE: &str = "Actual";
pub const DEFAULT_HISTORY_DATASET: &str = "Company KPIs";
pub const DEFAULT_ESTIMATE_DATASET: &str = "Consensus Estimates";
pub const DEFAULT_ESTIMATE_VALUE_TYPE: &str = "Consensus Mean";

/// Lookup key for [`Kpi`]. Either the id, or instrument id + name + unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KpiQuery {
    pub id: Option<i64>,
    pub instrument_id: Option<i64>,
    pub name: Option<String>,
    pub unit_of_measure: Option<String>,
}

impl KpiQuery {
    pub fn id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn named(instrument_id: i64, name: impl Into<String>, unit_of_measure: impl Into<String>) -> Self {
        Self {
            id: None,
            instrument_id: Some(instrument_id),
            name: Some(name.into()),
            unit_of_measure: Some(unit_of_measure.into()),
        }
    }
}

/// A tracked key performance indicator.
#[derive(Debug, Clone)]
pub struct Kpi {
    session: Arc<Session>,
    pub id: Option<i64>,
    pub instrument_id: Option<i64>,
    pub name: Option<String>,
    pub unit_of_measure: Option<String>,
    pub statement_type: Option<String>,
    pub class: Option<String>,
    pub measure_name: Option<String>,
    /// Distinct non-null brand names, in first-seen order.
    pub brands: Vec<String>,
    table: Option<Table>,
    history: Option<Table>,
    latest_estimate: Option<Table>,
    estimate_history: Option<Table>,
}

impl Kpi {
    /// A KPI known only by its ids; call [`Kpi::reload`] to populate it.
    pub fn unloaded(session: Arc<Session>, id: Option<i64>, instrument_id: Option<i64>) -> Self {
        Self {
            session,
            id,
            instrument_id,
            name: None,
            unit_of_measure: None,
            statement_type: None,
            class: None,
            measure_name: None,
            brands: Vec::new(),
            table: None,
            history: None,
            latest_estimate: None,
            estimate_history: None,
        }
    }

    pub async fn load(session: Arc<Session>, query: KpiQuery) -> Result<Self, QmcError> {
        let mut kpi = Self::unloaded(session, query.id, query.instrument_id);
        kpi.name = query.name;
        kpi.unit_of_measure = query.unit_of_measure;
        kpi.reload(KpiQuery::default()).await?;
        Ok(kpi)
    }

    /// Re-fetches the KPI. A query id replaces the current id; instrument,
    /// name and unit are only replaced when all three are given.
    pub async fn reload(&mut self, query: KpiQuery) -> Result<(), QmcError> {
        if query.id.is_some() {
            self.id = query.id;
        }
        if let (Some(instrument_id), Some(name), Some(unit)) =
            (query.instrument_id, query.name, query.unit_of_measure)
        {
            self.instrument_id = Some(instrument_id);
            self.name = Some(name);
            self.unit_of_measure = Some(unit);
        }

        let request = ApiRequest::get("/api/data/kpi/load")
            .with_param("kpiId", self.id)
            .with_param("instrumentId", self.instrument_id)
            .with_param("kpiName", self.name.clone())
            .with_param("kpiUom", self.unit_of_measure.clone());
        let table = self.session.api_wrapper(&request).await?;

        if table.is_empty() {
            return Err(QmcError::data(format!(
                "No KPI found for ID: {}",
                super::display_or_none(self.id)
            )));
        }

        self.name = first_text(&table, "kpi_name")?;
        self.instrument_id = first_int(&table, "instrument_id")?;
        self.unit_of_measure = first_text(&table, "unit_of_measure")?;
        self.statement_type = first_text(&table, "statement_type")?;
        self.class = first_text(&table, "kpi_class")?;
        self.id = first_int(&table, "kpi_id")?;
        self.measure_name = first_text(&table, "measure_name")?;
        self.brands = distinct_text(&table, "brand_name");
        self.table = Some(table);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.table.is_some()
    }

    pub fn table(&self) -> Option<&Table> {
        self.table.as_ref()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn require_id(&self) -> Result<i64, QmcError> {
        self.id.ok_or_else(|| QmcError::data("KPI has no id"))
    }

    pub async fn get_kpi_history(&mut self, value_type: &str, dataset: &str) -> Result<&Table, QmcError> {
        let request = ApiRequest::get("/api/data/kpi/getHistory")
            .with_param("kpiId", self.require_id()?)
            .with_param("valueType", value_type)
            .with_param("datasetName", dataset);
        let table = self.session.api_wrapper(&request).await?;
        Ok(self.history.insert(table))
    }

    /// Latest estimate as of `as_of` (today when `None`).
    pub async fn get_latest_estimate(
        &mut self,
        dataset: &str,
        as_of: Option<Date>,
        value_type: &str,
    ) -> Result<&Table, QmcError> {
        let as_of = as_of.unwrap_or_else(|| OffsetDateTime::now_utc().date());
        let request = ApiRequest::get("/api/data/kpi/getLatestEstimate")
            .with_param("kpiId", self.require_id()?)
            .with_param("datasetName", dataset)
            .with_param("asOfDate", as_of)
            .with_param("valueType", value_type);
        let table = self.session.api_wrapper(&request).await?;
        Ok(self.latest_estimate.insert(table))
    }

    pub async fn get_estimate_history(&mut self, dataset: &str, value_type: &str) -> Result<&Table, QmcError> {
        let request = ApiRequest::get("/api/data/kpi/getEstimateHistory")
            .with_param("kpiId", self.require_id()?)
            .with_param("datasetName", dataset)
            .with_param("valueType", value_type);
        let table = self.session.api_wrapper(&request).await?;
        Ok(self.estimate_history.insert(table))
    }
}

fn distinct_text(table: &Table, column: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for value in table.values(column).unwrap_or_default() {
        if let Value::Str(text) = value {
            if !seen.contains(&text) {
                seen.push(text);
            }
        }
    }
    seen
}

/// KPI catalogue of one instrument.
///
/// The first dataset type seen, at construction or on a later call, sticks
/// to the statement and is used by every following request.
#[derive(Debug, Clone)]
pub struct FinancialStatement {
    session: Arc<Session>,
    pub instrument_id: i64,
    dataset_type: OnceLock<DatasetType>,
}

impl FinancialStatement {
    pub fn new(session: Arc<Session>, instrument_id: i64, dataset_type: Option<DatasetType>) -> Self {
        let statement = Self {
            session,
            instrument_id,
            dataset_type: OnceLock::new(),
        };
        statement.remember_dataset_type(dataset_type);
        statement
    }

    pub fn dataset_type(&self) -> Option<DatasetType> {
        self.dataset_type.get().copied()
    }

    fn remember_dataset_type(&self, dataset_type: Option<DatasetType>) {
        if let Some(dataset_type) = dataset_type {
            // Only the first value is kept.
            let _ = self.dataset_type.set(dataset_type);
        }
    }

    async fn fetch(
        &self,
        path: &str,
        primary_only: bool,
        dataset_type: Option<DatasetType>,
    ) -> Result<Table, QmcError> {
        self.remember_dataset_type(dataset_type);
        let dataset_type = self.dataset_type();
        let request = ApiRequest::get(path)
            .with_param("instrumentId", self.instrument_id)
            .with_param("primaryOnly", primary_only)
            .with_param("datasetType", dataset_type.map(DatasetType::as_str));
        self.session.api_wrapper(&request).await
    }

    /// Unloaded [`Kpi`] handles for every KPI of the instrument.
    pub async fn get_kpis(
        &self,
        primary_only: bool,
        dataset_type: Option<DatasetType>,
    ) -> Result<Vec<Kpi>, QmcError> {
        let table = self
            .fetch("/api/data/financialStatement/getKpis", primary_only, dataset_type)
            .await?;

        Ok((0..table.row_count())
            .map(|row| {
                let id = table.value(row, "kpi_id").and_then(|value| value.as_i64());
                let instrument_id = table
                    .value(row, "instrument_id")
                    .and_then(|value| value.as_i64())
                    .or(Some(self.instrument_id));
                Kpi::unloaded(Arc::clone(&self.session), id, instrument_id)
            })
            .collect())
    }

    /// KPI listing, optionally restricted to one statement type.
    pub async fn get_kpi_list(
        &self,
        primary_only: bool,
        dataset_type: Option<DatasetType>,
        statement_type: Option<FinancialStatementType>,
    ) -> Result<Table, QmcError> {
        let table = self
            .fetch("/api/data/financialStatement/getKpiList", primary_only, dataset_type)
            .await?;

        let Some(statement_type) = statement_type else {
            return Ok(table);
        };
        let Some(statement_types) = table.values("statement_type") else {
            return Ok(table);
        };
        let wanted = Value::Str(String::from(statement_type.as_str()));
        table.filter(|row| statement_types[row] == wanted)
    }
}

/// How previous/current/next flags are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeriodMode {
    /// From the server's historical flag.
    #[default]
    Reported,
    /// From today's date against each period's bounds.
    DateDriven,
}

/// Whose calendar is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarSubject {
    Instrument(i64),
    Kpi(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarPeriod {
    pub name: String,
    pub start: Date,
    pub end: Date,
    pub is_historical: bool,
    pub is_previous: bool,
    pub is_current: bool,
    pub is_next: bool,
}

impl CalendarPeriod {
    pub fn new(name: impl Into<String>, start: Date, end: Date, is_historical: bool) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            is_historical,
            is_previous: false,
            is_current: false,
            is_next: false,
        }
    }

    pub fn contains(&self, date: Date) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Sets previous/current/next flags in place. Flags are applied by period
/// name, so duplicated names share them.
///
/// In [`PeriodMode::DateDriven`] every period containing `today` is current;
/// overlapping or gapped calendars are classified as-is.
pub fn classify_periods(periods: &mut [CalendarPeriod], mode: PeriodMode, today: Date) {
    for period in periods.iter_mut() {
        period.is_previous = false;
        period.is_current = false;
        period.is_next = false;
    }

    let (previous, current, next) = match mode {
        PeriodMode::Reported => {
            let mut historical = periods.iter().filter(|p| p.is_historical).collect::<Vec<_>>();
            historical.sort_by(|a, b| b.start.cmp(&a.start));

            let mut upcoming = periods.iter().filter(|p| !p.is_historical).collect::<Vec<_>>();
            upcoming.sort_by_key(|p| p.start);

            (
                historical.first().map(|p| p.name.clone()),
                upcoming.first().map(|p| p.name.clone()),
                upcoming.get(1).map(|p| p.name.clone()),
            )
        }
        PeriodMode::DateDriven => {
            for period in periods.iter_mut() {
                period.is_current = period.contains(today);
            }

            let mut ended = periods.iter().filter(|p| today > p.end).collect::<Vec<_>>();
            ended.sort_by(|a, b| b.start.cmp(&a.start));

            let mut future = periods.iter().filter(|p| today < p.start).collect::<Vec<_>>();
            future.sort_by_key(|p| p.start);

            (
                ended.first().map(|p| p.name.clone()),
                None,
                future.first().map(|p| p.name.clone()),
            )
        }
    };

    for period in periods.iter_mut() {
        if previous.as_deref() == Some(period.name.as_str()) {
            period.is_previous = true;
        }
        if current.as_deref() == Some(period.name.as_str()) {
            period.is_current = true;
        }
        if next.as_deref() == Some(period.name.as_str()) {
            period.is_next = true;
        }
    }
}

/// Fiscal periods of an instrument or KPI with previous/current/next flags.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarPeriods {
    pub subject: CalendarSubject,
    pub mode: PeriodMode,
    periods: Vec<CalendarPeriod>,
    table: Table,
}

impl CalendarPeriods {
    pub async fn load(
        session: Arc<Session>,
        subject: CalendarSubject,
        mode: PeriodMode,
    ) -> Result<Self, QmcError> {
        let (instrument_id, kpi_id) = match subject {
            CalendarSubject::Instrument(id) => (Some(id), None),
            CalendarSubject::Kpi(id) => (None, Some(id)),
        };
        let request = ApiRequest::get("/api/data/calendarPeriods/init")
            .with_param("instrumentId", instrument_id)
            .with_param("kpiId", kpi_id);
        let table = session.api_wrapper(&request).await?;

        Self::from_table(subject, table, mode, OffsetDateTime::now_utc().date())
    }

    /// Builds and classifies periods from an `/init` table as of `today`.
    pub fn from_table(
        subject: CalendarSubject,
        mut table: Table,
        mode: PeriodMode,
        today: Date,
    ) -> Result<Self, QmcError> {
        if table.is_empty() {
            return Err(QmcError::data("No calendar periods found for instrument"));
        }

        let mut periods = (0..table.row_count())
            .map(|row| {
                let name = table
                    .value(row, "period_name")
                    .filter(|value| !value.is_null())
                    .map(|value| value.to_string())
                    .ok_or_else(|| QmcError::data(format!("calendar period {row} has no name")))?;
                let date_at = |column: &str| {
                    table
                        .value(row, column)
                        .and_then(|value| value.as_date())
                        .ok_or_else(|| QmcError::data(format!("calendar period '{name}' has no {column}")))
                };
                let start = date_at("period_start_date")?;
                let end = date_at("period_end_date")?;
                let is_historical = table
                    .value(row, "is_historical_time_period")
                    .and_then(|value| value.as_bool())
                    .unwrap_or(false);
                Ok(CalendarPeriod::new(name, start, end, is_historical))
            })
            .collect::<Result<Vec<_>, QmcError>>()?;

        classify_periods(&mut periods, mode, today);

        match subject {
            CalendarSubject::Instrument(id) => table.push_constant("instrument_id", Value::Int(id))?,
            CalendarSubject::Kpi(id) => table.push_constant("kpi_id", Value::Int(id))?,
        }
        let flags: [(&str, fn(&CalendarPeriod) -> bool); 3] = [
            ("is_previous_time_period", |p| p.is_previous),
            ("is_current_time_period", |p| p.is_current),
            ("is_next_time_period", |p| p.is_next),
        ];
        for (name, flag) in flags {
            let values = periods.iter().map(|p| Value::Bool(flag(p))).collect();
            table.push_column(Column::new(name, values))?;
        }

        Ok(Self {
            subject,
            mode,
            periods,
            table,
        })
    }

    pub fn periods(&self) -> &[CalendarPeriod] {
        &self.periods
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn previous_period(&self) -> Option<&CalendarPeriod> {
        self.periods.iter().find(|p| p.is_previous)
    }

    pub fn current_period(&self) -> Option<&CalendarPeriod> {
        self.periods.iter().find(|p| p.is_current)
    }

    pub fn next_period(&self) -> Option<&CalendarPeriod> {
        self.periods.iter().find(|p| p.is_next)
    }
}
