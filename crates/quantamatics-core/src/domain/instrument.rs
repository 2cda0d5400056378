use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::OnceCell;

use super::{display_or_none, first_text, required_int};
use crate::domain::fundamentals::{CalendarPeriods, CalendarSubject, FinancialStatement, PeriodMode};
use crate::error::QmcError;
use crate::session::{ApiRequest, Session};
use crate::settings::SymbologyType;
use crate::table::{Table, Value};

/// Lookup key for [`Instrument::load`]. Either a symbol or an id is expected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstrumentQuery {
    pub symbol: Option<String>,
    pub symbology_type: Option<SymbologyType>,
    pub id: Option<i64>,
}

impl InstrumentQuery {
    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            ..Self::default()
        }
    }

    pub fn id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn with_symbology(mut self, symbology_type: SymbologyType) -> Self {
        self.symbology_type = Some(symbology_type);
        self
    }
}

/// A listed instrument and its lazily loaded related entities.
#[derive(Debug)]
pub struct Instrument {
    session: Arc<Session>,
    pub id: i64,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub symbology_type: Option<SymbologyType>,
    table: Table,
    company: OnceCell<Company>,
    calendar_periods: OnceCell<CalendarPeriods>,
    financial_statement: OnceCell<FinancialStatement>,
}

impl Instrument {
    /// Loads exactly one instrument. `preload_level` 1 also loads the
    /// company, 2 adds calendar periods and 3 the financial statement.
    pub async fn load(
        session: Arc<Session>,
        query: InstrumentQuery,
        preload_level: u8,
    ) -> Result<Self, QmcError> {
        let request = ApiRequest::get("/api/data/instrument/load")
            .with_param("instrumentSymbol", query.symbol.clone())
            .with_param(
                "instrumentSymbologyType",
                query.symbology_type.map(SymbologyType::as_str),
            )
            .with_param("instrumentId", query.id);
        let table = session.api_wrapper(&request).await?;

        match table.row_count() {
            0 => {
                return Err(QmcError::data(format!(
                    "No Instrument Found for Symbol: {} | ID: {}",
                    display_or_none(query.symbol.as_deref()),
                    display_or_none(query.id)
                )))
            }
            1 => {}
            rows => {
                tracing::debug!(rows, "instrument lookup returned several rows");
                return Err(QmcError::data(format!(
                    "Critical - More than one Instrument Found for Symbol: {} | ID: {}",
                    display_or_none(query.symbol.as_deref()),
                    display_or_none(query.id)
                )));
            }
        }

        let instrument = Self {
            id: required_int(&table, "instrument_id")?,
            symbol: first_text(&table, "symbol")?,
            name: first_text(&table, "instrument_name")?,
            sector: first_text(&table, "sector_name")?,
            industry: first_text(&table, "industry_name")?,
            symbology_type: query.symbology_type,
            session,
            table,
            company: OnceCell::new(),
            calendar_periods: OnceCell::new(),
            financial_statement: OnceCell::new(),
        };

        if preload_level > 2 {
            instrument.financial_statement().await?;
        }
        if preload_level > 1 {
            instrument.calendar_periods().await?;
        }
        if preload_level > 0 {
            instrument.company().await?;
        }

        Ok(instrument)
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub async fn company(&self) -> Result<&Company, QmcError> {
        self.company
            .get_or_try_init(|| Company::load(Arc::clone(&self.session), None, Some(self.id)))
            .await
    }

    pub async fn calendar_periods(&self) -> Result<&CalendarPeriods, QmcError> {
        self.calendar_periods
            .get_or_try_init(|| {
                CalendarPeriods::load(
                    Arc::clone(&self.session),
                    CalendarSubject::Instrument(self.id),
                    PeriodMode::Reported,
                )
            })
            .await
    }

    pub async fn financial_statement(&self) -> Result<&FinancialStatement, QmcError> {
        self.financial_statement
            .get_or_try_init(|| async {
                Ok(FinancialStatement::new(Arc::clone(&self.session), self.id, None))
            })
            .await
    }

    /// Symbology type name → symbol.
    pub async fn get_symbology(&self) -> Result<BTreeMap<String, String>, QmcError> {
        let request = ApiRequest::get("/api/data/instrument/getSymbology")
            .with_param("instrumentId", self.id);
        let table = self.session.api_wrapper(&request).await?;

        let (Some(kinds), Some(symbols)) = (table.values("symbology_type"), table.values("symbol")) else {
            return Ok(BTreeMap::new());
        };

        Ok(kinds
            .into_iter()
            .zip(symbols)
            .filter_map(|(kind, symbol)| match (kind, symbol) {
                (Value::Str(kind), Value::Str(symbol)) => Some((kind, symbol)),
                _ => None,
            })
            .collect())
    }

    pub async fn get_brands(&self, brand_name: Option<&str>) -> Result<Table, QmcError> {
        let request = ApiRequest::get("/api/data/instrument/getBrands")
            .with_param("instrumentId", self.id)
            .with_param("brandName", brand_name);
        self.session.api_wrapper(&request).await
    }
}

/// The issuer behind an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Company {
    pub id: i64,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub industry_group: Option<String>,
    pub vertical: Option<String>,
    pub subvertical: Option<String>,
}

impl Company {
    pub async fn load(
        session: Arc<Session>,
        company_id: Option<i64>,
        instrument_id: Option<i64>,
    ) -> Result<Self, QmcError> {
        if company_id.is_none() && instrument_id.is_none() {
            return Err(QmcError::data("Either Company or Instrument ID is required"));
        }

        let request = ApiRequest::get("/api/data/company/init")
            .with_param("companyId", company_id)
            .with_param("instrumentId", instrument_id);
        let table = session.api_wrapper(&request).await?;

        match table.row_count() {
            0 => return Err(QmcError::data("No company found")),
            1 => {}
            _ => return Err(QmcError::data("More than one company selected")),
        }

        Ok(Self {
            id: required_int(&table, "company_id")?,
            name: first_text(&table, "company_name")?,
            sector: first_text(&table, "sector_name")?,
            industry: first_text(&table, "industry_name")?,
            industry_group: first_text(&table, "industry_group_name")?,
            vertical: first_text(&table, "vertical_name")?,
            subvertical: first_text(&table, "subvertical_name")?,
        })
    }
}

/// Filters for [`Universe::load`]; every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UniverseQuery {
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub instrument_symbol: Option<String>,
    pub symbology_type: SymbologyType,
    pub panel_name: Option<String>,
}

impl UniverseQuery {
    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }

    pub fn with_panel(mut self, panel_name: impl Into<String>) -> Self {
        self.panel_name = Some(panel_name.into());
        self
    }
}

/// A set of instruments matching a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Universe {
    table: Table,
}

impl Universe {
    pub async fn load(session: Arc<Session>, query: UniverseQuery) -> Result<Self, QmcError> {
        let request = ApiRequest::get("/api/data/universe/init")
            .with_param("sector", query.sector)
            .with_param("industry", query.industry)
            .with_param("instrumentSymbol", query.instrument_symbol)
            .with_param("instrumentSymbologyType", query.symbology_type.as_str())
            .with_param("panelName", query.panel_name);
        let table = session.api_wrapper(&request).await?;

        if table.is_empty() {
            return Err(QmcError::data("No Instruments Found"));
        }
        Ok(Self { table })
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.table.row_count()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
