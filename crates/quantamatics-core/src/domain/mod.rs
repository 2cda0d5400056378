//! # Domain Entities
//!
//! Typed wrappers over the data endpoints. Every entity is loaded eagerly
//! through a shared [`Session`](crate::Session) and keeps the tables it
//! received.
//!
//! | Type | Endpoint family |
//! |------|-----------------|
//! | [`Instrument`] | `/api/data/instrument/*` |
//! | [`Company`] | `/api/data/company/init` |
//! | [`Universe`] | `/api/data/universe/init` |
//! | [`Kpi`] | `/api/data/kpi/*` |
//! | [`FinancialStatement`] | `/api/data/financialStatement/*` |
//! | [`CalendarPeriods`] | `/api/data/calendarPeriods/init` |

mod fundamentals;
mod instrument;

pub use fundamentals::{
    classify_periods, CalendarPeriod, CalendarPeriods, CalendarSubject, FinancialStatement, Kpi,
    KpiQuery, PeriodMode, DEFAULT_ESTIMATE_DATASET, DEFAULT_ESTIMATE_VALUE_TYPE,
    DEFAULT_HISTORY_DATASET, DEFAULT_HISTORY_VALUE_TYPE,
};
pub use instrument::{Company, Instrument, InstrumentQuery, Universe, UniverseQuery};

use crate::error::QmcError;
use crate::table::{Table, Value};

/// First-row text value; nulls become `None`.
pub(crate) fn first_text(table: &Table, column: &str) -> Result<Option<String>, QmcError> {
    Ok(match table.first(column)? {
        Value::Null => None,
        Value::Str(text) => Some(text),
        other => Some(other.to_string()),
    })
}

/// First-row integer value; nulls become `None`.
pub(crate) fn first_int(table: &Table, column: &str) -> Result<Option<i64>, QmcError> {
    match table.first(column)? {
        Value::Null => Ok(None),
        value => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| QmcError::data(format!("column '{column}' is not an integer: {value}"))),
    }
}

pub(crate) fn required_int(table: &Table, column: &str) -> Result<i64, QmcError> {
    first_int(table, column)?
        .ok_or_else(|| QmcError::data(format!("column '{column}' is empty")))
}

fn display_or_none<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| String::from("None"), |value| value.to_string())
}
