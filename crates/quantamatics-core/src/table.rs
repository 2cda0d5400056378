//! Typed tables decoded from API responses.
//!
//! Data endpoints answer with
//! `{ "schema": {col: {type, nullable}}, "data": [...], "retrievalTime": ... }`.
//! The schema decides how every cell is decoded and which polars dtype backs
//! each column. Every declared column is present in the decoded [`Table`]
//! even when no rows came back.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

use polars::prelude::*;
use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::error::QmcError;

const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

/// Declared column types understood by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Date,
    DateTime,
    Int32,
    Int64,
    Bool,
    Float64,
    Str,
    Bytes,
}

impl ColumnType {
    /// Parses the server's type name; unknown names are a schema error.
    pub fn parse(declared: &str) -> Result<Self, QmcError> {
        match declared.trim() {
            "date" | "datetime.date" => Ok(Self::Date),
            "datetime" | "np.datetime64[ns]" | "datetime64[ns]" => Ok(Self::DateTime),
            "int32" => Ok(Self::Int32),
            "int64" => Ok(Self::Int64),
            "bool" => Ok(Self::Bool),
            "float64" => Ok(Self::Float64),
            "str" => Ok(Self::Str),
            "bytes" => Ok(Self::Bytes),
            other => Err(QmcError::schema(format!(
                "Unknown DataFrame Column type returned by API call: '{other}'"
            ))),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Bool => "bool",
            Self::Float64 => "float64",
            Self::Str => "str",
            Self::Bytes => "bytes",
        }
    }

    /// Polars dtype storing this column. Every dtype is nullable; the
    /// declared `nullable` flag is enforced while decoding.
    pub fn dtype(self) -> DataType {
        match self {
            Self::Date => DataType::Date,
            Self::DateTime => DataType::Datetime(TimeUnit::Milliseconds, None),
            Self::Int32 => DataType::Int32,
            Self::Int64 => DataType::Int64,
            Self::Bool => DataType::Boolean,
            Self::Float64 => DataType::Float64,
            Self::Str => DataType::String,
            Self::Bytes => DataType::Binary,
        }
    }

    pub fn from_dtype(dtype: &DataType) -> Option<Self> {
        match dtype {
            DataType::Date => Some(Self::Date),
            DataType::Datetime(_, _) => Some(Self::DateTime),
            DataType::Int32 => Some(Self::Int32),
            DataType::Int64 => Some(Self::Int64),
            DataType::Boolean => Some(Self::Bool),
            DataType::Float64 => Some(Self::Float64),
            DataType::String => Some(Self::Str),
            DataType::Binary => Some(Self::Bytes),
            _ => None,
        }
    }
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One schema entry as communicated by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: ColumnType,
    pub nullable: bool,
}

/// A single cell read out of a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(Date),
    DateTime(PrimitiveDateTime),
    Bytes(Vec<u8>),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view. Nulls and non-numeric cells yield `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Float(value) if value.fract() == 0.0 && value.is_finite() => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<Date> {
        match self {
            Self::Date(value) => Some(*value),
            Self::DateTime(value) => Some(value.date()),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<PrimitiveDateTime> {
        match self {
            Self::Date(value) => Some(PrimitiveDateTime::new(*value, Time::MIDNIGHT)),
            Self::DateTime(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(value) => Some(value),
            Self::Str(value) => Some(value.as_bytes()),
            _ => None,
        }
    }

    /// Untyped conversion used for schemaless payloads.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(value) => Self::Bool(*value),
            JsonValue::Number(number) => number
                .as_i64()
                .map(Self::Int)
                .or_else(|| number.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            JsonValue::String(text) => Self::Str(text.clone()),
            other => Self::Str(other.to_string()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(value) => JsonValue::Bool(*value),
            Self::Int(value) => JsonValue::from(*value),
            Self::Float(value) => serde_json::Number::from_f64(*value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Str(value) => JsonValue::String(value.clone()),
            Self::Date(value) => JsonValue::String(format_date(*value)),
            Self::DateTime(value) => JsonValue::String(format_datetime(*value)),
            Self::Bytes(value) => JsonValue::String(String::from_utf8_lossy(value).into_owned()),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
            Self::Date(value) => f.write_str(&format_date(*value)),
            Self::DateTime(value) => f.write_str(&format_datetime(*value)),
            Self::Bytes(value) => f.write_str(&String::from_utf8_lossy(value)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl From<AnyValue<'_>> for Value {
    fn from(value: AnyValue<'_>) -> Self {
        match value {
            AnyValue::Null => Self::Null,
            AnyValue::Boolean(value) => Self::Bool(value),
            AnyValue::Int32(value) => Self::Int(i64::from(value)),
            AnyValue::Int64(value) => Self::Int(value),
            AnyValue::UInt32(value) => Self::Int(i64::from(value)),
            AnyValue::UInt64(value) => i64::try_from(value).map_or(Self::Float(value as f64), Self::Int),
            AnyValue::Float32(value) => Self::Float(f64::from(value)),
            AnyValue::Float64(value) => Self::Float(value),
            AnyValue::String(value) => Self::Str(value.to_owned()),
            AnyValue::StringOwned(value) => Self::Str(value.to_string()),
            AnyValue::Binary(value) => Self::Bytes(value.to_vec()),
            AnyValue::BinaryOwned(value) => Self::Bytes(value),
            AnyValue::Date(days) => date_from_days(days).map_or(Self::Null, Self::Date),
            AnyValue::Datetime(value, unit, _) => {
                datetime_from_timestamp(value, unit).map_or(Self::Null, Self::DateTime)
            }
            other => Self::Str(other.to_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Date> for Value {
    fn from(value: Date) -> Self {
        Self::Date(value)
    }
}

impl From<PrimitiveDateTime> for Value {
    fn from(value: PrimitiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

/// Cells of one column, used to assemble tables by hand.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    /// Storage type; inferred from the cells when `None`.
    pub dtype: Option<ColumnType>,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            dtype: None,
            values,
        }
    }

    pub fn typed(name: impl Into<String>, dtype: ColumnType, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            dtype: Some(dtype),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Builds the polars series. Cells that do not fit the column type
    /// are stored as nulls.
    pub fn into_series(self) -> Result<Series, QmcError> {
        let dtype = self.dtype.unwrap_or_else(|| infer_type(&self.values));
        let name = self.name.as_str();
        let values = &self.values;

        let series = match dtype {
            ColumnType::Bool => Series::new(name, values.iter().map(Value::as_bool).collect::<Vec<_>>()),
            ColumnType::Int32 => Series::new(
                name,
                values
                    .iter()
                    .map(|value| value.as_i64().and_then(|value| i32::try_from(value).ok()))
                    .collect::<Vec<_>>(),
            ),
            ColumnType::Int64 => Series::new(name, values.iter().map(Value::as_i64).collect::<Vec<_>>()),
            ColumnType::Float64 => Series::new(name, values.iter().map(Value::as_f64).collect::<Vec<_>>()),
            ColumnType::Str => Series::new(
                name,
                values
                    .iter()
                    .map(|value| (!value.is_null()).then(|| value.to_string()))
                    .collect::<Vec<_>>(),
            ),
            ColumnType::Bytes => Series::new(name, values.iter().map(Value::as_bytes).collect::<Vec<_>>()),
            ColumnType::Date => Series::new(
                name,
                values
                    .iter()
                    .map(|value| value.as_date().map(date_to_days))
                    .collect::<Vec<_>>(),
            )
            .cast(&DataType::Date)?,
            ColumnType::DateTime => Series::new(
                name,
                values
                    .iter()
                    .map(|value| value.as_datetime().map(datetime_to_millis))
                    .collect::<Vec<_>>(),
            )
            .cast(&ColumnType::DateTime.dtype())?,
        };
        Ok(series)
    }
}

/// Narrowest type holding every non-null cell: mixed integers and floats
/// widen to float, anything else mixed falls back to text.
fn infer_type(values: &[Value]) -> ColumnType {
    let mut inferred: Option<ColumnType> = None;
    for value in values {
        let kind = match value {
            Value::Null => continue,
            Value::Bool(_) => ColumnType::Bool,
            Value::Int(_) => ColumnType::Int64,
            Value::Float(_) => ColumnType::Float64,
            Value::Str(_) => ColumnType::Str,
            Value::Date(_) => ColumnType::Date,
            Value::DateTime(_) => ColumnType::DateTime,
            Value::Bytes(_) => ColumnType::Bytes,
        };
        inferred = Some(match inferred {
            None => kind,
            Some(current) if current == kind => current,
            Some(ColumnType::Int64 | ColumnType::Float64)
                if matches!(kind, ColumnType::Int64 | ColumnType::Float64) =>
            {
                ColumnType::Float64
            }
            Some(ColumnType::Date | ColumnType::DateTime)
                if matches!(kind, ColumnType::Date | ColumnType::DateTime) =>
            {
                ColumnType::DateTime
            }
            Some(_) => ColumnType::Str,
        });
    }
    inferred.unwrap_or(ColumnType::Str)
}

/// Dtype both sides of a vertical concatenation are cast to.
fn common_dtype(left: &DataType, right: &DataType) -> DataType {
    if left == right || *right == DataType::Null {
        left.clone()
    } else if *left == DataType::Null {
        right.clone()
    } else if left.is_numeric() && right.is_numeric() {
        DataType::Float64
    } else {
        DataType::String
    }
}

/// A polars data frame plus the cell-level accessors used by entities and
/// panels. All columns always hold the same number of rows.
#[derive(Debug, Clone)]
pub struct Table {
    frame: DataFrame,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.column_names() == other.column_names() && self.frame.equals_missing(&other.frame)
    }
}

impl Serialize for Table {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_records().serialize(serializer)
    }
}

impl From<DataFrame> for Table {
    fn from(frame: DataFrame) -> Self {
        Self { frame }
    }
}

impl Table {
    pub fn new() -> Self {
        Self {
            frame: DataFrame::empty(),
        }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    pub fn from_columns(columns: Vec<Column>) -> Result<Self, QmcError> {
        let mut table = Self::new();
        for column in columns {
            table.push_column(column)?;
        }
        Ok(table)
    }

    /// Zero-row table holding one column per schema entry.
    pub fn empty_with_schema(schema: &[ColumnSchema]) -> Result<Self, QmcError> {
        let columns = schema
            .iter()
            .map(|entry| Series::new_empty(&entry.name, &entry.dtype.dtype()))
            .collect::<Vec<_>>();
        Ok(Self::from(DataFrame::new(columns)?))
    }

    /// Builds an untyped table from JSON row objects. Columns appear in
    /// first-seen key order; keys absent from a row become nulls.
    pub fn from_records(records: &[JsonValue]) -> Result<Self, QmcError> {
        let mut names: Vec<String> = Vec::new();
        for record in records {
            let object = record
                .as_object()
                .ok_or_else(|| QmcError::decode("expected a JSON object per row"))?;
            for key in object.keys() {
                if !names.iter().any(|name| name == key) {
                    names.push(key.clone());
                }
            }
        }

        let columns = names
            .into_iter()
            .map(|name| {
                let values = records
                    .iter()
                    .map(|record| record.get(&name).map_or(Value::Null, Value::from_json))
                    .collect();
                Column::new(name, values)
            })
            .collect();

        Self::from_columns(columns)
    }

    pub fn row_count(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn column_count(&self) -> usize {
        self.frame.width()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.frame.get_column_names()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.get_column_index(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Series> {
        self.frame.column(name).ok()
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.column(name)
            .and_then(|series| ColumnType::from_dtype(series.dtype()))
    }

    /// Every cell of `name`, top to bottom.
    pub fn values(&self, name: &str) -> Option<Vec<Value>> {
        let series = self.column(name)?;
        Some(
            (0..series.len())
                .map(|row| series.get(row).map_or(Value::Null, Value::from))
                .collect(),
        )
    }

    pub fn value(&self, row: usize, name: &str) -> Option<Value> {
        self.column(name)?.get(row).ok().map(Value::from)
    }

    /// First-row value of `name`, failing when the column or the row is missing.
    pub fn first(&self, name: &str) -> Result<Value, QmcError> {
        let series = self
            .column(name)
            .ok_or_else(|| QmcError::data(format!("column '{name}' missing from result")))?;
        if series.is_empty() {
            return Err(QmcError::data(format!("no rows available for column '{name}'")));
        }
        Ok(Value::from(series.get(0)?))
    }

    /// Appends `column`, replacing any column with the same name in place.
    pub fn push_column(&mut self, column: Column) -> Result<(), QmcError> {
        self.push_series(column.into_series()?)
    }

    pub fn push_series(&mut self, series: Series) -> Result<(), QmcError> {
        if self.column_count() > 0 && series.len() != self.row_count() {
            return Err(QmcError::data(format!(
                "column '{}' has {} rows, table has {}",
                series.name(),
                series.len(),
                self.row_count()
            )));
        }
        self.frame.with_column(series)?;
        Ok(())
    }

    /// Adds a column repeating `value` on every row.
    /// The column type follows `value` even when the table has no rows.
    pub fn push_constant(&mut self, name: impl Into<String>, value: Value) -> Result<(), QmcError> {
        let dtype = infer_type(std::slice::from_ref(&value));
        let values = vec![value; self.row_count()];
        self.push_column(Column::typed(name, dtype, values))
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Series> {
        self.frame.drop_in_place(name).ok()
    }

    /// Renames every column listed in `mapping`, in column order. A rename
    /// onto a name that is already taken is skipped.
    pub fn rename_columns(&mut self, mapping: &HashMap<String, String>) -> Result<(), QmcError> {
        let names = self
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        for name in names {
            let Some(target) = mapping.get(&name) else {
                continue;
            };
            if *target == name || self.has_column(target) {
                continue;
            }
            self.frame.rename(&name, target)?;
        }
        Ok(())
    }

    /// Projection in the given order. Missing columns are an error.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, QmcError> {
        let columns = names
            .iter()
            .map(|name| {
                self.column(name.as_ref())
                    .cloned()
                    .ok_or_else(|| QmcError::data(format!("column '{}' not found", name.as_ref())))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from(DataFrame::new(columns)?))
    }

    /// Rows for which `keep(row_index)` is true.
    pub fn filter<F>(&self, keep: F) -> Result<Self, QmcError>
    where
        F: Fn(usize) -> bool,
    {
        let mask = (0..self.row_count()).map(keep).collect::<BooleanChunked>();
        Ok(Self::from(self.frame.filter(&mask)?))
    }

    /// Rows whose `column` date lies within `start..=end`. Null dates are dropped.
    pub fn between_dates(&self, column: &str, start: Date, end: Date) -> Result<Self, QmcError> {
        let days = col(column).cast(DataType::Date).cast(DataType::Int32);
        let frame = self
            .frame
            .clone()
            .lazy()
            .filter(
                days.clone()
                    .gt_eq(lit(date_to_days(start)))
                    .and(days.lt_eq(lit(date_to_days(end)))),
            )
            .collect()?;
        Ok(Self::from(frame))
    }

    /// Stable sort by the given columns, nulls first. Names that are not
    /// columns of the table are ignored.
    pub fn sort_by<S: AsRef<str>>(&self, by: &[S]) -> Result<Self, QmcError> {
        let keys = by
            .iter()
            .map(|name| name.as_ref())
            .filter(|name| self.has_column(name))
            .map(str::to_owned)
            .collect::<Vec<_>>();
        if keys.is_empty() || self.is_empty() {
            return Ok(self.clone());
        }
        let options = SortMultipleOptions::default().with_maintain_order(true);
        Ok(Self::from(self.frame.sort(keys, options)?))
    }

    /// Vertical concatenation. Columns missing on either side are
    /// null-filled; new columns from `other` are appended after the
    /// existing ones. Differing dtypes are unified first.
    pub fn append(&mut self, other: &Self) -> Result<(), QmcError> {
        if self.column_count() == 0 {
            self.frame = other.frame.clone();
            return Ok(());
        }

        let existing_rows = self.row_count();
        for series in other.frame.get_columns() {
            if !self.has_column(series.name()) {
                self.frame
                    .with_column(Series::full_null(series.name(), existing_rows, series.dtype()))?;
            }
        }

        let targets = self
            .frame
            .get_columns()
            .iter()
            .map(|series| (series.name().to_owned(), series.dtype().clone()))
            .collect::<Vec<_>>();

        let mut aligned = Vec::with_capacity(targets.len());
        for (name, dtype) in targets {
            let incoming = match other.column(&name) {
                Some(series) => series.clone(),
                None => Series::full_null(&name, other.row_count(), &dtype),
            };
            let common = common_dtype(&dtype, incoming.dtype());
            if common != dtype {
                let widened = self.frame.column(&name)?.cast(&common)?;
                self.frame.with_column(widened)?;
            }
            aligned.push(incoming.cast(&common)?);
        }

        self.frame.vstack_mut(&DataFrame::new(aligned)?)?;
        Ok(())
    }

    /// Moves the listed columns to the front, in the listed order.
    pub fn reorder_front<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), QmcError> {
        let mut order = names
            .iter()
            .map(|name| name.as_ref().to_owned())
            .filter(|name| self.has_column(name))
            .collect::<Vec<_>>();
        for name in self.column_names() {
            if !order.iter().any(|front| front == name) {
                order.push(name.to_owned());
            }
        }
        *self = self.select(&order)?;
        Ok(())
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<JsonValue> {
        let names = self.column_names();
        let columns = names
            .iter()
            .map(|name| self.values(name).unwrap_or_default())
            .collect::<Vec<_>>();
        (0..self.row_count())
            .map(|row| {
                let object = names
                    .iter()
                    .zip(&columns)
                    .map(|(name, values)| {
                        let cell = values.get(row).map_or(JsonValue::Null, Value::to_json);
                        ((*name).to_owned(), cell)
                    })
                    .collect::<Map<_, _>>();
                JsonValue::Object(object)
            })
            .collect()
    }
}

/// Table decoded from a data endpoint plus the server-reported retrieval time.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub table: Table,
    pub schema: Vec<ColumnSchema>,
    pub retrieval_time: Option<JsonValue>,
}

/// Decodes a `{schema, data}` body. `content_encoding` is only used to
/// describe malformed bodies.
pub fn decode_payload(body: &str, content_encoding: Option<&str>) -> Result<DecodedPayload, QmcError> {
    let payload: JsonValue = serde_json::from_str(body).map_err(|error| {
        QmcError::decode(format!(
            "Error Encoding JSON: {} ({error})",
            content_encoding.unwrap_or("identity")
        ))
    })?;

    let schema = parse_schema(payload.get("schema"))?;
    let records = normalize_rows(payload.get("data"))?;
    let table = decode_rows(&schema, &records)?;

    Ok(DecodedPayload {
        table,
        schema,
        retrieval_time: payload.get("retrievalTime").cloned(),
    })
}

fn parse_schema(schema: Option<&JsonValue>) -> Result<Vec<ColumnSchema>, QmcError> {
    let entries = match schema {
        Some(JsonValue::Object(entries)) => entries,
        Some(JsonValue::Null) | None => return Ok(Vec::new()),
        Some(_) => return Err(QmcError::decode("response schema must be a JSON object")),
    };

    entries
        .iter()
        .map(|(name, entry)| {
            let declared = entry
                .get("type")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| QmcError::schema(format!("column '{name}' has no declared type")))?;
            Ok(ColumnSchema {
                name: name.clone(),
                dtype: ColumnType::parse(declared)?,
                nullable: entry
                    .get("nullable")
                    .and_then(JsonValue::as_bool)
                    .unwrap_or(true),
            })
        })
        .collect()
}

/// Accepts row records (`[{col: v}]`) or column-oriented data
/// (`{col: [v]}` / `{col: {"0": v}}`) and returns row objects.
fn normalize_rows(data: Option<&JsonValue>) -> Result<Vec<Map<String, JsonValue>>, QmcError> {
    match data {
        None | Some(JsonValue::Null) => Ok(Vec::new()),
        Some(JsonValue::Array(rows)) => rows
            .iter()
            .map(|row| match row {
                JsonValue::Object(object) => Ok(object.clone()),
                _ => Err(QmcError::decode("response data rows must be JSON objects")),
            })
            .collect(),
        Some(JsonValue::Object(columns)) => {
            let mut rows: Vec<Map<String, JsonValue>> = Vec::new();
            for (name, cells) in columns {
                let cells: Vec<&JsonValue> = match cells {
                    JsonValue::Array(items) => items.iter().collect(),
                    JsonValue::Object(indexed) => {
                        let mut ordered = indexed
                            .iter()
                            .map(|(key, value)| (key.parse::<usize>().unwrap_or(usize::MAX), value))
                            .collect::<Vec<_>>();
                        ordered.sort_by_key(|(index, _)| *index);
                        ordered.into_iter().map(|(_, value)| value).collect()
                    }
                    _ => return Err(QmcError::decode(format!("column '{name}' is not a list"))),
                };
                if rows.len() < cells.len() {
                    rows.resize_with(cells.len(), Map::new);
                }
                for (row, cell) in rows.iter_mut().zip(cells) {
                    row.insert(name.clone(), cell.clone());
                }
            }
            Ok(rows)
        }
        Some(_) => Err(QmcError::decode("response data must be a list or an object")),
    }
}

fn decode_rows(schema: &[ColumnSchema], rows: &[Map<String, JsonValue>]) -> Result<Table, QmcError> {
    if rows.is_empty() {
        return Table::empty_with_schema(schema);
    }

    let mut table = Table::new();
    for entry in schema {
        let values = rows
            .iter()
            .map(|row| {
                decode_cell(row.get(&entry.name).unwrap_or(&JsonValue::Null), entry.dtype, entry.nullable)
                    .map_err(|reason| {
                        QmcError::decode(format!("column '{}' ({}): {reason}", entry.name, entry.dtype))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        table.push_column(Column::typed(entry.name.clone(), entry.dtype, values))?;
    }

    // Columns present in the data but absent from the schema are inferred.
    let mut extras: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !schema.iter().any(|entry| entry.name == *key) && !extras.contains(key) {
                extras.push(key.clone());
            }
        }
    }
    for name in extras {
        let values = rows
            .iter()
            .map(|row| row.get(&name).map_or(Value::Null, Value::from_json))
            .collect();
        table.push_column(Column::new(name, values))?;
    }

    Ok(table)
}

fn decode_cell(cell: &JsonValue, dtype: ColumnType, nullable: bool) -> Result<Value, String> {
    if cell.is_null() {
        return match dtype {
            ColumnType::Int32 | ColumnType::Int64 | ColumnType::Bool if !nullable => {
                Err(String::from("null in a non-nullable column"))
            }
            _ => Ok(Value::Null),
        };
    }

    match dtype {
        ColumnType::Date => match cell {
            JsonValue::String(text) => parse_date(text).map(Value::Date),
            JsonValue::Number(number) => number
                .as_i64()
                .and_then(|millis| datetime_from_timestamp(millis, TimeUnit::Milliseconds))
                .map(|value| Value::Date(value.date()))
                .ok_or_else(|| format!("invalid epoch milliseconds {number}")),
            other => Err(format!("expected a date, got {other}")),
        },
        ColumnType::DateTime => match cell {
            JsonValue::String(text) => parse_datetime(text).map(Value::DateTime),
            JsonValue::Number(number) => number
                .as_i64()
                .and_then(|millis| datetime_from_timestamp(millis, TimeUnit::Milliseconds))
                .map(Value::DateTime)
                .ok_or_else(|| format!("invalid epoch milliseconds {number}")),
            other => Err(format!("expected a timestamp, got {other}")),
        },
        ColumnType::Int32 | ColumnType::Int64 => {
            let value = match cell {
                JsonValue::Number(number) => number.as_i64().or_else(|| {
                    number
                        .as_f64()
                        .filter(|value| value.fract() == 0.0)
                        .map(|value| value as i64)
                }),
                JsonValue::String(text) => text.trim().parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(|| format!("expected an integer, got {cell}"))?;

            if dtype == ColumnType::Int32 && i32::try_from(value).is_err() {
                return Err(format!("{value} does not fit in int32"));
            }
            Ok(Value::Int(value))
        }
        ColumnType::Bool => match cell {
            JsonValue::Bool(value) => Ok(Value::Bool(*value)),
            JsonValue::Number(number) => match number.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(format!("expected a boolean, got {number}")),
            },
            other => Err(format!("expected a boolean, got {other}")),
        },
        ColumnType::Float64 => match cell {
            JsonValue::Number(number) => number
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| format!("expected a float, got {number}")),
            JsonValue::String(text) => match text.trim().parse::<f64>() {
                Ok(value) if value.is_nan() => Ok(Value::Null),
                Ok(value) => Ok(Value::Float(value)),
                Err(_) => Err(format!("expected a float, got '{text}'")),
            },
            other => Err(format!("expected a float, got {other}")),
        },
        ColumnType::Str => match cell {
            JsonValue::String(text) => Ok(Value::Str(text.clone())),
            other => Ok(Value::Str(other.to_string())),
        },
        ColumnType::Bytes => match cell {
            JsonValue::String(text) => Ok(Value::Bytes(text.clone().into_bytes())),
            other => Ok(Value::Bytes(other.to_string().into_bytes())),
        },
    }
}

/// `YYYY-MM-DD`, also accepting a full timestamp whose date part is used.
pub fn parse_date(text: &str) -> Result<Date, String> {
    let trimmed = text.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    Date::parse(date_part, format_description!("[year]-[month]-[day]"))
        .map_err(|_| format!("invalid date '{text}'"))
}

/// RFC 3339 (converted to UTC), naive `YYYY-MM-DD[T ]HH:MM:SS[.fff]`, or a
/// bare date at midnight.
pub fn parse_datetime(text: &str) -> Result<PrimitiveDateTime, String> {
    let trimmed = text.trim();

    if let Ok(value) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        let utc = value.to_offset(UtcOffset::UTC);
        return Ok(PrimitiveDateTime::new(utc.date(), utc.time()));
    }

    let normalized = trimmed.replacen(' ', "T", 1);
    let formats = [
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    ];
    for format in formats {
        if let Ok(value) = PrimitiveDateTime::parse(&normalized, format) {
            return Ok(value);
        }
    }

    if trimmed.len() == 10 {
        if let Ok(date) = parse_date(trimmed) {
            return Ok(PrimitiveDateTime::new(date, Time::MIDNIGHT));
        }
    }

    Err(format!("invalid timestamp '{text}'"))
}

pub fn format_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

/// `YYYY-MM-DDTHH:MM:SS`, with milliseconds only when they are not zero.
pub fn format_datetime(value: PrimitiveDateTime) -> String {
    let formatted = if value.millisecond() == 0 {
        value.format(format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"))
    } else {
        value.format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
        ))
    };
    formatted.unwrap_or_else(|_| value.to_string())
}

/// Days since 1970-01-01, the physical value of a polars `Date`.
pub fn date_to_days(date: Date) -> i32 {
    date.to_julian_day() - UNIX_EPOCH_JULIAN_DAY
}

pub fn date_from_days(days: i32) -> Option<Date> {
    Date::from_julian_day(days.checked_add(UNIX_EPOCH_JULIAN_DAY)?).ok()
}

fn datetime_to_millis(value: PrimitiveDateTime) -> i64 {
    (value.assume_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn datetime_from_timestamp(value: i64, unit: TimeUnit) -> Option<PrimitiveDateTime> {
    let nanos = match unit {
        TimeUnit::Nanoseconds => i128::from(value),
        TimeUnit::Microseconds => i128::from(value) * 1_000,
        TimeUnit::Milliseconds => i128::from(value) * 1_000_000,
    };
    let instant = OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()?;
    Some(PrimitiveDateTime::new(instant.date(), instant.time()))
}

/// Whole days from `start` to `end` (negative when `end` is earlier).
pub fn days_between(start: Date, end: Date) -> i64 {
    (end - start).whole_days()
}

/// `date` shifted by `days`, or `None` outside the supported calendar range.
pub fn add_days(date: Date, days: i64) -> Option<Date> {
    date.checked_add(Duration::days(days))
}

/// Lower-cased header lookup helper shared with the session.
pub(crate) fn content_encoding(headers: &BTreeMap<String, String>) -> Option<&str> {
    headers.get("content-encoding").map(String::as_str)
}
