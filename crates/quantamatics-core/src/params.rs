//! Request parameters and their wire encodings.

use serde_json::{Map, Number, Value as JsonValue};
use time::Date;

use crate::table::format_date;

/// How parameters travel to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamsEncoding {
    /// URL query string.
    #[default]
    Url,
    /// JSON request body.
    Json,
}

/// A single request parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(Date),
    List(Vec<ParamValue>),
    /// Arbitrary JSON, only meaningful for [`ParamsEncoding::Json`].
    Json(JsonValue),
}

impl ParamValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Primitive string form used in query strings. `None` for nulls.
    pub fn to_query_string(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(value) => Some(value.to_string()),
            Self::Int(value) => Some(value.to_string()),
            Self::Float(value) => Some(value.to_string()),
            Self::Str(value) => Some(value.clone()),
            Self::Date(value) => Some(format_date(*value)),
            Self::List(_) => None,
            Self::Json(JsonValue::Null) => None,
            Self::Json(JsonValue::String(value)) => Some(value.clone()),
            Self::Json(other) => Some(other.to_string()),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(value) => JsonValue::Bool(*value),
            Self::Int(value) => JsonValue::Number((*value).into()),
            Self::Float(value) => Number::from_f64(*value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Str(value) => JsonValue::String(value.clone()),
            Self::Date(value) => JsonValue::String(format_date(*value)),
            Self::List(values) => JsonValue::Array(values.iter().map(Self::to_json).collect()),
            Self::Json(value) => value.clone(),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

impl From<Date> for ParamValue {
    fn from(value: Date) -> Self {
        Self::Date(value)
    }
}

impl From<JsonValue> for ParamValue {
    fn from(value: JsonValue) -> Self {
        Self::Json(value)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Ordered parameter list; insertion order is preserved on the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    entries: Vec<(String, ParamValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts or replaces `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Query pairs with nulls dropped and lists expanded into repeated keys.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            match value {
                ParamValue::List(items) => {
                    pairs.extend(
                        items
                            .iter()
                            .filter_map(ParamValue::to_query_string)
                            .map(|item| (name.clone(), item)),
                    );
                }
                ParamValue::Json(JsonValue::Array(items)) => {
                    pairs.extend(items.iter().filter(|item| !item.is_null()).map(|item| {
                        let text = match item {
                            JsonValue::String(text) => text.clone(),
                            other => other.to_string(),
                        };
                        (name.clone(), text)
                    }));
                }
                other => {
                    if let Some(text) = other.to_query_string() {
                        pairs.push((name.clone(), text));
                    }
                }
            }
        }
        pairs
    }

    /// Percent-encoded query string without the leading `?`.
    pub fn to_query_string(&self) -> String {
        self.query_pairs()
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// JSON object body; nulls are kept.
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .entries
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<Map<_, _>>();
        JsonValue::Object(map)
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn url_encoding_drops_nulls_and_stringifies_primitives() {
        let params = Params::new()
            .with("instrumentId", 42_i64)
            .with("primaryOnly", false)
            .with("asOfDate", date!(2024 - 03 - 31))
            .with("kpiName", None::<String>)
            .with("weight", 1.5);

        assert_eq!(
            params.query_pairs(),
            vec![
                (String::from("instrumentId"), String::from("42")),
                (String::from("primaryOnly"), String::from("false")),
                (String::from("asOfDate"), String::from("2024-03-31")),
                (String::from("weight"), String::from("1.5")),
            ]
        );
    }

    #[test]
    fn lists_become_repeated_keys_and_values_are_percent_encoded() {
        let params = Params::new()
            .with("dimensions", vec!["date", "card type"])
            .with("panelName", "USCP Summary v3.1");

        assert_eq!(
            params.to_query_string(),
            "dimensions=date&dimensions=card%20type&panelName=USCP%20Summary%20v3.1"
        );
    }

    #[test]
    fn json_encoding_keeps_nulls_and_nests_lists() {
        let params = Params::new()
            .with("FunctionName", "forecast")
            .with("BatchId", ParamValue::Null)
            .with("Args", serde_json::json!({"ticker": "ROST"}));

        assert_eq!(
            params.to_json(),
            serde_json::json!({
                "FunctionName": "forecast",
                "BatchId": null,
                "Args": {"ticker": "ROST"}
            })
        );
    }

    #[test]
    fn insert_replaces_existing_key_in_place() {
        let mut params = Params::new().with("a", 1_i64).with("b", 2_i64);
        params.insert("a", 3_i64);

        assert_eq!(params.len(), 2);
        assert_eq!(params.get("a"), Some(&ParamValue::Int(3)));
        assert_eq!(params.iter().next().map(|(name, _)| name), Some("a"));
    }
}
