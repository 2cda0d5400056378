//! RPC-style facade over the remote function gateway.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::QmcError;
use crate::params::{ParamValue, ParamsEncoding};
use crate::session::{ApiRequest, Session};
use crate::table::{Column, Table, Value};

const LIST_PATH: &str = "/api/function/getAll";
const RUN_PATH: &str = "/api/function/runFunction";
const RESTART_PATH: &str = "/api/function/restartEnvironment";

/// One directory entry as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionMetadata {
    pub name: String,
    #[serde(rename = "assetName", default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Every other field the gateway reports (ids, types, ...).
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RunEnvelope {
    #[serde(default)]
    error: Option<JsonValue>,
    #[serde(default)]
    body: Option<JsonValue>,
}

/// Lists and invokes named remote functions. The directory is fetched once
/// and cached for metadata lookups.
#[derive(Debug)]
pub struct GatewayClient {
    session: Arc<Session>,
    directory: Mutex<Option<Vec<FunctionMetadata>>>,
}

impl GatewayClient {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            directory: Mutex::new(None),
        }
    }

    /// Fetches the directory and returns a `Name`/`Provider`/`Description` table.
    pub async fn get_function_list(&self) -> Result<Table, QmcError> {
        let response = self.session.handle_request(&ApiRequest::get(LIST_PATH)).await?;
        let directory: Vec<FunctionMetadata> = serde_json::from_str(&response.body)
            .map_err(|error| QmcError::decode(format!("Error decoding function list: {error}")))?;

        let table = listing_table(&directory)?;
        *self.lock_directory() = Some(directory);
        Ok(table)
    }

    /// Directory entries whose `name` matches, fetching the directory first
    /// when it has not been loaded yet.
    pub async fn get_function_metadata(&self, name: &str) -> Result<Vec<FunctionMetadata>, QmcError> {
        if self.lock_directory().is_none() {
            self.get_function_list().await?;
        }

        Ok(self
            .lock_directory()
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|entry| entry.name == name)
            .cloned()
            .collect())
    }

    /// Restarts the remote execution environment. Failures are reported as `false`.
    pub async fn restart_environment(&self) -> bool {
        let request = ApiRequest::post(RESTART_PATH);
        match self.session.handle_request(&request).await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!(error = %error, "environment restart failed");
                false
            }
        }
    }

    /// Runs `name` with `args`. A gateway-reported error becomes an
    /// execution error; a body that is not row-oriented JSON is returned as a
    /// single `Result` cell.
    pub async fn execute_function_call(&self, name: &str, args: JsonValue) -> Result<Table, QmcError> {
        let request = ApiRequest::post(RUN_PATH)
            .with_encoding(ParamsEncoding::Json)
            .with_param("FunctionName", name)
            .with_param("BatchId", ParamValue::Null)
            .with_param("Args", args);

        let response = self.session.handle_request(&request).await?;
        let envelope: RunEnvelope = serde_json::from_str(&response.body)
            .map_err(|error| QmcError::decode(format!("Error decoding function result: {error}")))?;

        match envelope.error {
            Some(JsonValue::Null) | None => {}
            Some(JsonValue::String(message)) => {
                return Err(QmcError::execution(format!("Execution Error: {message}")))
            }
            Some(other) => return Err(QmcError::execution(format!("Execution Error: {other}"))),
        }

        Ok(body_table(envelope.body.unwrap_or(JsonValue::Null)))
    }

    fn lock_directory(&self) -> std::sync::MutexGuard<'_, Option<Vec<FunctionMetadata>>> {
        self.directory
            .lock()
            .expect("gateway directory lock is not poisoned")
    }
}

fn listing_table(directory: &[FunctionMetadata]) -> Result<Table, QmcError> {
    let text = |value: Option<&String>| value.map_or(Value::Null, |text| Value::Str(text.clone()));

    Table::from_columns(vec![
        Column::new(
            "Name",
            directory.iter().map(|entry| Value::Str(entry.name.clone())).collect(),
        ),
        Column::new(
            "Provider",
            directory.iter().map(|entry| text(entry.provider.as_ref())).collect(),
        ),
        Column::new(
            "Description",
            directory.iter().map(|entry| text(entry.description.as_ref())).collect(),
        ),
    ])
}

fn body_table(body: JsonValue) -> Table {
    let parsed = match &body {
        JsonValue::String(text) => serde_json::from_str::<JsonValue>(text).ok(),
        other => Some(other.clone()),
    };

    if let Some(JsonValue::Array(rows)) = parsed {
        if let Ok(table) = Table::from_records(&rows) {
            return table;
        }
    }

    let raw = match body {
        JsonValue::String(text) => text,
        other => other.to_string(),
    };
    Table::from_columns(vec![Column::new("Result", vec![Value::Str(raw)])]).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ClientConfig;
    use crate::http_client::ScriptedHttpClient;
    use crate::retry::RetryConfig;
    use crate::ErrorKind;

    fn gateway(http: Arc<ScriptedHttpClient>) -> GatewayClient {
        let config = ClientConfig::default()
            .with_endpoint("https://api.example.test")
            .with_api_key("key")
            .with_retry(RetryConfig::fixed(Duration::ZERO, 3));
        GatewayClient::new(Arc::new(Session::with_http_client(config, http)))
    }

    #[tokio::test]
    async fn directory_is_fetched_once_for_metadata_lookups() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(
            r#"[{"name":"forecast","assetName":"QMC","description":"Revenue model","functionId":7},
                {"name":"nowcast","assetName":"QMC","description":"Daily model"}]"#,
        );
        let client = gateway(http.clone());

        let matches = client.get_function_metadata("forecast").await.expect("lookup");
        let none = client.get_function_metadata("unknown").await.expect("lookup");

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].provider.as_deref(), Some("QMC"));
        assert_eq!(matches[0].extra.get("functionId"), Some(&JsonValue::from(7)));
        assert!(none.is_empty());
        assert_eq!(http.request_count(), 1);
    }

    #[tokio::test]
    async fn non_tabular_body_becomes_a_single_result_cell() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(r#"{"error":null,"body":"done"}"#);
        let client = gateway(http);

        let table = client
            .execute_function_call("forecast", serde_json::json!({}))
            .await
            .expect("executes");

        assert_eq!(table.column_names(), vec!["Result"]);
        assert_eq!(table.value(0, "Result"), Some(Value::Str(String::from("done"))));
    }

    #[tokio::test]
    async fn restart_swallows_failures() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_status(404, "gone");
        let client = gateway(http);

        assert!(!client.restart_environment().await);
    }

    #[tokio::test]
    async fn reported_error_is_an_execution_error() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.push_json(r#"{"error":"division by zero","body":null}"#);
        let client = gateway(http);

        let error = client
            .execute_function_call("forecast", serde_json::json!({"ticker": "ROST"}))
            .await
            .expect_err("must fail");

        assert_eq!(error.kind(), ErrorKind::Execution);
        assert_eq!(error.message(), "Execution Error: division by zero");
    }
}
