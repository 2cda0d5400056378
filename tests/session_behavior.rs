//! Behaviour of the authenticated request path as seen by SDK users.

use std::sync::Arc;

use quantamatics_core::{ApiRequest, HttpError, HttpResponse, ParamsEncoding};
use quantamatics_tests::*;
use serde_json::json;

// =============================================================================
// Retry policy
// =============================================================================

#[tokio::test]
async fn when_server_fails_twice_then_third_attempt_result_is_returned() {
    // Given: the server answers 503, 502 and then succeeds
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_status(503, "busy")
        .push_status(502, "bad gateway")
        .push_json(payload(&[("symbol", "str")], json!([{"symbol": "ROST"}])));
    let session = keyed_session(&http);

    // When: a table is requested
    let table = session
        .api_wrapper(&ApiRequest::get("/api/data/instrument/load"))
        .await
        .expect("third attempt succeeds");

    // Then: exactly three requests were sent and the rows decoded
    assert_eq!(http.request_count(), 3);
    assert_eq!(table.value(0, "symbol"), Some(Value::from("ROST")));
}

#[tokio::test]
async fn when_every_attempt_fails_with_5xx_then_last_status_is_reported() {
    // Given: three server errors in a row
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_status(500, "one")
        .push_status(500, "two")
        .push_status(504, "timeout");
    let session = keyed_session(&http);

    // When: the request is sent
    let error = session
        .handle_request(&ApiRequest::get("/api/data/x"))
        .await
        .expect_err("retries are exhausted");

    // Then: a server error carries the last status and body
    assert_eq!(error.kind(), ErrorKind::Server);
    assert_eq!(error.status(), Some(504));
    assert_eq!(error.message(), "Multiple HTTP Server Errors, Last Error: 504 - timeout");
    assert_eq!(http.request_count(), 3);
}

#[tokio::test]
async fn when_server_rejects_credentials_then_no_retry_happens() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_status(401, "nope").push_status(200, "{}");
    let session = keyed_session(&http);

    let error = session
        .handle_request(&ApiRequest::get("/api/data/x"))
        .await
        .expect_err("401 is final");

    assert_eq!(error.kind(), ErrorKind::Auth);
    assert_eq!(error.message(), "Authentication Failed");
    assert_eq!(http.request_count(), 1);
    assert_eq!(http.remaining(), 1);
}

#[tokio::test]
async fn when_request_is_malformed_then_client_error_keeps_body() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_status(400, "missing instrumentId");
    let session = keyed_session(&http);

    let error = session
        .handle_request(&ApiRequest::get("/api/data/x"))
        .await
        .expect_err("400 is final");

    assert_eq!(error.kind(), ErrorKind::Client);
    assert_eq!(error.status(), Some(400));
    assert!(error.message().contains("missing instrumentId"));
}

#[tokio::test]
async fn when_status_is_unexpected_then_http_error_is_returned() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_status(404, "not here");
    let session = keyed_session(&http);

    let error = session
        .handle_request(&ApiRequest::get("/api/data/x"))
        .await
        .expect_err("404 is final");

    assert_eq!(error.kind(), ErrorKind::Http);
    assert_eq!(error.status(), Some(404));
}

#[tokio::test]
async fn when_transport_fails_then_connection_error_names_the_endpoint() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_error(HttpError::new("connection refused"));
    let session = keyed_session(&http);

    let error = session
        .handle_request(&ApiRequest::get("/api/data/x"))
        .await
        .expect_err("transport error");

    assert_eq!(error.kind(), ErrorKind::Connection);
    assert!(error.message().contains(TEST_ENDPOINT));
    assert_eq!(http.request_count(), 1);
}

// =============================================================================
// Credentials
// =============================================================================

#[tokio::test]
async fn when_no_credentials_are_set_then_nothing_is_sent() {
    // Given: a session without token or API key
    let http = Arc::new(ScriptedHttpClient::new());
    let transport: Arc<ScriptedHttpClient> = Arc::clone(&http);
    let session = Session::with_http_client(offline_config(), transport);

    // When: a request is attempted
    let error = session
        .handle_request(&ApiRequest::get("/api/data/x"))
        .await
        .expect_err("no credentials");

    // Then: it fails locally
    assert_eq!(error.kind(), ErrorKind::Config);
    assert_eq!(error.message(), "Not logged in or have not provided an API key");
    assert_eq!(http.request_count(), 0);
}

#[tokio::test]
async fn when_a_token_is_cached_then_it_wins_over_the_api_key() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json("{}");
    let session = keyed_session(&http);
    session.set_token(unsigned_token(now() + 3600));

    session
        .handle_request(&ApiRequest::get("/api/data/x"))
        .await
        .expect("succeeds");

    let request = &http.requests()[0];
    assert!(request
        .header("authorization")
        .is_some_and(|value| value.starts_with("Bearer ")));
    assert_eq!(request.header("x-api-key"), None);
}

#[test]
fn token_expiring_within_the_margin_is_not_handed_out() {
    // Given: tokens expiring 50 s and 200 s from a fixed instant
    let session = Session::with_http_client(offline_config(), Arc::new(ScriptedHttpClient::new()));
    let at = 1_700_000_000;

    // When/Then: the short-lived one is refused, the other returned
    session.set_token(unsigned_token(at + 50));
    let error = session.get_api_token_at(at).expect_err("too close to expiry");
    assert_eq!(error.kind(), ErrorKind::Auth);

    let fresh = unsigned_token(at + 200);
    session.set_token(fresh.clone());
    assert_eq!(session.get_api_token_at(at), Ok(fresh));
}

#[test]
fn missing_token_asks_for_login() {
    let session = Session::with_http_client(offline_config(), Arc::new(ScriptedHttpClient::new()));

    let error = session.get_api_token().expect_err("no token");

    assert_eq!(error.kind(), ErrorKind::Config);
    assert_eq!(
        error.message(),
        "Access Token Not Set. Use login() Method to Set Access Token"
    );
}

#[tokio::test]
async fn when_login_succeeds_then_token_is_used_for_later_calls() {
    // Given: the login endpoint hands out a token
    let token = unsigned_token(now() + 3600);
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(json!({ "token": token }).to_string()).push_json("{}");
    let transport: Arc<ScriptedHttpClient> = Arc::clone(&http);
    let session = Session::with_http_client(offline_config(), transport);

    // When: the user logs in and issues a request
    assert_eq!(session.login("analyst@example.com", "secret").await, Ok(true));
    session
        .handle_request(&ApiRequest::get("/api/data/x"))
        .await
        .expect("authorized");

    // Then: credentials were posted as JSON and the token sent as bearer
    let requests = http.requests();
    assert!(requests[0].url.ends_with("/api/account/login"));
    let body: serde_json::Value =
        serde_json::from_str(requests[0].body.as_deref().unwrap_or_default()).expect("json body");
    assert_eq!(body["email"], "analyst@example.com");
    assert_eq!(requests[1].header("authorization"), Some(format!("Bearer {token}").as_str()));
}

#[tokio::test]
async fn when_login_is_refused_then_auth_error_is_returned() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_response(HttpResponse::new(401, "bad password"));
    let transport: Arc<ScriptedHttpClient> = Arc::clone(&http);
    let session = Session::with_http_client(offline_config(), transport);

    let error = session.login("analyst", "wrong").await.expect_err("refused");

    assert_eq!(error.kind(), ErrorKind::Auth);
    assert!(!session.has_credentials());
}

// =============================================================================
// Request shape and decoding
// =============================================================================

#[tokio::test]
async fn request_headers_reflect_compression_and_caching_choices() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json("{}").push_json("{}");
    let session = keyed_session(&http);

    session
        .handle_request(
            &ApiRequest::get("/api/data/x")
                .with_compression(true)
                .with_caching(false),
        )
        .await
        .expect("ok");
    session
        .handle_request(&ApiRequest::get("/api/data/x"))
        .await
        .expect("ok");

    let requests = http.requests();
    assert_eq!(requests[0].header("accept-encoding"), Some("br"));
    assert_eq!(requests[0].header("cache-control"), Some("no-cache"));
    assert_eq!(requests[1].header("accept-encoding"), Some("identity"));
    assert_eq!(requests[1].header("cache-control"), None);
    assert_eq!(requests[1].header("user-agent"), Some("Quantamatics-RustLib"));
    assert!(requests[1].header("x-qmc-client-version").is_some());
}

#[tokio::test]
async fn list_parameters_become_repeated_query_keys() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json("{}");
    let session = keyed_session(&http);

    session
        .handle_request(
            &ApiRequest::get("/api/data/panel/summaryDataLoad")
                .with_param("ticker", "ROST")
                .with_param("merchants", Option::<Vec<String>>::None)
                .with_param("measures", vec!["spend", "card count"]),
        )
        .await
        .expect("ok");

    let url = &http.requests()[0].url;
    assert!(url.ends_with("?ticker=ROST&measures=spend&measures=card%20count"));
}

#[tokio::test]
async fn json_encoded_parameters_travel_in_the_body() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json("{}");
    let session = keyed_session(&http);

    session
        .handle_request(
            &ApiRequest::get("/api/data/kpi/getHistory")
                .with_encoding(ParamsEncoding::Json)
                .with_param("kpiId", 7_i64),
        )
        .await
        .expect("ok");

    let request = &http.requests()[0];
    assert!(!request.url.contains('?'));
    assert_eq!(request.body.as_deref(), Some(r#"{"kpiId":7}"#));
    assert_eq!(request.header("content-type"), Some("application/json"));
}

#[tokio::test]
async fn zero_row_result_still_carries_its_schema() {
    // Given: a schema with no rows
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(payload(
        &[("instrument_id", "int64"), ("symbol", "str"), ("listed", "date")],
        json!([]),
    ));
    let session = keyed_session(&http);

    // When: decoded
    let table = session
        .api_wrapper(&ApiRequest::get("/api/data/instrument/load"))
        .await
        .expect("decodes");

    // Then: every declared column exists with its type
    assert!(table.is_empty());
    assert_eq!(table.column_names(), vec!["instrument_id", "symbol", "listed"]);
    assert_eq!(
        table.column_type("listed"),
        Some(quantamatics_core::ColumnType::Date)
    );
}

#[tokio::test]
async fn unknown_column_type_is_a_schema_error() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(payload(&[("weird", "complex128")], json!([])));
    let session = keyed_session(&http);

    let error = session
        .api_wrapper(&ApiRequest::get("/api/data/x"))
        .await
        .expect_err("unknown type");

    assert_eq!(error.kind(), ErrorKind::Schema);
}

#[tokio::test]
async fn body_that_is_not_json_is_a_decode_error() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json("<html>maintenance</html>");
    let session = keyed_session(&http);

    let error = session
        .api_wrapper(&ApiRequest::get("/api/data/x"))
        .await
        .expect_err("not json");

    assert_eq!(error.kind(), ErrorKind::Decode);
    assert!(error.message().starts_with("Error Encoding JSON: identity"));
}

#[test]
fn blocking_session_runs_the_same_request_path() {
    let http = Arc::new(ScriptedHttpClient::new());
    http.push_json(payload(&[("symbol", "str")], json!([{"symbol": "ROST"}])));
    let session = quantamatics_core::blocking::Session::from_session(keyed_session(&http))
        .expect("runtime starts");

    let table = session
        .api_wrapper(&ApiRequest::get("/api/data/instrument/load"))
        .expect("decodes");

    assert_eq!(table.row_count(), 1);
}
