//! Unverified JWT claim inspection.
//!
//! The client never validates signatures; it only reads the `exp` claim to
//! avoid sending a token the server is about to reject.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::Value as JsonValue;

use crate::error::QmcError;

/// Seconds of remaining lifetime a token must have to be used.
pub const EXPIRY_MARGIN_SECS: i64 = 100;

/// Reads the `exp` claim (unix seconds) from a compact JWT.
pub fn expiry(token: &str) -> Result<i64, QmcError> {
    let payload = token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| QmcError::auth("Invalid access token: missing payload segment"))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|error| QmcError::auth(format!("Invalid access token: {error}")))?;
    let claims: JsonValue = serde_json::from_slice(&bytes)
        .map_err(|error| QmcError::auth(format!("Invalid access token claims: {error}")))?;

    let exp = claims
        .get("exp")
        .ok_or_else(|| QmcError::auth("Invalid access token: no exp claim"))?;
    exp.as_i64()
        .or_else(|| exp.as_f64().map(|value| value as i64))
        .ok_or_else(|| QmcError::auth("Invalid access token: exp is not numeric"))
}

/// True while `now + margin < exp`.
pub fn is_fresh(exp: i64, now: i64) -> bool {
    exp > now + EXPIRY_MARGIN_SECS
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
pub(crate) fn encode_unsigned(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"analyst","exp":{exp}}}"#));
    format!("{header}.{claims}.signature")
}
