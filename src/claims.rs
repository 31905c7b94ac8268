//! Typed reads from a verified claim set.
//!
//! Absent keys and JSON `null` both read as `None`; a present value of the
//! wrong type is an [`Error::InvalidClaim`].

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    token::JsonMap,
};

fn present<'a>(claims: &'a JsonMap, key: &str) -> Option<&'a Value> {
    claims.get(key).filter(|v| !v.is_null())
}

/// Optional string claim.
pub fn get_str<'a>(claims: &'a JsonMap, key: &str) -> Result<Option<&'a str>> {
    match present(claims, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(Error::invalid_claim(key, "expected a string")),
    }
}

/// Required string claim.
pub fn require_str<'a>(claims: &'a JsonMap, key: &str) -> Result<&'a str> {
    get_str(claims, key)?.ok_or_else(|| Error::MissingClaim(key.to_owned()))
}

/// Optional string claim, owned.
pub fn get_string(claims: &JsonMap, key: &str) -> Result<Option<String>> {
    Ok(get_str(claims, key)?.map(ToOwned::to_owned))
}

/// Optional integer claim. Numeric strings are accepted, since the store
/// sends some identifiers both ways.
pub fn get_i64(claims: &JsonMap, key: &str) -> Result<Option<i64>> {
    match present(claims, key) {
        None => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| Error::invalid_claim(key, "expected an integer")),
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_claim(key, "expected an integer")),
        Some(_) => Err(Error::invalid_claim(key, "expected an integer")),
    }
}

/// Optional boolean claim. `0`/`1` integers are read as booleans.
pub fn get_bool(claims: &JsonMap, key: &str) -> Result<Option<bool>> {
    match present(claims, key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(Error::invalid_claim(key, "expected a boolean")),
        },
        Some(_) => Err(Error::invalid_claim(key, "expected a boolean")),
    }
}

/// Optional nested object, such as the `data` block of a notification.
pub fn get_object<'a>(claims: &'a JsonMap, key: &str) -> Result<Option<&'a JsonMap>> {
    match present(claims, key) {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(Error::invalid_claim(key, "expected an object")),
    }
}

/// Optional timestamp claim in epoch milliseconds.
pub fn get_millis(claims: &JsonMap, key: &str) -> Result<Option<DateTime<Utc>>> {
    get_i64(claims, key)?
        .map(|ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| Error::invalid_claim(key, "timestamp out of range"))
        })
        .transpose()
}

/// Required timestamp claim in epoch milliseconds.
pub fn require_millis(claims: &JsonMap, key: &str) -> Result<DateTime<Utc>> {
    get_millis(claims, key)?.ok_or_else(|| Error::MissingClaim(key.to_owned()))
}

/// Optional timestamp claim in epoch seconds (`iat`, `exp`).
pub fn get_seconds(claims: &JsonMap, key: &str) -> Result<Option<DateTime<Utc>>> {
    get_i64(claims, key)?
        .map(|secs| {
            DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| Error::invalid_claim(key, "timestamp out of range"))
        })
        .transpose()
}
