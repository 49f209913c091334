//! Tolerant readers for loosely typed service fields
//!
//! The services are inconsistent about nulls, numbers sent as strings and
//! date offsets. Both clients read such fields through these helpers: the
//! WSG normalizer on raw [`Value`]s, the RC types through the
//! `deserialize_with` adapters at the bottom of this module. A null or
//! malformed field reads as its default instead of failing the row.

use chrono::{DateTime, NaiveDateTime, Utc};
use clash_core::ValidationStatus;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

pub fn as_text(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

/// Integer from a number or a numeric string; fractions truncate
pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

pub fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// RFC 3339 timestamp; a timestamp without an offset is taken as UTC
pub fn as_date(value: &Value) -> Option<DateTime<Utc>> {
    let s = value.as_str()?.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Status from its integer code, a numeric string or its symbolic name
pub fn as_status(value: &Value) -> Option<ValidationStatus> {
    if let Some(code) = as_int(value) {
        return Some(ValidationStatus::from_wire(code));
    }
    value.as_str().and_then(|s| ValidationStatus::from_name(s.trim()))
}

/// String entries of an array; anything else in it is skipped
pub fn as_strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(as_text).collect())
        .unwrap_or_default()
}

pub fn as_object(value: &Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Non-negative count that fits a `u32`; larger counts saturate
pub fn count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn raw<'de, D: Deserializer<'de>>(d: D) -> Result<Value, D::Error> {
    Option::<Value>::deserialize(d).map(Option::unwrap_or_default)
}

/// A null reads as the type's default
pub fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(d).map(Option::unwrap_or_default)
}

pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(as_text(&raw(d)?).unwrap_or_default())
}

pub fn opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(as_text(&raw(d)?))
}

pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Ok(as_int(&raw(d)?).unwrap_or(0))
}

pub fn opt_int<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(as_int(&raw(d)?))
}

pub fn float<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(as_float(&raw(d)?).unwrap_or(0.0))
}

pub fn opt_float<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(as_float(&raw(d)?))
}

pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(as_flag(&raw(d)?).unwrap_or(false))
}

pub fn date<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(as_date(&raw(d)?))
}

pub fn status<'de, D: Deserializer<'de>>(d: D) -> Result<Option<ValidationStatus>, D::Error> {
    Ok(as_status(&raw(d)?))
}

pub fn strings<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(as_strings(&raw(d)?))
}

pub fn object<'de, D: Deserializer<'de>>(d: D) -> Result<Map<String, Value>, D::Error> {
    Ok(as_object(&raw(d)?))
}

/// A nested object that is null or not an object at all reads as absent
pub fn opt_object<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    match raw(d)? {
        value @ Value::Object(_) => Ok(serde_json::from_value(value).ok()),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_numbers_read_from_strings() {
        assert_eq!(as_int(&json!("12")), Some(12));
        assert_eq!(as_int(&json!(" 7 ")), Some(7));
        assert_eq!(as_int(&json!("3.9")), Some(3));
        assert_eq!(as_int(&json!(2.5)), Some(2));
        assert_eq!(as_int(&json!("twelve")), None);
        assert_eq!(as_int(&Value::Null), None);
        assert_eq!(as_float(&json!("0.25")), Some(0.25));
    }

    #[test]
    fn test_dates_with_and_without_offset() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
        assert_eq!(as_date(&json!("2024-03-05T10:00:00Z")), Some(expected));
        assert_eq!(as_date(&json!("2024-03-05T12:00:00+02:00")), Some(expected));
        assert_eq!(as_date(&json!("2024-03-05T10:00:00")), Some(expected));
        assert_eq!(as_date(&json!("2024-03-05T10:00:00.000")), Some(expected));
        assert_eq!(as_date(&json!("last tuesday")), None);
        assert_eq!(as_date(&json!(1709632800)), None);
    }

    #[test]
    fn test_status_from_code_string_or_name() {
        assert_eq!(as_status(&json!(1)), Some(ValidationStatus::Completed));
        assert_eq!(as_status(&json!("7")), Some(ValidationStatus::Cancelled));
        assert_eq!(as_status(&json!("Failed")), Some(ValidationStatus::Failed));
        assert_eq!(
            as_status(&json!(9_999_999_999i64)),
            Some(ValidationStatus::Unrecognized(i32::MAX))
        );
        assert_eq!(as_status(&json!("Exploded")), None);
        assert_eq!(as_status(&Value::Null), None);
    }

    #[test]
    fn test_count_saturates() {
        assert_eq!(count(-4), 0);
        assert_eq!(count(17), 17);
        assert_eq!(count(i64::MAX), u32::MAX);
    }

    #[derive(Debug, Default, Deserialize)]
    struct Sparse {
        #[serde(default, deserialize_with = "text")]
        name: String,
        #[serde(default, deserialize_with = "int")]
        total: i64,
        #[serde(default, deserialize_with = "date")]
        at: Option<DateTime<Utc>>,
        #[serde(default, deserialize_with = "strings")]
        ids: Vec<String>,
        #[serde(default, deserialize_with = "null_as_default")]
        nested: Vec<u8>,
    }

    #[test]
    fn test_adapters_accept_null_and_absent() {
        let nulls: Sparse = serde_json::from_value(json!({
            "name": null, "total": null, "at": null, "ids": null, "nested": null
        }))
        .unwrap();
        assert_eq!(nulls.name, "");
        assert_eq!(nulls.total, 0);
        assert!(nulls.ids.is_empty());
        assert!(nulls.nested.is_empty());

        let absent: Sparse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(absent.at, None);

        let loose: Sparse = serde_json::from_value(json!({
            "name": 5, "total": "41", "at": "2024-03-05T10:00:00", "ids": ["a", 3, "b"]
        }))
        .unwrap();
        assert_eq!(loose.name, "");
        assert_eq!(loose.total, 41);
        assert!(loose.at.is_some());
        assert_eq!(loose.ids, vec!["a", "b"]);
    }
}
