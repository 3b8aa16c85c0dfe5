// ============================================================================
// Value Converters
// ============================================================================
//
// A converter maps an application value to its storage form (`to_db`) and
// back (`from_db`). Every converter passes NULL through unchanged.
//
// Round trip: `from_db(to_db(v)) == v` for every converter except
// `DateTimeConverter`, which stores millisecond precision only.
//
// ============================================================================

use crate::core::{Result, SqlError, Value};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value as JsonValue;
use std::fmt::Debug;
use std::sync::Arc;

/// Converts field values between application and storage representation.
pub trait ValueConverter: Send + Sync + Debug {
    fn to_db(&self, value: &Value) -> Result<Value>;

    fn from_db(&self, value: &Value) -> Result<Value>;

    /// Column type hint for schema generation. `Some("json")` marks a field
    /// that is rewritten to string storage on dialects without JSON columns.
    fn field_type_in_db(&self) -> Option<&str> {
        None
    }
}

fn mismatch(expected: &str, value: &Value) -> SqlError {
    SqlError::Conversion(format!("expected {}, got {} ({})", expected, value.type_name(), value))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IntegerConverter;

impl IntegerConverter {
    fn convert(value: &Value) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Integer(_) => Ok(value.clone()),
            Value::Float(_) => value.as_i64().map(Value::Integer).ok_or_else(|| mismatch("integer", value)),
            Value::Boolean(b) => Ok(Value::Integer(i64::from(*b))),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| mismatch("integer", value)),
            _ => Err(mismatch("integer", value)),
        }
    }
}

impl ValueConverter for IntegerConverter {
    fn to_db(&self, value: &Value) -> Result<Value> {
        Self::convert(value)
    }

    fn from_db(&self, value: &Value) -> Result<Value> {
        Self::convert(value)
    }

    fn field_type_in_db(&self) -> Option<&str> {
        Some("integer")
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NumberConverter;

impl NumberConverter {
    fn convert(value: &Value) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Integer(i) => Ok(Value::Float(*i as f64)),
            Value::Float(_) => Ok(value.clone()),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| mismatch("number", value)),
            _ => Err(mismatch("number", value)),
        }
    }
}

impl ValueConverter for NumberConverter {
    fn to_db(&self, value: &Value) -> Result<Value> {
        Self::convert(value)
    }

    fn from_db(&self, value: &Value) -> Result<Value> {
        Self::convert(value)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TextConverter;

impl TextConverter {
    fn convert(value: &Value) -> Result<Value> {
        match value {
            Value::Null | Value::Text(_) => Ok(value.clone()),
            Value::Integer(_) | Value::Float(_) | Value::Boolean(_) => Ok(Value::Text(value.to_string())),
            _ => Err(mismatch("text", value)),
        }
    }
}

impl ValueConverter for TextConverter {
    fn to_db(&self, value: &Value) -> Result<Value> {
        Self::convert(value)
    }

    fn from_db(&self, value: &Value) -> Result<Value> {
        Self::convert(value)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BooleanConverter;

impl ValueConverter for BooleanConverter {
    fn to_db(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Null | Value::Boolean(_) => Ok(value.clone()),
            _ => self.from_db(value),
        }
    }

    // Backends without a boolean type hand back 0/1.
    fn from_db(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Null | Value::Boolean(_) => Ok(value.clone()),
            Value::Integer(i) => Ok(Value::Boolean(*i != 0)),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Boolean(true)),
                "false" | "0" => Ok(Value::Boolean(false)),
                _ => Err(mismatch("boolean", value)),
            },
            _ => Err(mismatch("boolean", value)),
        }
    }
}

/// Stores timestamps as RFC 3339 text with millisecond precision (lossy).
#[derive(Debug, Default, Clone, Copy)]
pub struct DateTimeConverter;

impl DateTimeConverter {
    fn parse(text: &str) -> Option<DateTime<Utc>> {
        if let Ok(t) = DateTime::parse_from_rfc3339(text) {
            return Some(t.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    fn to_timestamp(value: &Value) -> Result<Option<DateTime<Utc>>> {
        match value {
            Value::Null => Ok(None),
            Value::Timestamp(t) => Ok(Some(*t)),
            Value::Text(s) => Self::parse(s).map(Some).ok_or_else(|| mismatch("timestamp", value)),
            Value::Integer(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .map(Some)
                .ok_or_else(|| mismatch("timestamp", value)),
            _ => Err(mismatch("timestamp", value)),
        }
    }
}

impl ValueConverter for DateTimeConverter {
    fn to_db(&self, value: &Value) -> Result<Value> {
        Ok(match Self::to_timestamp(value)? {
            Some(t) => Value::Text(t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => Value::Null,
        })
    }

    fn from_db(&self, value: &Value) -> Result<Value> {
        Ok(Self::to_timestamp(value)?.map(Value::Timestamp).unwrap_or(Value::Null))
    }
}

/// Native JSON column.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonConverter;

impl ValueConverter for JsonConverter {
    fn to_db(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::Null | Value::Json(_) => value.clone(),
            other => Value::Json(other.to_json()),
        })
    }

    fn from_db(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Text(s) => JsonStringConverter.from_db(&Value::Text(s.clone())),
            other => self.to_db(other),
        }
    }

    fn field_type_in_db(&self) -> Option<&str> {
        Some("json")
    }
}

/// JSON documents serialised into a text column.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonStringConverter;

impl ValueConverter for JsonStringConverter {
    fn to_db(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::Null => Value::Null,
            Value::Json(j) => Value::Text(j.to_string()),
            other => Value::Text(other.to_json().to_string()),
        })
    }

    fn from_db(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Text(s) if s.is_empty() => Ok(Value::Null),
            Value::Text(s) => serde_json::from_str::<JsonValue>(s)
                .map(Value::Json)
                .map_err(|e| SqlError::Conversion(format!("invalid JSON: {}", e))),
            Value::Json(_) => Ok(value.clone()),
            _ => Err(mismatch("json text", value)),
        }
    }

    fn field_type_in_db(&self) -> Option<&str> {
        Some("text")
    }
}

pub fn json_string() -> Arc<dyn ValueConverter> {
    Arc::new(JsonStringConverter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_round_trip() {
        let c = IntegerConverter;
        let v = Value::Integer(-17);
        assert_eq!(c.from_db(&c.to_db(&v).unwrap()).unwrap(), v);
        assert!(c.to_db(&Value::Float(1.5)).is_err());
    }

    #[test]
    fn test_boolean_reads_integers() {
        let c = BooleanConverter;
        assert_eq!(c.from_db(&Value::Integer(1)).unwrap(), Value::Boolean(true));
        assert_eq!(c.from_db(&Value::Integer(0)).unwrap(), Value::Boolean(false));
        assert!(c.from_db(&Value::Text("maybe".into())).is_err());
    }

    #[test]
    fn test_datetime_keeps_milliseconds() {
        let c = DateTimeConverter;
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap() + chrono::Duration::milliseconds(250);
        let stored = c.to_db(&Value::Timestamp(t)).unwrap();
        assert_eq!(stored, Value::Text("2024-03-01T12:30:00.250Z".into()));
        assert_eq!(c.from_db(&stored).unwrap(), Value::Timestamp(t));
    }

    #[test]
    fn test_datetime_drops_sub_millisecond_precision() {
        let c = DateTimeConverter;
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + chrono::Duration::nanoseconds(1_500_000);
        let back = c.from_db(&c.to_db(&Value::Timestamp(t)).unwrap()).unwrap();
        assert_ne!(back, Value::Timestamp(t));
    }

    #[test]
    fn test_json_string_round_trip() {
        let c = JsonStringConverter;
        let v = Value::Json(json!({"tags": ["a", "b"], "n": 1}));
        let stored = c.to_db(&v).unwrap();
        assert!(matches!(stored, Value::Text(_)));
        assert_eq!(c.from_db(&stored).unwrap(), v);
    }

    #[test]
    fn test_text_rejects_json() {
        assert!(TextConverter.to_db(&Value::Json(json!([1]))).is_err());
    }
}
