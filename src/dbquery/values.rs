//! Database value → JSON conversion.
//!
//! Drivers hand values over as text or raw bytes; the column's type name
//! decides how each one is rendered.

use serde_json::{Number, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    Boolean,
    Json,
    Timestamp,
    Binary,
    Text,
}

impl ValueKind {
    pub fn from_type_name(type_name: &str) -> Self {
        let upper = type_name.trim().to_ascii_uppercase();
        let base = upper
            .split('(')
            .next()
            .unwrap_or_default()
            .trim_end_matches(" UNSIGNED")
            .trim();

        match base {
            "INT" | "INT2" | "INT4" | "INT8" | "INTEGER" | "TINYINT" | "SMALLINT" | "MEDIUMINT"
            | "BIGINT" | "SERIAL" | "BIGSERIAL" | "SMALLSERIAL" | "OID" => Self::Integer,
            "FLOAT" | "FLOAT4" | "FLOAT8" | "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "NUMERIC"
            | "DECIMAL" => Self::Float,
            "BOOL" | "BOOLEAN" => Self::Boolean,
            "JSON" | "JSONB" => Self::Json,
            "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" => Self::Timestamp,
            "BYTEA" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
                Self::Binary
            }
            _ => Self::Text,
        }
    }
}

/// Converts a textual value according to its column type.
pub fn text_to_json(type_name: &str, text: &str) -> Value {
    match ValueKind::from_type_name(type_name) {
        ValueKind::Integer => integer(text),
        ValueKind::Float => float(text),
        ValueKind::Boolean => match text.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "1" => Value::Bool(true),
            "f" | "false" | "0" => Value::Bool(false),
            _ => Value::String(text.to_string()),
        },
        ValueKind::Json => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        }
        ValueKind::Timestamp => Value::String(text.replacen(' ', "T", 1)),
        ValueKind::Binary => {
            match text.strip_prefix("\\x").map(hex::decode) {
                Some(Ok(bytes)) => binary_to_json(&bytes),
                _ => Value::String(text.to_string()),
            }
        }
        ValueKind::Text => Value::String(text.to_string()),
    }
}

/// Converts a raw byte value: binary columns go through [`binary_to_json`],
/// everything else is treated as UTF-8 text when possible.
pub fn bytes_to_json(type_name: &str, bytes: &[u8]) -> Value {
    if ValueKind::from_type_name(type_name) == ValueKind::Binary {
        return binary_to_json(bytes);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text_to_json(type_name, text),
        Err(_) => Value::String(hex::encode(bytes)),
    }
}

/// Clean UTF-8 becomes a string; anything with NUL or other control bytes
/// (apart from tab, newline and carriage return) becomes lowercase hex.
pub fn binary_to_json(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) if !text.chars().any(is_disallowed_control) => Value::String(text.to_string()),
        _ => Value::String(hex::encode(bytes)),
    }
}

pub fn integer(text: &str) -> Value {
    let trimmed = text.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Value::from(value);
    }
    if let Ok(value) = trimmed.parse::<u64>() {
        return Value::from(value);
    }
    Value::String(text.to_string())
}

pub fn float(text: &str) -> Value {
    text.trim()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(text.to_string()))
}

fn is_disallowed_control(c: char) -> bool {
    (c as u32) < 32 && !matches!(c, '\t' | '\n' | '\r')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_names_are_classified() {
        assert_eq!(ValueKind::from_type_name("INT4"), ValueKind::Integer);
        assert_eq!(ValueKind::from_type_name("bigint unsigned"), ValueKind::Integer);
        assert_eq!(ValueKind::from_type_name("INTERVAL"), ValueKind::Text);
        assert_eq!(ValueKind::from_type_name("NUMERIC(10,2)"), ValueKind::Float);
        assert_eq!(ValueKind::from_type_name("TIMESTAMPTZ"), ValueKind::Timestamp);
        assert_eq!(ValueKind::from_type_name("BYTEA"), ValueKind::Binary);
    }

    #[test]
    fn scalars_convert_by_type() {
        assert_eq!(text_to_json("INT8", "42"), json!(42));
        assert_eq!(text_to_json("NUMERIC", "12.50"), json!(12.5));
        assert_eq!(text_to_json("BOOL", "t"), json!(true));
        assert_eq!(text_to_json("BOOLEAN", "0"), json!(false));
        assert_eq!(text_to_json("JSONB", r#"{"a":[1,2]}"#), json!({"a": [1, 2]}));
        assert_eq!(
            text_to_json("TIMESTAMP", "2024-03-01 10:15:00"),
            json!("2024-03-01T10:15:00")
        );
        assert_eq!(text_to_json("TEXT", "hello"), json!("hello"));
        assert_eq!(text_to_json("FLOAT8", "NaN"), json!("NaN"));
    }

    #[test]
    fn binary_values_prefer_clean_text() {
        assert_eq!(binary_to_json(b"line\tone\n"), json!("line\tone\n"));
        assert_eq!(binary_to_json(&[0x00, 0xff, 0x10]), json!("00ff10"));
        assert_eq!(binary_to_json(b"a\x01b"), json!("610162"));
        assert_eq!(text_to_json("BYTEA", "\\x6869"), json!("hi"));
        assert_eq!(bytes_to_json("VARCHAR", b"plain"), json!("plain"));
    }

    #[test]
    fn undecodable_bytes_fall_back() {
        assert_eq!(text_to_json("BYTEA", "\\xABcd"), json!("abcd"));
        assert_eq!(text_to_json("BYTEA", "\\xzz"), json!("\\xzz"));
        assert_eq!(text_to_json("BYTEA", "\\x123"), json!("\\x123"));
        assert_eq!(bytes_to_json("VARCHAR", &[0xff, 0xfe]), json!("fffe"));
    }
}
