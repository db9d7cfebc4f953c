//! Record wire format
//!
//! Strings are stored verbatim; every other JSON value is stored as compact
//! JSON text. On read, only text that looks like an object or array is
//! parsed back, so numbers, booleans and `null` come back as strings, and a
//! string that happens to hold bracketed JSON comes back as that structure.

use serde_json::Value;

pub fn encode(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Never fails: anything that does not parse as a bracketed JSON document is
/// returned as the original string.
pub fn decode(raw: &str) -> Value {
    let trimmed = raw.trim();
    let bracketed = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if bracketed {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return value;
        }
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structures_round_trip() {
        for value in [
            json!({"name": "ada", "tags": ["x", "y"], "nested": {"n": 1}}),
            json!([1, "two", {"three": 3}]),
            json!({}),
            json!([]),
        ] {
            assert_eq!(decode(&encode(&value)), value);
        }
    }

    #[test]
    fn test_plain_strings_pass_through() {
        assert_eq!(encode(&json!("hello")), "hello");
        assert_eq!(decode("hello"), json!("hello"));
        assert_eq!(decode(""), json!(""));
        assert_eq!(decode("  spaced  "), json!("  spaced  "));
    }

    #[test]
    fn test_malformed_brackets_stay_strings() {
        assert_eq!(decode("{not json}"), json!("{not json}"));
        assert_eq!(decode("[1, 2"), json!("[1, 2"));
        assert_eq!(decode("{\"a\": 1"), json!("{\"a\": 1"));
    }

    #[test]
    fn test_surrounding_whitespace_is_tolerated() {
        assert_eq!(decode("  {\"a\":1}\n"), json!({"a": 1}));
    }

    #[test]
    fn test_scalars_decode_as_strings() {
        assert_eq!(encode(&json!(42)), "42");
        assert_eq!(decode("42"), json!("42"));
        assert_eq!(encode(&json!(true)), "true");
        assert_eq!(decode("null"), json!("null"));
    }
}
