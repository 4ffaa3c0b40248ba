//! Type gate for individual configuration fields.
//!
//! The validator only checks the JSON type of a value. It never interprets
//! it; callers layer semantic checks (known method, IPv4 literal, ...) on top.

use serde_json::Value;
use std::fmt;
use tracing::warn;

use crate::errors::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
        };
        f.write_str(name)
    }
}

/// Name of the JSON type of `value`, as shown in diagnostics.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Result of checking one field before the `required` flag is applied.
#[derive(Debug, PartialEq)]
pub enum FieldOutcome<'a> {
    Valid(&'a Value),
    Absent,
    /// Present with the wrong type.
    Mismatch(&'a Value),
}

pub fn check_field(value: Option<&Value>, expected: FieldType) -> FieldOutcome<'_> {
    let value = match value {
        None => return FieldOutcome::Absent,
        Some(value) => value,
    };

    let matches = match expected {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Object => value.is_object(),
        FieldType::Array => value.is_array(),
    };

    if matches {
        FieldOutcome::Valid(value)
    } else {
        FieldOutcome::Mismatch(value)
    }
}

/// Gate a field on its type.
///
/// Optional fields with the wrong type are dropped with a warning and
/// yield `Ok(None)`. Required fields that are missing or mistyped are an
/// error, which rejects only the rule containing them.
pub fn validate_field<'a>(
    value: Option<&'a Value>,
    name: &str,
    expected: FieldType,
    required: bool,
) -> Result<Option<&'a Value>, ValidationError> {
    match check_field(value, expected) {
        FieldOutcome::Valid(value) => Ok(Some(value)),
        FieldOutcome::Absent if required => Err(ValidationError::MissingRequired {
            field: name.to_owned(),
        }),
        FieldOutcome::Absent => Ok(None),
        FieldOutcome::Mismatch(value) => {
            let error = ValidationError::WrongType {
                field: name.to_owned(),
                expected,
                actual: type_name(value),
                value: value.to_string(),
            };
            if required {
                Err(error)
            } else {
                warn!("Field {} dropped: {}", name, error);
                Ok(None)
            }
        }
    }
}

pub fn optional_str<'a>(value: Option<&'a Value>, name: &str) -> Option<&'a str> {
    match validate_field(value, name, FieldType::String, false) {
        Ok(value) => value.and_then(Value::as_str),
        Err(_) => None,
    }
}

pub fn required_str<'a>(value: Option<&'a Value>, name: &str) -> Result<&'a str, ValidationError> {
    validate_field(value, name, FieldType::String, true)?
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::MissingRequired {
            field: name.to_owned(),
        })
}

/// Renders a scalar the way it would be written in a query string. Whole
/// floats lose their fraction so `1.0` compares equal to `1`.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => {
            if n.is_f64() {
                let f = n.as_f64()?;
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    return Some(format!("{}", f as i64));
                }
            }
            Some(n.to_string())
        }
        _ => None,
    }
}

#[test]
fn test_validate_matching_type() {
    let value = serde_json::json!("hello");
    let result = validate_field(Some(&value), "name", FieldType::String, false);
    assert_eq!(Some(&value), result.unwrap());
}

#[test]
fn test_validate_optional_wrong_type_is_dropped() {
    let value = serde_json::json!(12);
    let result = validate_field(Some(&value), "name", FieldType::String, false);
    assert_eq!(None, result.unwrap());
}

#[test]
fn test_validate_required_wrong_type() {
    let value = serde_json::json!(12);
    let err = validate_field(Some(&value), "path", FieldType::String, true).unwrap_err();
    match err {
        ValidationError::WrongType {
            field,
            expected,
            actual,
            value,
        } => {
            assert_eq!("path", field);
            assert_eq!(FieldType::String, expected);
            assert_eq!("number", actual);
            assert_eq!("12", value);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_validate_missing() {
    assert_eq!(
        None,
        validate_field(None, "delay", FieldType::Number, false).unwrap()
    );
    assert!(matches!(
        validate_field(None, "path", FieldType::String, true),
        Err(ValidationError::MissingRequired { .. })
    ));
}

#[test]
fn test_null_is_not_an_object() {
    let value = Value::Null;
    assert_eq!(
        FieldOutcome::Mismatch(&value),
        check_field(Some(&value), FieldType::Object)
    );
}

#[test]
fn test_scalar_to_string() {
    assert_eq!(Some("7".to_string()), scalar_to_string(&serde_json::json!(7)));
    assert_eq!(Some("7".to_string()), scalar_to_string(&serde_json::json!(7.0)));
    assert_eq!(Some("7.5".to_string()), scalar_to_string(&serde_json::json!(7.5)));
    assert_eq!(Some("true".to_string()), scalar_to_string(&serde_json::json!(true)));
    assert_eq!(None, scalar_to_string(&serde_json::json!([1])));
}
