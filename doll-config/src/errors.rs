use thiserror::Error;

use crate::validate::FieldType;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Response must have: \"{field}\" field")]
    MissingRequired { field: String },
    #[error("\"{field}\" is incorrect. Expects - {expected}, current - {actual} ({value})")]
    WrongType {
        field: String,
        expected: FieldType,
        actual: &'static str,
        value: String,
    },
    #[error("\"{field}\" is invalid: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// A rule that could not be built. The rest of the configuration is unaffected.
#[derive(Error, Debug)]
pub enum RuleCompileError {
    #[error("response #{index} must be an object")]
    NotAnObject { index: usize },
    #[error("response \"{label}\" skipped: {source}")]
    Invalid {
        index: usize,
        label: String,
        #[source]
        source: ValidationError,
    },
}

impl RuleCompileError {
    pub fn index(&self) -> usize {
        match self {
            RuleCompileError::NotAnObject { index } => *index,
            RuleCompileError::Invalid { index, .. } => *index,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Configuration file read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Parse: the configuration must be a JSON array or object")]
    NotObjectOrArray,
}
