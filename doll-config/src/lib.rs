use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

mod compile;
mod errors;
mod model;
mod store;
mod target;
mod validate;

pub use compile::{Compiled, RuleCompiler};
pub use errors::{ConfigLoadError, RuleCompileError, ValidationError};

/// Location of the configuration document and how to compile it.
#[derive(Debug, Clone)]
pub struct ConfigContainer {
    config_file: PathBuf,
    compiler: RuleCompiler,
}

impl ConfigContainer {
    /// Resolves the file once, so a missing path fails at startup.
    pub fn open(config_file: &Path, port_override: Option<u16>) -> Result<Self, ConfigLoadError> {
        Ok(Self {
            config_file: config_file.canonicalize()?,
            compiler: RuleCompiler::new(port_override),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config_file
    }

    pub async fn load(&self) -> Result<Compiled, ConfigLoadError> {
        debug!("Read configuration from: {}", self.config_file.display());
        let contents = tokio::fs::read_to_string(&self.config_file).await?;
        self.parse(&contents)
    }

    pub fn parse(&self, contents: &str) -> Result<Compiled, ConfigLoadError> {
        let document: Value = serde_json::from_str(contents)?;
        self.compiler.compile(&document)
    }
}

pub mod prelude {
    pub use crate::model::*;
    pub use crate::store::ConfigStore;
    pub use crate::target::RequestTarget;
    pub use crate::validate::{check_field, type_name, validate_field, FieldOutcome, FieldType};
    pub use crate::{Compiled, ConfigContainer, ConfigLoadError, RuleCompileError, RuleCompiler};
}

#[test]
fn test_open_missing_file() {
    let err = ConfigContainer::open(Path::new("/definitely/not/here.json"), None).unwrap_err();
    assert!(matches!(err, ConfigLoadError::Io(_)));
}

#[test]
fn test_parse_rejects_bad_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "[]").unwrap();
    let container = ConfigContainer::open(&path, None).unwrap();

    assert!(matches!(
        container.parse("{not json"),
        Err(ConfigLoadError::Parse(_))
    ));
    assert!(matches!(
        container.parse("true"),
        Err(ConfigLoadError::NotObjectOrArray)
    ));
    assert!(container.parse("[]").unwrap().configuration.rules.is_empty());
}
