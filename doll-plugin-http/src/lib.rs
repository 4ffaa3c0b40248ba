use std::path::PathBuf;
use thiserror::Error;

mod http_static;
mod resolver;

pub use http_static::{find_rule, HttpStaticPlugin};
pub use resolver::{resolve, ResolvedResponse};

/// Header naming the rule that produced a response.
pub const RULE_HEADER: &str = "x-doll-rule";

#[derive(Error, Debug)]
pub enum HttpPluginError {
    #[error("Read file error \"{}\": {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
