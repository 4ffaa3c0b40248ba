use doll_config::prelude::Configuration;
use doll_plugin::{HttpPlugin, HyperService};
use doll_plugin_http::HttpStaticPlugin;

use std::sync::Arc;

mod cli;
mod logging;

pub use cli::{Opts, SubCommands};
pub use logging::*;

pub fn build_backends(config: &Arc<Configuration>) -> Vec<Arc<Box<dyn HttpPlugin>>> {
    if config.rules.is_empty() {
        return Vec::new();
    }

    let plugin: Box<dyn HttpPlugin> = Box::new(HttpStaticPlugin::new(config.clone()));
    vec![Arc::new(plugin)]
}

/// The request handler for one configuration snapshot.
pub fn build_service(config: &Arc<Configuration>) -> HyperService {
    HyperService::new(config.security.clone(), build_backends(config))
}
