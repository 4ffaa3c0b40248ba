use clap::{ColorChoice, Parser, Subcommand};

use crate::config::logging::*;

#[derive(Parser, Debug)]
#[clap(author, version, color = ColorChoice::Always)]
pub struct Opts {
    #[clap(flatten)]
    pub logging_opts: LoggingOpts,

    #[clap(subcommand)]
    pub command: SubCommands,
}

#[derive(Subcommand, Debug)]
pub enum SubCommands {
    /// Run the mock server answering requests from the configured rules
    Server(crate::server::ServerCommandConfig),
    /// Compile a configuration file and report its rules
    Check(crate::check::CheckCommandConfig),
}
