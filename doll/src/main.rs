use clap::Parser;
use std::process::ExitCode;
use tracing::error;

mod check;
mod config;
mod server;

use config::Opts;

pub fn unique_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[tokio::main]
async fn main() -> ExitCode {
    human_panic::setup_panic!();
    dotenv::dotenv().ok();

    let opt = Opts::parse();
    if let Err(e) = config::configure_logging(&opt.logging_opts) {
        eprintln!("Unable to configure logging: {}", e);
        return ExitCode::from(1);
    }

    let result = match opt.command {
        config::SubCommands::Server(server_opts) => server_opts.run_server().await,
        config::SubCommands::Check(options) => options.run_check().await,
    };

    let exit_code = match result {
        Err(e) => {
            error!("Exiting because of {}", e);
            1
        }
        Ok(_) => 0,
    };

    ExitCode::from(exit_code)
}
