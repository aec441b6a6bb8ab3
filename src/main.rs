use clightd::cli::{self, Command};
use clightd::{daemon, error};
use env_logger::Env;
use log::{error as log_error, info};
use std::process::ExitCode as StdExitCode;

fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn main() -> StdExitCode {
    // clap handles usage errors itself and exits with code 2
    let command = cli::parse();

    let options = match command {
        Command::Completions { shell } => {
            cli::print_completions(shell);
            return error::ExitCode::Success.into();
        }
        Command::Run(options) => options,
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level(options.verbose)))
        .format_timestamp_secs()
        .init();
    info!("clightd v{}", env!("CARGO_PKG_VERSION"));

    match daemon::run(&options) {
        Ok(()) => error::ExitCode::Success.into(),
        Err(e) => {
            log_error!("{}", e);
            e.exit_code().into()
        }
    }
}
