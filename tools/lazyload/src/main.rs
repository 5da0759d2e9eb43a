pub mod cli;
pub mod logger;

use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use lazyload_loader::LaunchOutcome;

use crate::cli::Cli;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
            _ => {
                let _ = err.print();
                return ExitCode::from(1);
            }
        },
    };

    if let Err(err) = logger::init(cli.log_level) {
        eprintln!("lazyload: cannot install logger: {err}");
        return ExitCode::from(1);
    }

    if !cli.image.is_file() {
        log::error!("{}: no such file", cli.image.display());
        return ExitCode::from(1);
    }

    match lazyload_loader::load_and_run(&cli.image, cli.loader_config()) {
        Ok(report) => {
            if let LaunchOutcome::Returned { status } = report.outcome {
                log::debug!("image returned {status}; {}", report.metrics);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
