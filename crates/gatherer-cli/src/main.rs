use gatherer_core::logging;

mod cli;

use crate::cli::Cli;

fn main() {
    // Log to the state directory, or to stderr when that is not writable.
    if logging::init_logging().is_err() {
        logging::init_logging_stderr();
    }

    if let Err(err) = Cli::run_from_args() {
        eprintln!("gatherer error: {:#}", err);
        std::process::exit(1);
    }
}
