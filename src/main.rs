use std::process::ExitCode;

use clap::Parser;

use rasterstack::cli::{self, CliArgs};
use rasterstack::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    logger::init(args.verbose);
    let settings = args.load_settings();

    // Session log (overwrites the previous session's)
    if settings.log_to_file {
        logger::open_session_file();
    }
    log::debug!("settings: {:?}", settings);

    cli::run(args, &settings)
}
