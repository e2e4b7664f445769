use std::process::ExitCode;

use clap::Parser;
use pixeltap::cli::{self, CliArgs};
use pixeltap::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    match &args.log {
        Some(path) => logger::init_at(path),
        None => logger::init(),
    }
    logger::set_echo(args.verbose);
    pixeltap::log_info!("PixelTap v{} starting", env!("CARGO_PKG_VERSION"));

    let code = cli::run(args);
    if let Some(path) = logger::log_path() {
        pixeltap::log_info!("Session log: {}", path.display());
    }
    code
}
