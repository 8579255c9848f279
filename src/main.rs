use clap::Parser;

use ndp6_relay::cli::Args;
use ndp6_relay::logging;

fn main() {
    let args = Args::parse();
    logging::init(args.log_level);

    if let Err(e) = ndp6_relay::run(args) {
        log::error!("{e}");
        std::process::exit(e.exit_code().unwrap_or(1));
    }
    std::process::exit(0);
}
