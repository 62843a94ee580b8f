use std::error::Error;
use e_oscmidi::cli::run_cli;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    run_cli()
}
