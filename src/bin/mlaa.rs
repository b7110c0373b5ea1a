use std::process::ExitCode;

use mlaa::cli::run_cli;

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run_cli(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mlaa: {err:#}");
            ExitCode::FAILURE
        }
    }
}
