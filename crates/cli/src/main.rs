use std::process::ExitCode;

fn main() -> ExitCode {
    parley_cli::run()
}
