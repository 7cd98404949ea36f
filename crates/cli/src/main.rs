use std::process::ExitCode;

fn main() -> ExitCode {
    skillrelay_cli::run()
}
