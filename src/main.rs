use std::process::ExitCode;

pub fn main() -> ExitCode {
    arbor::run()
}
