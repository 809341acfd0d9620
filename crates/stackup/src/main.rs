//! Binary entry point; delegates to [`stackup::run`].

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Unlocked handles: relay threads log to stderr while `up` is blocked.
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    stackup::run(std::env::args_os(), &mut stdout, &mut stderr)
}
