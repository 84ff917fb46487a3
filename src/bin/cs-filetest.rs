//! The `cs-filetest` command line tool.
//!
//! Runs decoder fixtures. See `cs-filetest --help` for usage.
//!
//! Exit status is 0 when every selected case passed, 1 when any case failed, and 2 when
//! the run could not complete (a fixture failed to parse, a file was unreadable, or no
//! decoder was available).

use clap::Parser;
use cs_filetests::commands::RunCommand;
use std::process::ExitCode;

fn main() -> ExitCode {
    match RunCommand::parse().execute() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e:?}");
            ExitCode::from(2)
        }
    }
}
