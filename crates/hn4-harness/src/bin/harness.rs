//! CLI entrypoint for the HN4 conformance harness.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// Conformance tooling for HN4.
#[derive(Debug, Parser)]
#[command(name = "hn4-harness")]
#[command(about = "Conformance testing harness for HN4")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the concrete scenarios and boundary-behavior suite, printing a
    /// pass/fail report.
    Verify,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Verify => {
            let report = hn4_harness::verify();
            println!("{report}");
            if report.all_passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
