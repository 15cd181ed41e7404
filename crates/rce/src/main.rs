mod cmd;
mod config;
mod error;
mod server;

use std::fmt;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "rce", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the execution HTTP API
    Serve(cmd::ServeArgs),
    /// Execute one submission and print the result as JSON
    Run(cmd::RunArgs),
    /// List enabled languages with their images and commands
    Languages(cmd::LanguagesArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so `run` output on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve(args) => cmd::run_serve(args).await.map(|()| ExitCode::SUCCESS),
        Command::Run(args) => cmd::run_once(args).await,
        Command::Languages(args) => cmd::run_languages(args).await.map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
