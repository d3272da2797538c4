use clap::Parser;
use std::process::ExitCode;

mod cli;
mod handlers;
mod style;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    reactor_engine::logging::init(cli.verbose);

    match handlers::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", style::CROSS);
            ExitCode::FAILURE
        }
    }
}
