use clap::Parser;
use tracing_subscriber::EnvFilter;

use autoscript::cli::Cli;
use autoscript::error::AppError;

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), AppError> {
    // stdout carries the transcript; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    autoscript::commands::run(Cli::parse()).await
}
