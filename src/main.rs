//! Entry point: parses CLI args, wires up logging and the SIGINT
//! handler, and runs the reactor until shutdown (§6, §7).

mod channel;
mod cli;
mod connection;
mod dispatch;
mod error;
mod framer;
mod ids;
mod message;
mod numeric;
mod reactor;
mod registry;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::error;

use cli::Cli;
use error::IrcError;
use reactor::Reactor;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run() {
        error!(error = %e, "server exited with error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run() -> Result<(), IrcError> {
    let cli = Cli::parse();
    let port = cli.parsed_port()?;
    cli.validate_password()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_handler.store(true, Ordering::Relaxed);
    })
    .expect("failed to install SIGINT handler");

    let mut reactor = Reactor::new(port, cli.password.clone(), shutdown)?;
    reactor.run()
}
