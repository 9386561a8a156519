// EN: src/bin/cmdflow.rs

use anyhow::Result;
use clap::Parser;
use cmdflow::{
    ActionError, CancellationToken,
    cli::{Cli, exit_codes::ExitCodes, runner},
    core::wrapper::WrapperError,
};
use colored::*;

/// The main entry point of the `cmdflow` application.
/// It sets up logging and Ctrl+C handling, runs the wrapped program,
/// and performs centralized error handling.
#[tokio::main]
async fn main() {
    env_logger::init();

    // Ctrl+C cancels the invocation; the wrapped program is killed by the executor.
    let cancellation_token = CancellationToken::new();
    let ctrl_c_token = cancellation_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::debug!("Ctrl+C received, cancelling.");
            ctrl_c_token.cancel();
        }
    });

    // The entire application logic is wrapped in a Result to enable centralized error handling.
    if let Err(e) = run_cli(Cli::parse(), cancellation_token).await {
        // --- Centralized Error Handling ---
        let action_error = e.downcast_ref::<ActionError>();
        let code = action_error.map_or(ExitCodes::FAILURE, ExitCodes::for_error);

        // An interruption or the program's own failure exits silently, like a shell would.
        if matches!(
            action_error,
            Some(ActionError::Cancelled | ActionError::Wrapper(WrapperError::NonZeroExit { .. }))
        ) || code == ExitCodes::CANCELLED
        {
            std::process::exit(code);
        }

        eprintln!("\n{}: {}", "Error".red().bold(), e);
        std::process::exit(code);
    }
}

async fn run_cli(cli: Cli, cancellation_token: CancellationToken) -> Result<()> {
    runner::run(cli, cancellation_token).await?;
    Ok(())
}
