//! `RSArmageddon` - RSA attack orchestration over SageMath

use clap::Parser;
use tokio_util::sync::CancellationToken;

use rsarmageddon::cli::args::Cli;
use rsarmageddon::cli::commands;
use rsarmageddon::error::ExitCode;
use rsarmageddon::observability::init_logging;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() {
                ExitCode::USAGE_ERROR
            } else {
                ExitCode::SUCCESS
            });
        }
    };

    init_logging(cli.log_format, cli.verbose, cli.quiet, cli.color);

    let cancel = CancellationToken::new();

    // First signal cancels the run (killing the running attack), second exits.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }

            eprintln!("\nStopping attacks... (press Ctrl+C again to force)");
            signal_cancel.cancel();

            tokio::select! {
                _ = tokio::signal::ctrl_c() => std::process::exit(ExitCode::INTERRUPTED),
                _ = sigterm.recv() => std::process::exit(ExitCode::TERMINATED),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            eprintln!("\nStopping attacks... (press Ctrl+C again to force)");
            signal_cancel.cancel();
            let _ = tokio::signal::ctrl_c().await;
            std::process::exit(ExitCode::INTERRUPTED);
        }
    });

    let result = commands::dispatch(cli, cancel).await;

    match result {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
