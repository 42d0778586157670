//! install-p4prom CLI

use p4prom_installer::{cli, host::System, install, settings::Settings};
use std::process::ExitCode;
use tracing::error;

/// Entrypoint for the install-p4prom CLI
#[tokio::main]
async fn main() -> ExitCode {
    // Parse arguments
    let args = match cli::parse(std::env::args_os()) {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    if args.help {
        let _ = cli::command().print_help();
        return ExitCode::FAILURE;
    }

    // Create logger
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Install
    let settings = match Settings::load_or_default(args.settings.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error=?e, "failed to load settings");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = install::run(&System, &settings, &args).await {
        error!(error=?e, "failed to install monitoring");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
