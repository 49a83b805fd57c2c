//! Comprobador: run browser verification scripts
//!
//! ## Usage
//!
//! ```bash
//! comprobador init                         # Write a starter script
//! comprobador validate smoke.yaml          # Check a script without a browser
//! comprobador run smoke.yaml --json out.json
//! comprobador run smoke.yaml --inspect     # Keep the browser open afterwards
//! comprobador compare before.json after.json
//! ```

use clap::Parser;
use comprobar::RunStatus;
use comprobador::{Cli, CliConfig, CliError, CliResult, Commands, RunArgs, ScriptRunner, Verbosity};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_logging(config.verbosity);

    let mut runner = ScriptRunner::new(&config);
    match cli.command {
        Commands::Run(args) => run_script(&mut runner, &args),
        Commands::Validate(args) => runner.validate(&args).map(|_| ()),
        Commands::Report(args) => runner.report(&args).map(|_| ()),
        Commands::Compare(args) => runner.compare(&args).map(|_| ()),
        Commands::Init(args) => runner.init(&args),
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    let verbosity = Verbosity::from_flags(cli.quiet, cli.verbose);
    CliConfig::new()
        .with_verbosity(verbosity)
        .with_color(cli.color.clone().into())
}

fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_script(runner: &mut ScriptRunner, args: &RunArgs) -> CliResult<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::config(format!("failed to start async runtime: {e}")))?;

    runtime.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling run");
                on_interrupt.cancel();
            }
        });

        let report = runner.run(args, cancel).await?;
        if report.outcome == RunStatus::Cancelled {
            Err(CliError::verification(format!(
                "run cancelled, {} steps skipped",
                report.skipped.len()
            )))
        } else if report.is_success() {
            Ok(())
        } else {
            let summary = report.summary();
            Err(CliError::verification(format!(
                "{} of {} steps failed ({})",
                summary.failed, summary.total, report.outcome
            )))
        }
    })
}
