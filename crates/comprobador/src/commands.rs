//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Comprobador: run Comprobar browser verification scripts
#[derive(Parser, Debug)]
#[command(name = "comprobador")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a verification script against a live page
    Run(RunArgs),

    /// Parse and validate a script without launching a browser
    Validate(ValidateArgs),

    /// Re-render a saved JSON report
    Report(ReportArgs),

    /// Compare the step statuses of two saved reports
    Compare(CompareArgs),

    /// Write a starter script
    Init(InitArgs),
}

/// Arguments for the run command
#[derive(Args, Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunArgs {
    /// Script file (YAML or JSON)
    pub script: PathBuf,

    /// Base URL relative navigations resolve against
    #[arg(long, env = "COMPROBAR_BASE_URL")]
    pub base_url: Option<String>,

    /// Tear down and exit with a status code when done (default)
    #[arg(long, conflicts_with = "inspect")]
    pub ci: bool,

    /// Keep the browser open after the report until interrupted
    #[arg(long)]
    pub inspect: bool,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Run headless (true/false)
    #[arg(long, env = "COMPROBAR_HEADLESS", value_name = "BOOL", conflicts_with = "headed")]
    pub headless: Option<bool>,

    /// Chromium executable
    #[arg(long, env = "COMPROBAR_CHROMIUM_PATH")]
    pub chromium: Option<PathBuf>,

    /// Disable the Chromium sandbox (containers)
    #[arg(long)]
    pub no_sandbox: bool,

    /// Output directory for screenshots and reports
    #[arg(short, long, env = "COMPROBAR_OUTPUT_DIR", default_value = "target/comprobar")]
    pub output: PathBuf,

    /// Write the JSON report to this path
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Write the HTML report to this path
    #[arg(long)]
    pub html: Option<PathBuf>,

    /// Write a JUnit XML report to this path
    #[arg(long)]
    pub junit: Option<PathBuf>,

    /// Screenshot file prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Default per-step timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Capture video frames while the session runs
    #[arg(long)]
    pub record_video: bool,
}

/// Arguments for the validate command
#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Script file (YAML or JSON)
    pub script: PathBuf,
}

/// Arguments for the report command
#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    /// Saved JSON report
    pub input: PathBuf,

    /// Also write an HTML report
    #[arg(long)]
    pub html: Option<PathBuf>,

    /// Also write a JUnit XML report
    #[arg(long)]
    pub junit: Option<PathBuf>,
}

/// Arguments for the compare command
#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    /// Baseline report
    pub left: PathBuf,

    /// Report to compare against the baseline
    pub right: PathBuf,
}

/// Arguments for the init command
#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    /// Where to write the script
    #[arg(default_value = "comprobar.yaml")]
    pub path: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

/// Color argument for CLI
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    mod cli_tests {
        use super::*;

        #[test]
        fn test_verify_cli() {
            use clap::CommandFactory;
            Cli::command().debug_assert();
        }

        #[test]
        fn test_parse_run_with_outputs() {
            let cli = Cli::try_parse_from([
                "comprobador",
                "-vv",
                "run",
                "smoke.yaml",
                "--base-url",
                "http://localhost:3000",
                "--json",
                "out/report.json",
                "--timeout",
                "5000",
            ])
            .unwrap();
            assert_eq!(cli.verbose, 2);
            let Commands::Run(args) = cli.command else {
                panic!("expected run");
            };
            assert_eq!(args.script, PathBuf::from("smoke.yaml"));
            assert_eq!(args.base_url.as_deref(), Some("http://localhost:3000"));
            assert_eq!(args.timeout, Some(5000));
            assert!(!args.inspect);
        }

        #[test]
        fn test_ci_and_inspect_conflict() {
            let result = Cli::try_parse_from(["comprobador", "run", "s.yaml", "--ci", "--inspect"]);
            assert!(result.is_err());
        }

        #[test]
        fn test_parse_compare() {
            let cli = Cli::try_parse_from(["comprobador", "compare", "a.json", "b.json"]).unwrap();
            assert!(matches!(cli.command, Commands::Compare(_)));
        }

        #[test]
        fn test_init_default_path() {
            let cli = Cli::try_parse_from(["comprobador", "init"]).unwrap();
            let Commands::Init(args) = cli.command else {
                panic!("expected init");
            };
            assert_eq!(args.path, PathBuf::from("comprobar.yaml"));
        }

        #[test]
        fn test_color_arg_conversion() {
            use crate::config::ColorChoice;
            assert_eq!(ColorChoice::from(ColorArg::Never), ColorChoice::Never);
            assert_eq!(ColorChoice::from(ColorArg::Always), ColorChoice::Always);
        }
    }
}
