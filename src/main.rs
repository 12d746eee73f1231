// Entrypoint for the CLI application.
// - Keeps `main` small: parse arguments, set up logging, dispatch to a
//   command handler and turn its result into an exit status.
// - A batch that stopped before its last row exits with status 1, as does
//   any error reported before the batch could start.

use std::io::{self, IsTerminal};

use clap::Parser;
use irms_cli::cli::{Cli, Command, LogFormatArg};
use irms_cli::commands::{self, CommandContext};
use irms_cli::logging::{init_logging, LogConfig, LogFormat};
use irms_cli::ui;

fn main() {
    let cli = Cli::parse();
    init_logging(&log_config_from_cli(&cli));

    let ctx = CommandContext::new(cli.website.clone(), cli.credentials.clone());
    let result = match &cli.command {
        Command::Login(args) => commands::run_login(&ctx, args).map(|message| {
            println!("{message}");
            0
        }),
        Command::Records(args) => commands::run_records(&ctx, args).map(|ledger| {
            ui::print_ledger(&ledger);
            if ledger.is_complete() { 0 } else { 1 }
        }),
        Command::Register(args) => commands::run_register(&ctx, args).map(|ledger| {
            ui::print_ledger(&ledger);
            if ledger.is_complete() { 0 } else { 1 }
        }),
        Command::Subject(args) => commands::run_subject(&ctx, args).map(|outcome| {
            ui::print_outcome(&outcome);
            if outcome.is_success() { 0 } else { 1 }
        }),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn log_config_from_cli(cli: &Cli) -> LogConfig {
    LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        format: match cli.log_format {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        },
        with_ansi: io::stderr().is_terminal(),
    }
}
