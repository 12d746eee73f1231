//! Command-line definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};

use crate::batch::RejectionPolicy;
use crate::record::Degree;

#[derive(Parser, Debug)]
#[command(
    name = "irms",
    version,
    about = "Use IRMS Server through CLI",
    long_about = "Bulk-load grade records and user registrations into an IRMS \
                  server from .xlsx files.\n\n\
                  Each processed row gets a status written to the column right \
                  after its data, so the file doubles as a record of what was \
                  inserted. A batch stops at the first row that fails."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Base address of the IRMS server (stored at login).
    #[arg(long, env = "IRMS_WEBSITE", value_name = "URL", global = true)]
    pub website: Option<String>,

    /// Credential file holding the server address and login token.
    #[arg(long, env = "IRMS_CREDENTIALS", value_name = "PATH", global = true)]
    pub credentials: Option<PathBuf>,

    /// Log output format.
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Login and store the token for later commands.
    #[command(visible_alias = "l")]
    Login(LoginArgs),

    /// Insert grade records from an .xlsx file, marking each row's status in column E.
    #[command(name = "rec", visible_alias = "ri")]
    Records(RecordsArgs),

    /// Insert a single subject.
    #[command(name = "sub", visible_alias = "si")]
    Subject(SubjectArgs),

    /// Register users from an .xlsx file, marking each row's status in column C.
    #[command(visible_alias = "r")]
    Register(RegisterArgs),
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Admin account email.
    #[arg(value_name = "USERNAME")]
    pub email: String,
}

#[derive(Args, Debug)]
pub struct SheetArgs {
    /// Path to the .xlsx workbook.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Name of the sheet to read.
    #[arg(value_name = "SHEET")]
    pub sheet: String,

    /// Whether a row the server declines stops the batch.
    ///
    /// Transport and authorization failures always stop it.
    #[arg(long = "on-rejection", value_enum, default_value = "abort")]
    pub on_rejection: RejectionPolicy,
}

#[derive(Args, Debug)]
pub struct RecordsArgs {
    #[command(flatten)]
    pub sheet: SheetArgs,

    /// Semester for all records. By default read from column D.
    #[arg(long)]
    pub semester: Option<String>,

    /// Subject code for all records. By default read from column C.
    #[arg(long = "subjectcode")]
    pub subject_code: Option<String>,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub sheet: SheetArgs,

    /// Degree for all students.
    #[arg(long, value_enum)]
    pub degree: Degree,
}

#[derive(Args, Debug)]
pub struct SubjectArgs {
    #[arg(value_name = "SUBJECT_CODE")]
    pub code: String,

    #[arg(value_name = "SUBJECT_NAME")]
    pub name: String,
}

/// CLI log format choices.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
