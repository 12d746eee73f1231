// UI layer: the small amount of terminal interaction the CLI needs. A hidden
// password prompt via `dialoguer`, spinners and the batch progress bar via
// `indicatif`, and a colored run summary via `crossterm`.

use std::time::Duration;

use anyhow::Result;
use crossterm::style::Stylize;
use dialoguer::Password;
use indicatif::{ProgressBar, ProgressStyle};

use crate::api::SubmissionOutcome;
use crate::batch::BatchLedger;

/// Prompt for the login password. `Password` hides input in the terminal
/// and refuses an empty answer.
pub fn prompt_password() -> Result<String> {
    let password = Password::new().with_prompt("Password").interact()?;
    Ok(password)
}

/// Spinner shown while a single request is in flight.
pub fn spinner(message: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Progress bar over the rows of a batch; the runner sets its length.
pub fn batch_progress() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} rows {msg}") {
        bar.set_style(style);
    }
    bar
}

/// Print the per-run summary: declined rows, totals and where the batch
/// stopped, if it did.
pub fn print_ledger(ledger: &BatchLedger) {
    for entry in ledger.entries.iter().filter(|entry| !entry.accepted) {
        println!("{} row {}: {}", "✘".red(), entry.row, entry.status);
    }
    let summary = ledger.to_string();
    if ledger.is_complete() {
        println!("{} {}", "✔".green(), summary.bold());
    } else {
        println!("{} {}", "✘".red(), summary.bold());
    }
    if let Some(halt) = &ledger.halt {
        println!(
            "{}",
            format!("stopped at row {}: {}", halt.row, halt.reason).red()
        );
    }
}

pub fn print_outcome(outcome: &SubmissionOutcome) {
    match outcome {
        SubmissionOutcome::Success(message) => println!("{}", message.as_str().green()),
        SubmissionOutcome::Failure(failure) => println!("{}", failure.to_string().red()),
    }
}

/// Human wording for how long a token stays valid.
pub fn describe_expiry(seconds_left: Option<i64>) -> String {
    match seconds_left {
        None => "The login expires after 10 hours!".to_string(),
        Some(seconds) if seconds <= 0 => "The login has already expired!".to_string(),
        Some(seconds) => {
            let hours = seconds / 3600;
            let minutes = (seconds % 3600) / 60;
            format!("The login expires in {hours}h {minutes:02}m.")
        }
    }
}
