//! Command handlers. Each resolves configuration, builds the collaborators
//! it needs and hands off to the library; errors are reported with `anyhow`
//! context for the console.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api::{ApiClient, SubmissionOutcome};
use crate::batch::{BatchLedger, BatchRunner};
use crate::cli::{LoginArgs, RecordsArgs, RegisterArgs, SheetArgs, SubjectArgs};
use crate::config::{resolve_website, CredentialStore};
use crate::record::{GradeSpec, RecordSpec, RegistrationSpec, SubjectPayload};
use crate::session::Session;
use crate::sheet::Workbook;
use crate::ui;

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub website: Option<String>,
    pub credentials: PathBuf,
}

impl CommandContext {
    pub fn new(website: Option<String>, credentials: Option<PathBuf>) -> Self {
        Self {
            website,
            credentials: credentials.unwrap_or_else(CredentialStore::default_path),
        }
    }

    fn load_store(&self) -> Result<CredentialStore> {
        Ok(CredentialStore::load(&self.credentials)?)
    }

    /// Client for the configured server and the stored session.
    fn connect(&self) -> Result<(ApiClient, Session)> {
        let store = self.load_store()?;
        let website = resolve_website(self.website.as_deref(), &store)?;
        let session = Session::from_store(&store);
        check_session(&session, &website);
        let client = ApiClient::new(&website)?;
        Ok((client, session))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Warn about a session that the server is going to refuse. Never fatal:
/// the refusal is recorded against the first row like any other failure.
fn check_session(session: &Session, website: &str) {
    if session.is_anonymous() {
        warn!("no stored login token; run `irms login` first");
        return;
    }
    if !session.endpoint().is_empty() && session.endpoint() != website {
        warn!(
            issued_by = session.endpoint(),
            website, "stored token was issued by a different server"
        );
    }
    if let Some(seconds) = session.seconds_left(unix_now()) {
        if seconds <= 0 {
            warn!("stored login token has expired; run `irms login` again");
        }
    }
}

pub fn run_login(ctx: &CommandContext, args: &LoginArgs) -> Result<String> {
    let mut store = ctx.load_store()?;
    let website = resolve_website(ctx.website.as_deref(), &store)?;
    let password = ui::prompt_password()?;
    let client = ApiClient::new(&website)?;

    let spinner = ui::spinner("Logging in...");
    let result = client.login(&args.email, &password);
    spinner.finish_and_clear();

    let session = result?;
    session
        .persist(&mut store)
        .with_context(|| format!("storing token in {}", store.path().display()))?;
    info!(%website, "authenticated");
    Ok(format!(
        "Authenticated. {}",
        ui::describe_expiry(session.seconds_left(unix_now()))
    ))
}

pub fn run_records(ctx: &CommandContext, args: &RecordsArgs) -> Result<BatchLedger> {
    let spec = GradeSpec::new(args.subject_code.as_deref(), args.semester.as_deref());
    run_batch(ctx, &args.sheet, &spec)
}

pub fn run_register(ctx: &CommandContext, args: &RegisterArgs) -> Result<BatchLedger> {
    let spec = RegistrationSpec::new(args.degree);
    run_batch(ctx, &args.sheet, &spec)
}

fn run_batch<R: RecordSpec>(ctx: &CommandContext, args: &SheetArgs, spec: &R) -> Result<BatchLedger> {
    let (client, session) = ctx.connect()?;
    let mut workbook = Workbook::open(&args.file)
        .with_context(|| format!("could not open {}", args.file.display()))?;
    let ledger = BatchRunner::new(&client, &session)
        .with_policy(args.on_rejection)
        .with_progress(ui::batch_progress())
        .run(&mut workbook, &args.sheet, spec)
        .with_context(|| format!("could not process {}", args.file.display()))?;
    Ok(ledger)
}

pub fn run_subject(ctx: &CommandContext, args: &SubjectArgs) -> Result<SubmissionOutcome> {
    let (client, session) = ctx.connect()?;
    let payload = SubjectPayload {
        subject_code: args.code.clone(),
        subject_name: args.name.clone(),
    };
    let spinner = ui::spinner("Inserting subject...");
    let outcome = client.insert_subject(&payload, &session);
    spinner.finish_and_clear();
    Ok(outcome)
}
