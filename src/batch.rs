//! Batch runner: reads a sheet once, submits one record per row in source
//! order and writes each row's outcome into its status cell. The workbook is
//! saved exactly once, after the last row processed.
//!
//! Per row: `Pending → Resolved → Submitted → Recorded`. Every row is resolved
//! before the first submission so a structurally broken sheet fails without
//! any network traffic and without a single status write.

use std::fmt;

use clap::ValueEnum;
use indicatif::ProgressBar;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::api::{Failure, RecordSubmitter, SubmissionOutcome};
use crate::record::{RecordSpec, ResolveError};
use crate::session::Session;
use crate::sheet::{CellRef, SheetError, TabularSource};

#[derive(Error, Debug)]
pub enum BatchError {
    /// The file, the sheet or a row is unusable; nothing was submitted.
    #[error("{0}")]
    Sheet(#[from] SheetError),

    #[error("{0}")]
    Resolve(#[from] ResolveError),
}

/// What to do after the server declines a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum RejectionPolicy {
    /// Stop at the first declined row.
    #[default]
    Abort,
    /// Record the rejection and move on to the next row.
    Continue,
}

impl RejectionPolicy {
    /// Transport and authorization failures always stop the batch.
    fn halts_on(self, failure: &Failure) -> bool {
        failure.is_systemic() || self == RejectionPolicy::Abort
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub row: u32,
    pub status: String,
    pub accepted: bool,
}

/// Row at which the batch stopped and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halt {
    pub row: u32,
    pub reason: String,
}

/// Per-row statuses of one run, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLedger {
    pub sheet: String,
    pub total_rows: usize,
    pub entries: Vec<LedgerEntry>,
    pub halt: Option<Halt>,
}

impl BatchLedger {
    fn new(sheet: &str, total_rows: usize) -> Self {
        Self {
            sheet: sheet.to_string(),
            total_rows,
            entries: Vec::with_capacity(total_rows),
            halt: None,
        }
    }

    pub fn accepted(&self) -> usize {
        self.entries.iter().filter(|entry| entry.accepted).count()
    }

    pub fn declined(&self) -> usize {
        self.entries.len() - self.accepted()
    }

    /// Rows never submitted because the batch stopped first.
    pub fn pending(&self) -> usize {
        self.total_rows - self.entries.len()
    }

    pub fn is_complete(&self) -> bool {
        self.halt.is_none()
    }
}

impl fmt::Display for BatchLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} accepted, {} declined, {} pending",
            self.sheet,
            self.accepted(),
            self.declined(),
            self.pending()
        )
    }
}

pub struct BatchRunner<'a, S> {
    submitter: &'a S,
    session: &'a Session,
    policy: RejectionPolicy,
    progress: ProgressBar,
}

impl<'a, S: RecordSubmitter> BatchRunner<'a, S> {
    pub fn new(submitter: &'a S, session: &'a Session) -> Self {
        Self {
            submitter,
            session,
            policy: RejectionPolicy::default(),
            progress: ProgressBar::hidden(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RejectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Progress bar advanced once per submitted row.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Runs the batch for `sheet`. Structural problems come back as `Err`
    /// with the file untouched; everything else is in the returned ledger.
    pub fn run<T, R>(&self, source: &mut T, sheet: &str, spec: &R) -> Result<BatchLedger, BatchError>
    where
        T: TabularSource,
        R: RecordSpec,
    {
        let span = info_span!("batch", kind = R::KIND, sheet);
        let _guard = span.enter();

        let rows = source.rows(sheet)?;
        let resolved = rows
            .iter()
            .map(|row| spec.resolve(row).map(|payload| (row.number, payload)))
            .collect::<Result<Vec<_>, _>>()?;
        info!(rows = resolved.len(), endpoint = spec.endpoint(), "starting batch");

        self.progress.set_length(resolved.len() as u64);
        let mut ledger = BatchLedger::new(sheet, resolved.len());
        for (row, payload) in resolved {
            debug!(row, ?payload, "submitting row");
            let outcome = self
                .submitter
                .submit(spec.endpoint(), &payload, self.session);
            let status = spec.status_text(&outcome);
            source.set_cell(sheet, CellRef::new(row, spec.status_column()), &status)?;
            self.progress.inc(1);
            ledger.entries.push(LedgerEntry {
                row,
                status,
                accepted: outcome.is_success(),
            });

            if let SubmissionOutcome::Failure(failure) = &outcome {
                warn!(row, %failure, "row not accepted");
                if self.policy.halts_on(failure) {
                    ledger.halt = Some(Halt {
                        row,
                        reason: failure.to_string(),
                    });
                    break;
                }
            }
        }
        self.progress.finish_and_clear();

        source.save()?;
        info!(
            accepted = ledger.accepted(),
            declined = ledger.declined(),
            pending = ledger.pending(),
            "batch finished"
        );
        Ok(ledger)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::{BTreeMap, VecDeque};

    use serde::Serialize;

    use super::*;
    use crate::api::TransportError;
    use crate::record::{Degree, GradeSpec, RegistrationSpec};
    use crate::sheet::Row;

    /// In-memory sheet that records every write and save.
    #[derive(Default)]
    struct MemorySheet {
        rows: Vec<Row>,
        writes: BTreeMap<CellRef, String>,
        write_log: Vec<CellRef>,
        saves: usize,
    }

    impl MemorySheet {
        fn new(rows: &[&[&str]]) -> Self {
            let rows = rows
                .iter()
                .enumerate()
                .map(|(index, cells)| {
                    Row::new(index as u32 + 1, cells.iter().map(|c| c.to_string()).collect())
                })
                .collect();
            Self {
                rows,
                ..Default::default()
            }
        }

        fn status_column(&self, column: u32) -> Vec<String> {
            self.rows
                .iter()
                .map(|row| {
                    self.writes
                        .get(&CellRef::new(row.number, column))
                        .cloned()
                        .unwrap_or_default()
                })
                .collect()
        }
    }

    impl TabularSource for MemorySheet {
        fn rows(&mut self, sheet: &str) -> Result<Vec<Row>, SheetError> {
            if sheet != "Sheet1" {
                return Err(SheetError::SheetNotFound(sheet.to_string()));
            }
            Ok(self.rows.clone())
        }

        fn set_cell(&mut self, _sheet: &str, cell: CellRef, value: &str) -> Result<(), SheetError> {
            assert!(
                self.writes.insert(cell, value.to_string()).is_none(),
                "{cell} written twice"
            );
            self.write_log.push(cell);
            Ok(())
        }

        fn save(&mut self) -> Result<(), SheetError> {
            self.saves += 1;
            Ok(())
        }
    }

    /// Replays scripted outcomes and keeps the submitted payloads as JSON.
    struct ScriptedSubmitter {
        outcomes: RefCell<VecDeque<SubmissionOutcome>>,
        submitted: RefCell<Vec<serde_json::Value>>,
        tokens: RefCell<Vec<String>>,
    }

    impl ScriptedSubmitter {
        fn new(outcomes: Vec<SubmissionOutcome>) -> Self {
            Self {
                outcomes: RefCell::new(outcomes.into()),
                submitted: RefCell::new(Vec::new()),
                tokens: RefCell::new(Vec::new()),
            }
        }
    }

    impl RecordSubmitter for ScriptedSubmitter {
        fn submit<P: Serialize>(
            &self,
            endpoint: &str,
            payload: &P,
            session: &Session,
        ) -> SubmissionOutcome {
            let mut body = serde_json::to_value(payload).unwrap();
            body["_endpoint"] = endpoint.into();
            self.submitted.borrow_mut().push(body);
            self.tokens.borrow_mut().push(session.token().to_string());
            self.outcomes
                .borrow_mut()
                .pop_front()
                .expect("more submissions than scripted outcomes")
        }
    }

    fn inserted() -> SubmissionOutcome {
        SubmissionOutcome::Success("Inserted".into())
    }

    fn grade_rows() -> MemorySheet {
        MemorySheet::new(&[
            &["2020csb1062", "A", "CS201", "2023-2"],
            &["2020csb1063", "B", "CS201", "2023-2"],
            &["2020csb1064", "C", "CS201", "2023-2"],
        ])
    }

    #[test]
    fn all_rows_accepted_are_marked_and_saved_once() {
        let mut sheet = grade_rows();
        let submitter = ScriptedSubmitter::new(vec![inserted(), inserted(), inserted()]);
        let session = Session::new("http://irms", "tok");

        let ledger = BatchRunner::new(&submitter, &session)
            .run(&mut sheet, "Sheet1", &GradeSpec::new(None, None))
            .unwrap();

        assert!(ledger.is_complete());
        assert_eq!(ledger.accepted(), 3);
        assert_eq!(sheet.status_column(4), ["Inserted", "Inserted", "Inserted"]);
        assert_eq!(sheet.saves, 1);
        assert_eq!(*submitter.tokens.borrow(), ["tok", "tok", "tok"]);
        assert_eq!(
            submitter.submitted.borrow()[0]["_endpoint"],
            "/admin/records/single"
        );
    }

    #[test]
    fn transport_failure_marks_row_and_stops() {
        let mut sheet = grade_rows();
        let submitter = ScriptedSubmitter::new(vec![
            inserted(),
            SubmissionOutcome::Failure(Failure::Transport(TransportError::RequestFailed)),
        ]);
        let session = Session::new("http://irms", "tok");

        let ledger = BatchRunner::new(&submitter, &session)
            .run(&mut sheet, "Sheet1", &GradeSpec::new(None, None))
            .unwrap();

        assert_eq!(sheet.status_column(4), ["Inserted", "Failed", ""]);
        assert_eq!(submitter.submitted.borrow().len(), 2);
        assert_eq!(
            ledger.halt,
            Some(Halt {
                row: 2,
                reason: "request failed".into()
            })
        );
        assert_eq!(ledger.pending(), 1);
        assert_eq!(sheet.saves, 1);
    }

    #[test]
    fn override_reaches_submitted_payload() {
        let mut sheet = MemorySheet::new(&[&["2020csb1062", "A", "CS201", "2023-2"]]);
        let submitter = ScriptedSubmitter::new(vec![inserted()]);
        let session = Session::new("http://irms", "tok");

        BatchRunner::new(&submitter, &session)
            .run(&mut sheet, "Sheet1", &GradeSpec::new(None, Some("2024-1")))
            .unwrap();

        assert_eq!(submitter.submitted.borrow()[0]["semester"], "2024-1");
    }

    #[test]
    fn unauthorized_first_row_stops_batch() {
        let mut sheet = grade_rows();
        let submitter = ScriptedSubmitter::new(vec![SubmissionOutcome::Failure(
            Failure::Unauthorized("Token expired".into()),
        )]);
        let session = Session::new("http://irms", "");

        let ledger = BatchRunner::new(&submitter, &session)
            .with_policy(RejectionPolicy::Continue)
            .run(&mut sheet, "Sheet1", &GradeSpec::new(None, None))
            .unwrap();

        assert_eq!(sheet.status_column(4), ["Token expired", "", ""]);
        assert_eq!(ledger.halt.as_ref().map(|halt| halt.row), Some(1));
        assert_eq!(sheet.saves, 1);
    }

    #[test]
    fn rejection_aborts_under_default_policy() {
        let mut sheet = grade_rows();
        let submitter = ScriptedSubmitter::new(vec![
            SubmissionOutcome::Failure(Failure::Rejected("Record already exists".into())),
        ]);
        let session = Session::new("http://irms", "tok");

        let ledger = BatchRunner::new(&submitter, &session)
            .run(&mut sheet, "Sheet1", &GradeSpec::new(None, None))
            .unwrap();

        assert_eq!(sheet.status_column(4), ["Record already exists", "", ""]);
        assert!(!ledger.is_complete());
    }

    #[test]
    fn rejection_continues_when_allowed() {
        let mut sheet = grade_rows();
        let submitter = ScriptedSubmitter::new(vec![
            inserted(),
            SubmissionOutcome::Failure(Failure::Rejected("Record already exists".into())),
            inserted(),
        ]);
        let session = Session::new("http://irms", "tok");

        let ledger = BatchRunner::new(&submitter, &session)
            .with_policy(RejectionPolicy::Continue)
            .run(&mut sheet, "Sheet1", &GradeSpec::new(None, None))
            .unwrap();

        assert!(ledger.is_complete());
        assert_eq!(ledger.accepted(), 2);
        assert_eq!(ledger.declined(), 1);
        assert_eq!(
            sheet.status_column(4),
            ["Inserted", "Record already exists", "Inserted"]
        );
        assert_eq!(ledger.to_string(), "Sheet1: 2 accepted, 1 declined, 0 pending");
    }

    #[test]
    fn short_row_fails_before_any_submission() {
        let mut sheet = MemorySheet::new(&[
            &["2020csb1062", "A", "CS201", "2023-2"],
            &["2020csb1063", "B"],
        ]);
        let submitter = ScriptedSubmitter::new(Vec::new());
        let session = Session::new("http://irms", "tok");

        let error = BatchRunner::new(&submitter, &session)
            .run(&mut sheet, "Sheet1", &GradeSpec::new(None, None))
            .unwrap_err();

        assert!(matches!(error, BatchError::Resolve(ResolveError { row: 2, .. })));
        assert!(submitter.submitted.borrow().is_empty());
        assert!(sheet.writes.is_empty());
        assert_eq!(sheet.saves, 0);
    }

    #[test]
    fn missing_sheet_is_structural() {
        let mut sheet = grade_rows();
        let submitter = ScriptedSubmitter::new(Vec::new());
        let session = Session::new("http://irms", "tok");

        let error = BatchRunner::new(&submitter, &session)
            .run(&mut sheet, "Grades", &GradeSpec::new(None, None))
            .unwrap_err();

        assert!(matches!(error, BatchError::Sheet(SheetError::SheetNotFound(_))));
        assert_eq!(sheet.saves, 0);
    }

    #[test]
    fn written_rows_form_a_prefix_in_source_order() {
        let mut sheet = MemorySheet::new(&[
            &["Asha Rao", "2021mcs1001"],
            &["Ravi Kumar", "2021mcs1002"],
            &["Meera Iyer", "2021mcs1003"],
            &["Kiran Das", "2021mcs1004"],
        ]);
        let submitter = ScriptedSubmitter::new(vec![
            inserted(),
            inserted(),
            SubmissionOutcome::Failure(Failure::Transport(TransportError::UndecodableResponse)),
        ]);
        let session = Session::new("http://irms", "tok");

        let ledger = BatchRunner::new(&submitter, &session)
            .run(&mut sheet, "Sheet1", &RegistrationSpec::new(Degree::BTech))
            .unwrap();

        assert_eq!(
            sheet.write_log,
            [CellRef::new(1, 2), CellRef::new(2, 2), CellRef::new(3, 2)]
        );
        assert_eq!(
            sheet.status_column(2),
            ["Inserted", "Inserted", "Not inserted", ""]
        );
        assert_eq!(ledger.entries.len(), 3);
        assert_eq!(submitter.submitted.borrow()[0]["degree"], "B.Tech");
    }

    #[test]
    fn empty_sheet_still_saves_once() {
        let mut sheet = MemorySheet::new(&[]);
        let submitter = ScriptedSubmitter::new(Vec::new());
        let session = Session::new("http://irms", "tok");

        let ledger = BatchRunner::new(&submitter, &session)
            .run(&mut sheet, "Sheet1", &GradeSpec::new(None, None))
            .unwrap();

        assert!(ledger.is_complete());
        assert_eq!(ledger.total_rows, 0);
        assert_eq!(sheet.saves, 1);
    }
}
