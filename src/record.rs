//! Record kinds and per-row field resolution.
//!
//! Each kind names its fields, input columns, status column and endpoint.
//! A field resolves either from a batch-wide override or from its fallback
//! column in the row; a non-empty override shadows the column for every row.

use std::fmt;

use clap::ValueEnum;
use serde::Serialize;
use thiserror::Error;

use crate::api::SubmissionOutcome;
use crate::sheet::{column_letters, Row};

/// A row does not reach a column one of its fields reads from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("row {row} has no value in column {column} ({field})")]
pub struct ResolveError {
    pub row: u32,
    pub column: String,
    pub field: &'static str,
}

/// Where a field's value comes from for the whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    Override(String),
    Column(u32),
}

impl FieldSource {
    /// An empty or missing override falls back to `column`.
    pub fn new(override_value: Option<&str>, column: u32) -> Self {
        match override_value.map(str::trim) {
            Some(value) if !value.is_empty() => FieldSource::Override(value.to_string()),
            _ => FieldSource::Column(column),
        }
    }

    pub fn resolve(&self, row: &Row, field: &'static str) -> Result<String, ResolveError> {
        match self {
            FieldSource::Override(value) => Ok(value.clone()),
            FieldSource::Column(column) => read_column(row, *column, field),
        }
    }
}

fn read_column(row: &Row, column: u32, field: &'static str) -> Result<String, ResolveError> {
    row.cell(column)
        .map(str::to_string)
        .ok_or_else(|| ResolveError {
            row: row.number,
            column: column_letters(column),
            field,
        })
}

/// A kind of record that can be bulk-loaded from a sheet.
pub trait RecordSpec {
    type Payload: Serialize + fmt::Debug;

    /// Short name used in logs.
    const KIND: &'static str;

    /// Path of the endpoint each payload is posted to.
    fn endpoint(&self) -> &'static str;

    /// 0-based column the per-row status is written to.
    fn status_column(&self) -> u32;

    /// Status text written when a submission fails before the server answers.
    fn failure_label(&self) -> &'static str;

    fn resolve(&self, row: &Row) -> Result<Self::Payload, ResolveError>;

    /// Text recorded in the status cell for `outcome`.
    fn status_text(&self, outcome: &SubmissionOutcome) -> String {
        outcome
            .server_message()
            .map(str::to_string)
            .unwrap_or_else(|| self.failure_label().to_string())
    }
}

/// Grade record: entry number, grade, subject code and semester in columns
/// A to D; status in E.
#[derive(Debug, Clone)]
pub struct GradeSpec {
    pub subject_code: FieldSource,
    pub semester: FieldSource,
}

impl GradeSpec {
    const ENTRY_NUMBER: u32 = 0;
    const GRADE: u32 = 1;
    const SUBJECT_CODE: u32 = 2;
    const SEMESTER: u32 = 3;
    const STATUS: u32 = 4;

    pub fn new(subject_code: Option<&str>, semester: Option<&str>) -> Self {
        Self {
            subject_code: FieldSource::new(subject_code, Self::SUBJECT_CODE),
            semester: FieldSource::new(semester, Self::SEMESTER),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradePayload {
    pub entry_number: String,
    pub grade: String,
    pub subject_code: String,
    pub semester: String,
}

impl RecordSpec for GradeSpec {
    type Payload = GradePayload;

    const KIND: &'static str = "grade record";

    fn endpoint(&self) -> &'static str {
        "/admin/records/single"
    }

    fn status_column(&self) -> u32 {
        Self::STATUS
    }

    fn failure_label(&self) -> &'static str {
        "Failed"
    }

    fn resolve(&self, row: &Row) -> Result<GradePayload, ResolveError> {
        Ok(GradePayload {
            entry_number: read_column(row, Self::ENTRY_NUMBER, "entryNumber")?,
            grade: read_column(row, Self::GRADE, "grade")?,
            subject_code: self.subject_code.resolve(row, "subjectCode")?,
            semester: self.semester.resolve(row, "semester")?,
        })
    }
}

/// Program level a registered user is enrolled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
pub enum Degree {
    #[value(name = "B.Tech")]
    #[serde(rename = "B.Tech")]
    BTech,
    #[value(name = "M.Tech")]
    #[serde(rename = "M.Tech")]
    MTech,
    #[value(name = "PhD")]
    #[serde(rename = "PhD")]
    PhD,
}

impl fmt::Display for Degree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Degree::BTech => "B.Tech",
            Degree::MTech => "M.Tech",
            Degree::PhD => "PhD",
        })
    }
}

/// User registration: name and entry number in columns A and B; status in C.
/// The degree applies to every row of the batch.
#[derive(Debug, Clone)]
pub struct RegistrationSpec {
    pub degree: Degree,
}

impl RegistrationSpec {
    const NAME: u32 = 0;
    const ENTRY_NUMBER: u32 = 1;
    const STATUS: u32 = 2;

    pub fn new(degree: Degree) -> Self {
        Self { degree }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPayload {
    pub name: String,
    pub entry_number: String,
    pub degree: Degree,
}

impl RecordSpec for RegistrationSpec {
    type Payload = RegistrationPayload;

    const KIND: &'static str = "registration";

    fn endpoint(&self) -> &'static str {
        "/admin/register/user"
    }

    fn status_column(&self) -> u32 {
        Self::STATUS
    }

    fn failure_label(&self) -> &'static str {
        "Not inserted"
    }

    fn resolve(&self, row: &Row) -> Result<RegistrationPayload, ResolveError> {
        Ok(RegistrationPayload {
            name: read_column(row, Self::NAME, "name")?,
            entry_number: read_column(row, Self::ENTRY_NUMBER, "entryNumber")?,
            degree: self.degree,
        })
    }
}

/// Body of the single-subject insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPayload {
    pub subject_code: String,
    pub subject_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Failure, TransportError};

    fn row(number: u32, cells: &[&str]) -> Row {
        Row::new(number, cells.iter().map(|c| c.to_string()).collect())
    }

    #[test]
    fn grade_fields_come_from_columns_without_overrides() {
        let spec = GradeSpec::new(None, None);
        let payload = spec
            .resolve(&row(1, &["2020csb1062", "A", "CS201", "2023-2"]))
            .unwrap();
        assert_eq!(
            payload,
            GradePayload {
                entry_number: "2020csb1062".into(),
                grade: "A".into(),
                subject_code: "CS201".into(),
                semester: "2023-2".into(),
            }
        );
    }

    #[test]
    fn override_shadows_row_column() {
        let spec = GradeSpec::new(None, Some("2024-1"));
        let payload = spec
            .resolve(&row(1, &["2020csb1062", "A", "CS201", "2023-2"]))
            .unwrap();
        assert_eq!(payload.semester, "2024-1");
        assert_eq!(payload.subject_code, "CS201");
    }

    #[test]
    fn overrides_let_rows_omit_shared_columns() {
        let spec = GradeSpec::new(Some("CS201"), Some("2024-1"));
        let payload = spec.resolve(&row(4, &["2020csb1062", "B"])).unwrap();
        assert_eq!(payload.subject_code, "CS201");
        assert_eq!(payload.semester, "2024-1");
    }

    #[test]
    fn empty_override_falls_back_to_column() {
        assert_eq!(FieldSource::new(Some(""), 3), FieldSource::Column(3));
        assert_eq!(FieldSource::new(Some("  "), 3), FieldSource::Column(3));
        assert_eq!(FieldSource::new(None, 3), FieldSource::Column(3));
        assert_eq!(
            FieldSource::new(Some("CS201"), 2),
            FieldSource::Override("CS201".into())
        );
    }

    #[test]
    fn short_row_names_missing_column() {
        let spec = GradeSpec::new(None, None);
        let error = spec.resolve(&row(7, &["2020csb1062", "A", "CS201"])).unwrap_err();
        assert_eq!(
            error,
            ResolveError {
                row: 7,
                column: "D".into(),
                field: "semester",
            }
        );
        assert_eq!(error.to_string(), "row 7 has no value in column D (semester)");
    }

    #[test]
    fn resolution_is_repeatable() {
        let spec = GradeSpec::new(Some("CS201"), None);
        let source = row(2, &["2020csb1062", "A", "EE101", "2023-2"]);
        assert_eq!(spec.resolve(&source).unwrap(), spec.resolve(&source).unwrap());
    }

    #[test]
    fn grade_payload_uses_wire_field_names() {
        let payload = GradeSpec::new(None, None)
            .resolve(&row(1, &["e1", "A", "CS201", "2024-1"]))
            .unwrap();
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({
                "entryNumber": "e1",
                "grade": "A",
                "subjectCode": "CS201",
                "semester": "2024-1",
            })
        );
    }

    #[test]
    fn registration_takes_degree_from_batch() {
        let spec = RegistrationSpec::new(Degree::MTech);
        let payload = spec.resolve(&row(1, &["Asha Rao", "2021mcs1001"])).unwrap();
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({
                "name": "Asha Rao",
                "entryNumber": "2021mcs1001",
                "degree": "M.Tech",
            })
        );
    }

    #[test]
    fn degree_accepts_only_known_literals() {
        assert_eq!(Degree::from_str("B.Tech", false), Ok(Degree::BTech));
        assert_eq!(Degree::from_str("PhD", false), Ok(Degree::PhD));
        assert!(Degree::from_str("Masters", false).is_err());
        assert_eq!(Degree::MTech.to_string(), "M.Tech");
    }

    #[test]
    fn status_text_uses_server_message_or_failure_label() {
        let grade = GradeSpec::new(None, None);
        let registration = RegistrationSpec::new(Degree::PhD);
        let accepted = SubmissionOutcome::Success("Inserted".into());
        let rejected = SubmissionOutcome::Failure(Failure::Rejected("Duplicate entry".into()));
        let transport =
            SubmissionOutcome::Failure(Failure::Transport(TransportError::RequestFailed));
        assert_eq!(grade.status_text(&accepted), "Inserted");
        assert_eq!(grade.status_text(&rejected), "Duplicate entry");
        assert_eq!(grade.status_text(&transport), "Failed");
        assert_eq!(registration.status_text(&transport), "Not inserted");
    }
}
