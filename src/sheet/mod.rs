//! Tabular source: a row-and-column grid read eagerly from a workbook, with
//! status write-back held in memory until an explicit save.

mod patch;
mod xlsx;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub use xlsx::Workbook;

/// Errors raised while reading or saving a workbook.
#[derive(Error, Debug)]
pub enum SheetError {
    #[error("cannot open input file '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' is not a readable .xlsx workbook: {1}")]
    NotAWorkbook(String, #[source] zip::result::ZipError),

    #[error("workbook part '{0}' is missing")]
    MissingPart(String),

    #[error("sheet '{0}' not found in workbook")]
    SheetNotFound(String),

    #[error("invalid cell reference '{0}'")]
    InvalidReference(String),

    #[error("shared string index {0} is out of range")]
    SharedStringIndex(usize),

    #[error("could not save workbook '{path}': {source}")]
    Save {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{0}")]
    Xml(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlEncoding(#[from] quick_xml::encoding::EncodingError),

    #[error("{0}")]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("unknown XML entity '{0}'")]
    XmlEntity(String),
}

/// One record's worth of cell values at a fixed 1-based row number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub number: u32,
    pub cells: Vec<String>,
}

impl Row {
    pub fn new(number: u32, cells: Vec<String>) -> Self {
        Self { number, cells }
    }

    /// Cell value at a 0-based column index, if the row reaches that far.
    pub fn cell(&self, column: u32) -> Option<&str> {
        self.cells.get(column as usize).map(String::as_str)
    }
}

/// A1-style cell address. `row` is 1-based, `column` is 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRef {
    pub row: u32,
    pub column: u32,
}

impl CellRef {
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.column), self.row)
    }
}

impl FromStr for CellRef {
    type Err = SheetError;

    fn from_str(reference: &str) -> Result<Self, Self::Err> {
        let invalid = || SheetError::InvalidReference(reference.to_string());
        let clean = reference.replace('$', "");
        let split = clean
            .find(|ch: char| ch.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (letters, digits) = clean.split_at(split);
        let column = column_index(letters).ok_or_else(invalid)?;
        let row = digits.parse::<u32>().map_err(|_| invalid())?;
        if row == 0 {
            return Err(invalid());
        }
        Ok(CellRef { row, column })
    }
}

/// Converts a 0-based column index to its letters (0 → "A", 26 → "AA").
pub fn column_letters(column: u32) -> String {
    let mut n = column + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Converts column letters to a 0-based index ("A" → 0). Case-insensitive.
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    let mut column: u32 = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let value = (ch.to_ascii_uppercase() as u8 - b'A' + 1) as u32;
        column = column.checked_mul(26)?.checked_add(value)?;
    }
    Some(column - 1)
}

/// Read/write access to a row grid persisted in a file.
///
/// Writes made through [`TabularSource::set_cell`] stay in memory until
/// [`TabularSource::save`] commits them.
pub trait TabularSource {
    /// Every row of `sheet`, in source order, starting at row 1.
    fn rows(&mut self, sheet: &str) -> Result<Vec<Row>, SheetError>;

    fn set_cell(&mut self, sheet: &str, cell: CellRef, value: &str) -> Result<(), SheetError>;

    fn save(&mut self) -> Result<(), SheetError>;
}
