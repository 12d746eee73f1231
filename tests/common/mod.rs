#![allow(dead_code)]

use std::path::Path;

use rust_xlsxwriter::Workbook as XlsxWriter;
use tokio::runtime::Runtime;
use wiremock::MockServer;

/// A cell value for a fixture workbook.
pub enum Cell {
    Text(&'static str),
    Number(f64),
}

pub use Cell::{Number, Text};

/// Writes a workbook with one sheet per `(name, rows)` pair.
pub fn write_workbook(path: &Path, sheets: &[(&str, &[&[Cell]])]) {
    let mut workbook = XlsxWriter::new();
    for (name, rows) in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(*name).unwrap();
        for (row, cells) in rows.iter().enumerate() {
            for (column, cell) in cells.iter().enumerate() {
                match cell {
                    Text(text) => worksheet.write_string(row as u32, column as u16, *text),
                    Number(number) => worksheet.write_number(row as u32, column as u16, *number),
                }
                .unwrap();
            }
        }
    }
    workbook.save(path).unwrap();
}

/// A mock server kept alive on its own runtime so blocking clients can call
/// it from the test thread.
pub struct TestServer {
    pub runtime: Runtime,
    pub server: MockServer,
}

impl TestServer {
    pub fn start() -> Self {
        let runtime = Runtime::new().unwrap();
        let server = runtime.block_on(MockServer::start());
        Self { runtime, server }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn mount(&self, mock: wiremock::Mock) {
        self.runtime.block_on(mock.mount(&self.server));
    }

    pub fn requests(&self) -> Vec<wiremock::Request> {
        self.runtime
            .block_on(self.server.received_requests())
            .unwrap_or_default()
    }
}
