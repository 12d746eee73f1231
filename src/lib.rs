// Library root
// ------------
// Bulk-loads spreadsheet rows into an IRMS server and records each row's
// outcome back into the spreadsheet. The binary (`main.rs`) parses the
// command line and dispatches to `commands`.
//
// Module responsibilities:
// - `sheet`: reads .xlsx workbooks and writes status cells back on save.
// - `record`: record kinds and how each row resolves into a payload.
// - `session`: the bearer token a batch runs under.
// - `api`: HTTP calls to the server and classification of their replies.
// - `batch`: the per-row loop and the ledger it produces.
// - `config`: the credential file shared between invocations.
// - `cli`, `commands`, `ui`, `logging`: the command-line surface.
pub mod api;
pub mod batch;
pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod record;
pub mod session;
pub mod sheet;
pub mod ui;
