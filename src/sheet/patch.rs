//! Streams a worksheet part through quick-xml and splices inline-string cells
//! into it. Everything not being written is copied through untouched, so
//! formatting, formulas and other cells survive a save.

use std::collections::BTreeMap;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::{CellRef, SheetError};

type RowWrites<'a> = BTreeMap<u32, &'a str>;

pub(super) fn apply(xml: &str, writes: &BTreeMap<CellRef, String>) -> Result<String, SheetError> {
    let mut rows: BTreeMap<u32, RowWrites<'_>> = BTreeMap::new();
    for (cell, value) in writes {
        rows.entry(cell.row)
            .or_default()
            .insert(cell.column, value.as_str());
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::new());

    let mut prefix = String::new();
    let mut row_writes: RowWrites<'_> = BTreeMap::new();
    let mut row_number = 0u32;
    let mut next_column = 0u32;
    let mut skip_depth = 0usize;

    loop {
        let event = reader.read_event()?;
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => break,
                _ => (),
            }
            continue;
        }
        match event {
            Event::Eof => break,
            Event::Start(e) if e.local_name().as_ref() == b"sheetData" => {
                prefix = element_prefix(&e);
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                prefix = element_prefix(&e);
                if rows.is_empty() {
                    writer.write_event(Event::Empty(e))?;
                } else {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    writer.write_event(Event::Start(e))?;
                    write_new_rows(&mut writer, &prefix, std::mem::take(&mut rows))?;
                    writer.write_event(Event::End(BytesEnd::new(name)))?;
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => {
                write_new_rows(&mut writer, &prefix, std::mem::take(&mut rows))?;
                writer.write_event(Event::End(e))?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"row" => {
                row_number = row_attribute(&e)?.unwrap_or(row_number + 1);
                next_column = 0;
                let later = rows.split_off(&row_number);
                write_new_rows(&mut writer, &prefix, std::mem::replace(&mut rows, later))?;
                row_writes = rows.remove(&row_number).unwrap_or_default();
                if row_writes.is_empty() {
                    writer.write_event(Event::Start(e))?;
                } else {
                    writer.write_event(Event::Start(without_spans(&e)))?;
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                row_number = row_attribute(&e)?.unwrap_or(row_number + 1);
                let later = rows.split_off(&row_number);
                write_new_rows(&mut writer, &prefix, std::mem::replace(&mut rows, later))?;
                match rows.remove(&row_number) {
                    Some(cells) => {
                        let row = without_spans(&e);
                        let name = String::from_utf8_lossy(row.name().as_ref()).into_owned();
                        writer.write_event(Event::Start(row))?;
                        write_cells(&mut writer, &prefix, row_number, cells)?;
                        writer.write_event(Event::End(BytesEnd::new(name)))?;
                    }
                    None => writer.write_event(Event::Empty(e))?,
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"row" => {
                write_cells(&mut writer, &prefix, row_number, std::mem::take(&mut row_writes))?;
                writer.write_event(Event::End(e))?;
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                let replaced = splice_cell(
                    &mut writer,
                    &prefix,
                    &e,
                    row_number,
                    &mut next_column,
                    &mut row_writes,
                )?;
                if replaced {
                    // drop the original <c>...</c>
                    skip_depth = 1;
                } else {
                    writer.write_event(Event::Start(e))?;
                }
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let replaced = splice_cell(
                    &mut writer,
                    &prefix,
                    &e,
                    row_number,
                    &mut next_column,
                    &mut row_writes,
                )?;
                if !replaced {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            event => writer.write_event(event)?,
        }
    }

    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

/// Writes pending cells that sort before `cell`, then the replacement for
/// `cell` itself if one is pending. Returns whether `cell` was replaced.
fn splice_cell(
    writer: &mut Writer<Vec<u8>>,
    prefix: &str,
    cell: &BytesStart<'_>,
    row_number: u32,
    next_column: &mut u32,
    row_writes: &mut RowWrites<'_>,
) -> Result<bool, SheetError> {
    let column = match cell.try_get_attribute("r")? {
        Some(reference) => reference.unescape_value()?.parse::<CellRef>()?.column,
        None => *next_column,
    };
    *next_column = column + 1;

    let later = row_writes.split_off(&column);
    let earlier = std::mem::replace(row_writes, later);
    write_cells(writer, prefix, row_number, earlier)?;

    match row_writes.remove(&column) {
        Some(value) => {
            let style = match cell.try_get_attribute("s")? {
                Some(style) => Some(style.unescape_value()?.into_owned()),
                None => None,
            };
            let reference = CellRef::new(row_number, column);
            write_inline_cell(writer, prefix, reference, value, style.as_deref())?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn write_new_rows(
    writer: &mut Writer<Vec<u8>>,
    prefix: &str,
    rows: BTreeMap<u32, RowWrites<'_>>,
) -> Result<(), SheetError> {
    let name = format!("{prefix}row");
    for (row_number, cells) in rows {
        let number = row_number.to_string();
        let mut row = BytesStart::new(name.as_str());
        row.push_attribute(("r", number.as_str()));
        writer.write_event(Event::Start(row))?;
        write_cells(writer, prefix, row_number, cells)?;
        writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
    }
    Ok(())
}

fn write_cells(
    writer: &mut Writer<Vec<u8>>,
    prefix: &str,
    row_number: u32,
    cells: RowWrites<'_>,
) -> Result<(), SheetError> {
    for (column, value) in cells {
        write_inline_cell(writer, prefix, CellRef::new(row_number, column), value, None)?;
    }
    Ok(())
}

/// `<c r="E3" t="inlineStr"><is><t>value</t></is></c>`
fn write_inline_cell(
    writer: &mut Writer<Vec<u8>>,
    prefix: &str,
    cell: CellRef,
    value: &str,
    style: Option<&str>,
) -> Result<(), SheetError> {
    let reference = cell.to_string();
    let cell_name = format!("{prefix}c");
    let inline_name = format!("{prefix}is");
    let text_name = format!("{prefix}t");

    let mut start = BytesStart::new(cell_name.as_str());
    start.push_attribute(("r", reference.as_str()));
    if let Some(style) = style {
        start.push_attribute(("s", style));
    }
    start.push_attribute(("t", "inlineStr"));
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Start(BytesStart::new(inline_name.as_str())))?;

    let mut text = BytesStart::new(text_name.as_str());
    if value.trim() != value {
        text.push_attribute(("xml:space", "preserve"));
    }
    writer.write_event(Event::Start(text))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(text_name.as_str())))?;

    writer.write_event(Event::End(BytesEnd::new(inline_name.as_str())))?;
    writer.write_event(Event::End(BytesEnd::new(cell_name.as_str())))?;
    Ok(())
}

fn row_attribute(row: &BytesStart<'_>) -> Result<Option<u32>, SheetError> {
    match row.try_get_attribute("r")? {
        Some(attribute) => {
            let value = attribute.unescape_value()?;
            value
                .parse()
                .map(Some)
                .map_err(|_| SheetError::InvalidReference(value.into_owned()))
        }
        None => Ok(None),
    }
}

/// Copy of a `<row>` start tag without its `spans` hint, which goes stale
/// once cells are added past it.
fn without_spans(row: &BytesStart<'_>) -> BytesStart<'static> {
    let name = String::from_utf8_lossy(row.name().as_ref()).into_owned();
    let mut copy = BytesStart::new(name);
    for attribute in row.attributes().flatten() {
        if attribute.key.as_ref() != b"spans" {
            copy.push_attribute(attribute);
        }
    }
    copy
}

/// Namespace prefix of an element including the colon ("x:"), or "".
fn element_prefix(element: &BytesStart<'_>) -> String {
    let name = element.name();
    let name = name.as_ref();
    match name.iter().position(|byte| *byte == b':') {
        Some(colon) => String::from_utf8_lossy(&name[..=colon]).into_owned(),
        None => String::new(),
    }
}
