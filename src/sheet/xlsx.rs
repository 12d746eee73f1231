use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use super::patch;
use super::{CellRef, Row, SheetError, TabularSource};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// An .xlsx workbook held in memory.
///
/// The whole archive is loaded at open time; sheet rows are parsed on demand
/// and status writes are kept per sheet part until [`Workbook::save`] patches
/// them into the sheet XML and rewrites the file in place.
pub struct Workbook {
    path: PathBuf,
    zip: ZipArchive<Cursor<Vec<u8>>>,
    /// (sheet name, zip entry name) in workbook order
    sheets: Vec<(String, String)>,
    shared_strings: Vec<String>,
    pending: BTreeMap<String, BTreeMap<CellRef, String>>,
}

impl Workbook {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SheetError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| SheetError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|error| SheetError::NotAWorkbook(path.display().to_string(), error))?;
        let mut workbook = Workbook {
            path: path.to_path_buf(),
            zip,
            sheets: Vec::new(),
            shared_strings: Vec::new(),
            pending: BTreeMap::new(),
        };
        workbook.sheets = workbook.load_sheets()?;
        workbook.shared_strings = workbook.load_shared_strings()?;
        debug!(
            path = %path.display(),
            sheets = workbook.sheets.len(),
            shared_strings = workbook.shared_strings.len(),
            "opened workbook"
        );
        Ok(workbook)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|(name, _)| name.as_str())
    }

    fn sheet_part(&self, sheet: &str) -> Result<&str, SheetError> {
        self.sheets
            .iter()
            .find(|(name, _)| name == sheet)
            .map(|(_, part)| part.as_str())
            .ok_or_else(|| SheetError::SheetNotFound(sheet.to_string()))
    }

    /// Finds an archive entry by name, ignoring case and path separator style.
    fn entry_name(&self, name: &str) -> Option<String> {
        let pattern = name.replace('\\', "/");
        self.zip
            .file_names()
            .find(|file_name| pattern.eq_ignore_ascii_case(file_name))
            .map(str::to_owned)
    }

    fn read_part(&mut self, name: &str) -> Result<Option<String>, SheetError> {
        let Some(entry) = self.entry_name(name) else {
            return Ok(None);
        };
        let mut file = self.zip.by_name(&entry)?;
        let mut xml = String::new();
        file.read_to_string(&mut xml)?;
        Ok(Some(xml))
    }

    fn load_relationships(&mut self) -> Result<HashMap<String, String>, SheetError> {
        let xml = self
            .read_part(WORKBOOK_RELS_PART)?
            .ok_or_else(|| SheetError::MissingPart(WORKBOOK_RELS_PART.to_string()))?;
        let mut reader = xml_reader(&xml);
        let mut relationships = HashMap::new();
        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Start(event) if event.local_name().as_ref() == b"Relationship" => {
                    let kind = attribute(&event, "Type")?;
                    if kind.map(|it| it.ends_with("/worksheet")).unwrap_or(true) {
                        if let (Some(id), Some(target)) =
                            (attribute(&event, "Id")?, attribute(&event, "Target")?)
                        {
                            relationships.insert(id, to_zip_path(&target));
                        }
                    }
                }
                _ => (),
            }
        }
        Ok(relationships)
    }

    fn load_sheets(&mut self) -> Result<Vec<(String, String)>, SheetError> {
        let relationships = self.load_relationships()?;
        let xml = self
            .read_part(WORKBOOK_PART)?
            .ok_or_else(|| SheetError::MissingPart(WORKBOOK_PART.to_string()))?;
        let mut reader = xml_reader(&xml);
        let mut sheets = Vec::new();
        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Start(event) if event.local_name().as_ref() == b"sheet" => {
                    let mut name = None;
                    let mut id = None;
                    for result in event.attributes() {
                        let attribute = result?;
                        match attribute.key.local_name().as_ref() {
                            b"name" => name = Some(attribute.unescape_value()?.into_owned()),
                            b"id" => id = Some(attribute.unescape_value()?.into_owned()),
                            _ => (),
                        }
                    }
                    let part = id
                        .and_then(|id| relationships.get(&id))
                        .and_then(|target| self.entry_name(target));
                    if let (Some(name), Some(part)) = (name, part) {
                        sheets.push((name, part));
                    }
                }
                _ => (),
            }
        }
        Ok(sheets)
    }

    fn load_shared_strings(&mut self) -> Result<Vec<String>, SheetError> {
        let Some(xml) = self.read_part(SHARED_STRINGS_PART)? else {
            return Ok(Vec::new());
        };
        let mut reader = xml_reader(&xml);
        let mut strings = Vec::new();
        let mut text = String::new();
        let mut in_item = false;
        let mut in_text = false;
        let mut in_phonetic = false;
        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Start(event) => match event.local_name().as_ref() {
                    b"si" => {
                        in_item = true;
                        text.clear();
                    }
                    b"rPh" => in_phonetic = true,
                    b"t" if in_item && !in_phonetic => in_text = true,
                    _ => (),
                },
                Event::End(event) => match event.local_name().as_ref() {
                    b"si" => {
                        in_item = false;
                        strings.push(std::mem::take(&mut text));
                    }
                    b"rPh" => in_phonetic = false,
                    b"t" => in_text = false,
                    _ => (),
                },
                Event::Text(event) if in_text => text.push_str(&event.xml_content()?),
                Event::CData(event) if in_text => text.push_str(&event.xml_content()?),
                Event::GeneralRef(event) if in_text => push_entity(&mut text, &event)?,
                _ => (),
            }
        }
        Ok(strings)
    }

    fn read_rows(&self, xml: &str) -> Result<BTreeMap<u32, BTreeMap<u32, String>>, SheetError> {
        let mut reader = xml_reader(xml);
        let mut grid: BTreeMap<u32, BTreeMap<u32, String>> = BTreeMap::new();
        let mut row_number = 0u32;
        let mut next_column = 0u32;
        let mut current: Option<(CellRef, CellKind)> = None;
        let mut value = String::new();
        let mut in_value = false;
        let mut in_inline = false;
        let mut in_text = false;
        let mut in_phonetic = false;
        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Start(event) => match event.local_name().as_ref() {
                    b"row" => {
                        row_number = match attribute(&event, "r")? {
                            Some(r) => r
                                .parse()
                                .map_err(|_| SheetError::InvalidReference(r.clone()))?,
                            None => row_number + 1,
                        };
                        next_column = 0;
                    }
                    b"c" => {
                        let cell = match attribute(&event, "r")? {
                            Some(reference) => reference.parse::<CellRef>()?,
                            None => CellRef::new(row_number, next_column),
                        };
                        next_column = cell.column + 1;
                        let kind = CellKind::from_type(attribute(&event, "t")?.as_deref());
                        current = Some((cell, kind));
                        value.clear();
                    }
                    b"v" if current.is_some() => in_value = true,
                    b"is" if current.is_some() => in_inline = true,
                    b"rPh" => in_phonetic = true,
                    b"t" if in_inline && !in_phonetic => in_text = true,
                    _ => (),
                },
                Event::End(event) => match event.local_name().as_ref() {
                    b"v" => in_value = false,
                    b"is" => in_inline = false,
                    b"rPh" => in_phonetic = false,
                    b"t" => in_text = false,
                    b"c" => {
                        if let Some((cell, kind)) = current.take() {
                            let text = self.cell_text(kind, std::mem::take(&mut value))?;
                            if !text.is_empty() {
                                grid.entry(cell.row).or_default().insert(cell.column, text);
                            }
                        }
                    }
                    _ => (),
                },
                Event::Text(event) if in_value || in_text => value.push_str(&event.xml_content()?),
                Event::CData(event) if in_value || in_text => {
                    value.push_str(&event.xml_content()?)
                }
                Event::GeneralRef(event) if in_value || in_text => push_entity(&mut value, &event)?,
                _ => (),
            }
        }
        Ok(grid)
    }

    fn cell_text(&self, kind: CellKind, raw: String) -> Result<String, SheetError> {
        Ok(match kind {
            CellKind::SharedString => {
                let index = raw
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| SheetError::InvalidReference(raw.clone()))?;
                self.shared_strings
                    .get(index)
                    .cloned()
                    .ok_or(SheetError::SharedStringIndex(index))?
            }
            CellKind::Boolean => match raw.trim() {
                "1" => "TRUE".to_string(),
                "0" => "FALSE".to_string(),
                _ => raw,
            },
            CellKind::Other => raw,
        })
    }
}

impl TabularSource for Workbook {
    /// Rows 1 through the last row holding a value; gaps come back as empty
    /// rows and trailing empty cells are dropped. Unsaved writes are visible.
    fn rows(&mut self, sheet: &str) -> Result<Vec<Row>, SheetError> {
        let part = self.sheet_part(sheet)?.to_string();
        let xml = self
            .read_part(&part)?
            .ok_or_else(|| SheetError::MissingPart(part.clone()))?;
        let mut grid = self.read_rows(&xml)?;
        if let Some(writes) = self.pending.get(&part) {
            for (cell, value) in writes {
                grid.entry(cell.row)
                    .or_default()
                    .insert(cell.column, value.clone());
            }
        }
        let last_row = grid.keys().next_back().copied().unwrap_or(0);
        let rows = (1..=last_row)
            .map(|number| {
                let cells = grid
                    .remove(&number)
                    .map(|cells| {
                        let width = cells.keys().next_back().map_or(0, |c| *c as usize + 1);
                        let mut row = vec![String::new(); width];
                        for (column, value) in cells {
                            row[column as usize] = value;
                        }
                        row
                    })
                    .unwrap_or_default();
                Row::new(number, cells)
            })
            .collect();
        Ok(rows)
    }

    fn set_cell(&mut self, sheet: &str, cell: CellRef, value: &str) -> Result<(), SheetError> {
        let part = self.sheet_part(sheet)?.to_string();
        self.pending
            .entry(part)
            .or_default()
            .insert(cell, value.to_string());
        Ok(())
    }

    /// Patches pending writes into their sheet parts and replaces the file on
    /// disk via a temporary sibling. A no-op when nothing was written.
    fn save(&mut self) -> Result<(), SheetError> {
        if self.pending.is_empty() {
            debug!(path = %self.path.display(), "no pending writes, workbook left untouched");
            return Ok(());
        }

        let mut patched: HashMap<String, Vec<u8>> = HashMap::new();
        for (part, writes) in &self.pending {
            let mut file = self.zip.by_name(part)?;
            let mut xml = String::new();
            file.read_to_string(&mut xml)?;
            patched.insert(part.clone(), patch::apply(&xml, writes)?.into_bytes());
        }

        let mut out = ZipWriter::new(Cursor::new(Vec::new()));
        for index in 0..self.zip.len() {
            let mut file = self.zip.by_index(index)?;
            let name = file.name().to_string();
            let mut options = SimpleFileOptions::default().compression_method(file.compression());
            if let Some(time) = file.last_modified() {
                options = options.last_modified_time(time);
            }
            if file.is_dir() {
                out.add_directory(name, options)?;
                continue;
            }
            let data = match patched.remove(&name) {
                Some(data) => data,
                None => {
                    let mut data = Vec::new();
                    file.read_to_end(&mut data)?;
                    data
                }
            };
            out.start_file(name, options)?;
            out.write_all(&data)?;
        }
        let bytes = out.finish()?.into_inner();

        let save_error = |source| SheetError::Save {
            path: self.path.display().to_string(),
            source,
        };
        let tmp_path = self.path.with_extension("xlsx.tmp");
        fs::write(&tmp_path, &bytes).map_err(save_error)?;
        if fs::rename(&tmp_path, &self.path).is_err() {
            // rename() does not replace an existing file on every platform
            fs::remove_file(&self.path).map_err(save_error)?;
            fs::rename(&tmp_path, &self.path).map_err(save_error)?;
        }

        let writes: usize = self.pending.values().map(BTreeMap::len).sum();
        debug!(path = %self.path.display(), writes, "saved workbook");
        self.zip = ZipArchive::new(Cursor::new(bytes))?;
        self.pending.clear();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    SharedString,
    Boolean,
    Other,
}

impl CellKind {
    fn from_type(t: Option<&str>) -> Self {
        match t {
            Some("s") => CellKind::SharedString,
            Some("b") => CellKind::Boolean,
            _ => CellKind::Other,
        }
    }
}

fn xml_reader(xml: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(xml);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.expand_empty_elements = true;
    config.trim_text(false);
    reader
}

fn attribute(event: &BytesStart<'_>, name: &str) -> Result<Option<String>, SheetError> {
    match event.try_get_attribute(name)? {
        Some(attribute) => Ok(Some(attribute.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

fn push_entity(text: &mut String, bytes: &BytesRef<'_>) -> Result<(), SheetError> {
    let raw = bytes.xml_content()?;
    if let Some(number) = raw.strip_prefix('#') {
        let code = match number.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => number.parse::<u32>(),
        }
        .map_err(|_| SheetError::XmlEntity(raw.to_string()))?;
        if let Some(character) = char::from_u32(code) {
            text.push(character);
        }
    } else if let Some(entity) = resolve_xml_entity(&raw) {
        text.push_str(entity);
    } else {
        return Err(SheetError::XmlEntity(raw.to_string()));
    }
    Ok(())
}

/// Normalizes a relationship target to a path inside the archive.
fn to_zip_path(target: &str) -> String {
    if let Some(stripped) = target.strip_prefix('/') {
        stripped.to_string()
    } else if target.starts_with("xl/") {
        target.to_string()
    } else {
        format!("xl/{target}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_targets_resolve_inside_xl() {
        assert_eq!(to_zip_path("worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(to_zip_path("/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(to_zip_path("xl/worksheets/sheet3.xml"), "xl/worksheets/sheet3.xml");
    }

    #[test]
    fn entities_and_character_references_are_expanded() {
        let mut reader = xml_reader("<t>A&amp;B &#x41;&#66;</t>");
        let mut text = String::new();
        loop {
            match reader.read_event().unwrap() {
                Event::Eof => break,
                Event::Text(event) => text.push_str(&event.xml_content().unwrap()),
                Event::GeneralRef(event) => push_entity(&mut text, &event).unwrap(),
                _ => (),
            }
        }
        assert_eq!(text, "A&B AB");
    }

    #[test]
    fn boolean_cells_read_as_words() {
        assert_eq!(CellKind::from_type(Some("b")), CellKind::Boolean);
        assert_eq!(CellKind::from_type(Some("s")), CellKind::SharedString);
        assert_eq!(CellKind::from_type(Some("inlineStr")), CellKind::Other);
        assert_eq!(CellKind::from_type(None), CellKind::Other);
    }
}
