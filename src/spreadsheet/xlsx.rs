use crate::error::SheetPushError;
use crate::helpers::xml::XmlAttributeHelper;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::xml::XmlReader;
use crate::helpers::xml::XmlTextContextHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::excel;
use crate::spreadsheet::excel::load_relationships;
use crate::spreadsheet::excel::Package;
use crate::spreadsheet::reference::check_position;
use crate::spreadsheet::reference::reference_to_index;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use quick_xml::name::QName;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::BufRead;

// XML tag names for parsing Excel XLSX format
const TAG_CUSTOM_FORMATS: QName = QName(b"numFmts"); // Custom number formats container
const TAG_CUSTOM_FORMAT: QName = QName(b"numFmt");   // Individual custom number format
const TAG_FORMAT_INDEXES: QName = QName(b"cellXfs");  // Cell format indexes container
const TAG_FORMAT_INDEX: QName = QName(b"xf");         // Individual cell format index
const TAG_SHARED_STRING_ITEM: QName = QName(b"si");   // Shared string table item
const TAG_PHONETIC_TEXT: QName = QName(b"rPh");       // Phonetic text for Asian languages
const TAG_TEXT: QName = QName(b"t");                  // Text content within strings
const TAG_WORKBOOK_PROPERTIES: QName = QName(b"workbookPr");
const TAG_SHEET: QName = QName(b"sheet");
const TAG_ROW: QName = QName(b"row");
const TAG_CELL: QName = QName(b"c");
const TAG_INLINE_STRING: QName = QName(b"is");
const TAG_VALUE: QName = QName(b"v");

/// An Excel 2007+ workbook (`.xlsx`, `.xlsm`) held in memory
pub(crate) struct XlsxSpreadsheet<'a> {
    name: String,
    zip: Package<'a>,
    /// Cell type per style index
    number_formats: Vec<CellType>,
    /// Worksheets as `(name, part path)`
    sheets: Vec<(String, String)>,
    shared_strings: Option<Vec<String>>,
}

impl<'a> XlsxSpreadsheet<'a> {
    pub(crate) fn open(file_name: &str, bytes: &'a [u8]) -> Result<XlsxSpreadsheet<'a>, SheetPushError> {
        let (zip, number_formats, sheets) = excel::open(file_name, bytes, load_workbook, load_number_formats)?;
        Ok(XlsxSpreadsheet {
            name: file_name.to_owned(),
            zip,
            number_formats,
            sheets,
            shared_strings: None,
        })
    }

    /// Reads `xl/sharedStrings.xml` once; workbooks without one have no shared strings.
    fn load_shared_strings(&mut self) -> Result<(), SheetPushError> {
        if self.shared_strings.is_some() {
            return Ok(());
        }
        let mut shared_strings = Vec::<String>::new();
        if let Some(mut reader) = self.zip.xml_reader("xl/sharedStrings.xml")? {
            match_xml_events!(reader => {
                Event::Start(event) if event.name() == TAG_SHARED_STRING_ITEM => {
                    shared_strings.push(read_string_value(&mut reader, TAG_SHARED_STRING_ITEM, false)?);
                }
            });
        }
        self.shared_strings = Some(shared_strings);
        Ok(())
    }
}

impl Spreadsheet for XlsxSpreadsheet<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.to_owned()).collect()
    }

    fn shared_strings(&self) -> &[String] {
        self.shared_strings.as_deref().unwrap_or_default()
    }

    /// Parses one worksheet part. Cells without a reference take the next position
    /// in document order. A malformed reference or a position past the grid fails the tab.
    fn read_sheet(&mut self, index: usize) -> Result<Sheet, SheetPushError> {
        self.load_shared_strings()?;
        let (_, zip_path) = self
            .sheets
            .get(index)
            .cloned()
            .ok_or_else(|| SpreadsheetError::FileError(format!("sheet #{index}")))?;
        let mut reader = self.zip.xml_reader(&zip_path)?
            .ok_or_else(|| SpreadsheetError::FileError(zip_path.to_owned()))?;

        let mut sheet = Sheet::new();
        let mut row_count = 0usize;
        let mut col_count = 0usize;
        let mut row = 0usize;
        let mut col = 0usize;
        let mut kind = CellType::default();
        let mut value = String::new();
        match_xml_events!(reader => {
            Event::Start(event) if event.name() == TAG_ROW => {
                if let Some(number) = event.parse_attribute_value::<usize>("r")? {
                    (row_count, _) = check_position(number.saturating_sub(1), 0)?;
                }
                col_count = 0;
            }
            Event::End(event) if event.name() == TAG_ROW => {
                row_count = row_count.saturating_add(1);
            }
            Event::Start(event) if event.name() == TAG_CELL => {
                (row, col) = match event.get_attribute_value("r")? {
                    Some(reference) => reference_to_index(&reference)
                        .ok_or_else(|| SpreadsheetError::InvalidReference(reference.to_string()))?,
                    None => check_position(row_count, col_count)?,
                };
                col_count = col + 1;
                value.clear();
                kind = event.get_attribute_value("t")?.map(|t| {
                    match t.as_ref() {
                        "inlineStr" | "str" => CellType::InlineString,
                        "s" => CellType::SharedString,
                        "d" => CellType::IsoDateTime,
                        "b" => CellType::Boolean,
                        "e" => CellType::Error,
                        _ => CellType::Number,
                    }
                }).unwrap_or(CellType::Number);
                if kind == CellType::Number {
                    if let Some(format_id) = event.parse_attribute_value::<usize>("s")? {
                        kind = self.number_formats.get(format_id).copied().unwrap_or(CellType::Number);
                    }
                }
            }
            Event::Start(event) if event.name() == TAG_INLINE_STRING => {
                value = read_string_value(&mut reader, TAG_INLINE_STRING, false)?;
            }
            Event::Start(event) if event.name() == TAG_VALUE => {
                value = read_string_value(&mut reader, TAG_VALUE, true)?;
            }
            Event::End(event) if !value.is_empty() && event.name() == TAG_CELL => {
                sheet.push(Cell {
                    row,
                    col,
                    kind,
                    value: std::mem::take(&mut value),
                });
            }
        });
        Ok(sheet)
    }
}

/// Loads the worksheet list (`(name, part path)` in workbook order) and the date system.
fn load_workbook(zip: &mut Package<'_>) -> Result<(Vec<(String, String)>, bool), SheetPushError> {
    let relationships = load_relationships(zip, "xl/_rels/workbook.xml.rels")?;
    let mut reader = zip.xml_reader("xl/workbook.xml")?
        .ok_or_else(|| SpreadsheetError::FileError("xl/workbook.xml".to_string()))?;
    let mut sheets: Vec<(String, String)> = Vec::new();
    let mut is_1904 = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHEET => {
            let mut name = None::<Cow<str>>;
            let mut id = None::<Cow<str>>;
            for result in event.attributes() {
                let attribute = result?;
                let key = attribute.key.local_name();
                if key.as_ref() == b"name" {
                    name = Some(attribute.get_value()?);
                } else if key.as_ref() == b"id" {
                    id = Some(attribute.get_value()?);
                }
            }
            if let Some((name, id)) = name.zip(id) {
                if let Some(path) = relationships.get(id.as_ref()) {
                    sheets.push((name.to_string(), path.to_owned()));
                }
            }
        }
        Event::Start(event) if event.name() == TAG_WORKBOOK_PROPERTIES => {
            is_1904 = event.get_attribute_value("date1904")?
                .map(|value| value.eq("1") || value.eq("true"))
                .unwrap_or(false);
        }
    });
    Ok((sheets, is_1904))
}

/// Loads custom number formats and the `cellXfs` style list from `xl/styles.xml`.
fn load_number_formats(zip: &mut Package<'_>, is_1904: bool) -> Result<Vec<CellType>, SheetPushError> {
    let mut reader = match zip.xml_reader("xl/styles.xml")? {
        Some(reader) => reader,
        None => return Ok(Vec::new()),
    };

    let mut custom_formats_context = false;
    let mut custom_formats = HashMap::<String, CellType>::new();
    let mut format_indexes_context = false;
    let mut format_indexes = Vec::<String>::new();

    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_CUSTOM_FORMATS => custom_formats_context = true,
        Event::End(event) if event.name() == TAG_CUSTOM_FORMATS => custom_formats_context = false,
        Event::Start(event) if custom_formats_context && event.name() == TAG_CUSTOM_FORMAT => {
            let id = event.get_attribute_value("numFmtId")?;
            let format = event.get_attribute_value("formatCode")?;
            if let Some((id, format)) = id.zip(format) {
                custom_formats.insert(id.to_string(), CellType::parse_custom_number_format(&format, is_1904));
            }
        }
        Event::Start(event) if event.name() == TAG_FORMAT_INDEXES => format_indexes_context = true,
        Event::End(event) if event.name() == TAG_FORMAT_INDEXES => {
            // cellXfs follows numFmts, nothing else is needed
            break;
        }
        Event::Start(event) if format_indexes_context && event.name() == TAG_FORMAT_INDEX => {
            let id = event.get_attribute_value("numFmtId")?.unwrap_or(Cow::Borrowed("0"));
            format_indexes.push(id.to_string());
        }
    });

    Ok(excel::load_number_formats(format_indexes, custom_formats, is_1904))
}

/// Reads the text of a string element up to `end_tag`, skipping phonetic runs.
/// With `is_text_content` the element's own text counts (`<v>`); otherwise only `<t>` children do.
fn read_string_value<R: BufRead>(
    reader: &mut XmlReader<R>,
    end_tag: QName,
    is_text_content: bool,
) -> Result<String, SheetPushError> {
    let mut is_phonetic_text = false;
    let mut is_text = is_text_content;
    let mut text = String::new();
    match_xml_events!(reader => {
        Event::End(event) if event.name() == end_tag => break,
        Event::Start(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = true,
        Event::End(event) if event.name() == TAG_PHONETIC_TEXT => is_phonetic_text = false,
        Event::Start(event) if !is_phonetic_text && event.name() == TAG_TEXT => is_text = true,
        Event::End(event) if is_text && event.name() == TAG_TEXT => is_text = false,
        Event::Text(event) if is_text => text.push_str(&event.xml_content()?),
        Event::CData(event) if is_text => text.push_str(&event.xml_content()?),
        Event::GeneralRef(event) if is_text => text.push_bytes_ref(&event)?,
    });
    Ok(text)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::spreadsheet::read_workbook;
    use crate::spreadsheet::criteria::Criteria;
    use crate::table::Value;
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Builds a minimal workbook; every sheet is `(name, <sheetData> content)`.
    pub(crate) fn workbook(sheets: &[(&str, &str)], shared_strings: &[&str], styles: Option<&str>) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let mut workbook = String::from(r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#);
        let mut relationships = String::from("<Relationships>");
        for (index, (name, data)) in sheets.iter().enumerate() {
            let id = index + 1;
            workbook.push_str(&format!(r#"<sheet name="{name}" sheetId="{id}" r:id="rId{id}"/>"#));
            relationships.push_str(&format!(
                r#"<Relationship Id="rId{id}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{id}.xml"/>"#
            ));
            writer.start_file(format!("xl/worksheets/sheet{id}.xml"), options).unwrap();
            writer.write_all(format!("<worksheet><sheetData>{data}</sheetData></worksheet>").as_bytes()).unwrap();
        }
        workbook.push_str("</sheets></workbook>");
        relationships.push_str("</Relationships>");
        writer.start_file("xl/workbook.xml", options).unwrap();
        writer.write_all(workbook.as_bytes()).unwrap();
        writer.start_file("xl/_rels/workbook.xml.rels", options).unwrap();
        writer.write_all(relationships.as_bytes()).unwrap();
        if !shared_strings.is_empty() {
            let items: String = shared_strings.iter().map(|text| format!("<si><t>{text}</t></si>")).collect();
            writer.start_file("xl/sharedStrings.xml", options).unwrap();
            writer.write_all(format!("<sst>{items}</sst>").as_bytes()).unwrap();
        }
        if let Some(styles) = styles {
            writer.start_file("xl/styles.xml", options).unwrap();
            writer.write_all(styles.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn reads_typed_cells() {
        let styles = r#"<styleSheet><numFmts count="1"><numFmt numFmtId="164" formatCode="yyyy-mm-dd"/></numFmts>
            <cellXfs count="2"><xf numFmtId="0"/><xf numFmtId="164"/></cellXfs></styleSheet>"#;
        let data = r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="inlineStr"><is><t>ok</t></is></c></row>
            <row r="2"><c r="A2"><v>42</v></c><c r="B2" s="1"><v>45000</v></c><c r="C2" t="b"><v>1</v></c></row>
            <row r="3"><c r="A3" t="e"><v>#N/A</v></c><c r="C3" t="str"><v>a &amp; b</v></c></row>"#;
        let bytes = workbook(&[("Data", data)], &["id", "when"], Some(styles));
        let mut spreadsheet = XlsxSpreadsheet::open("book.xlsx", &bytes).unwrap();
        assert_eq!(spreadsheet.sheet_names(), vec!["Data"]);

        let sheet = spreadsheet.read_sheet(0).unwrap();
        let table = sheet.into_table("Data", spreadsheet.shared_strings()).unwrap().unwrap();
        assert_eq!(table.columns, vec!["id", "when", "ok"]);
        assert_eq!(table.rows[0][0], Value::Number(42.0));
        assert_eq!(table.rows[0][1].to_string(), "2023-03-15");
        assert_eq!(table.rows[0][2], Value::Bool(true));
        assert_eq!(table.rows[1][0], Value::from("#N/A"));
        assert_eq!(table.rows[1][1], Value::Null);
        assert_eq!(table.rows[1][2], Value::from("a & b"));
    }

    #[test]
    fn cells_without_references_follow_document_order() {
        let data = r#"<row><c t="inlineStr"><is><t>a</t></is></c><c t="inlineStr"><is><t>b</t></is></c></row><row><c><v>1</v></c><c><v>2</v></c></row>"#;
        let bytes = workbook(&[("S", data)], &[], None);
        let mut spreadsheet = XlsxSpreadsheet::open("book.xlsx", &bytes).unwrap();
        let table = spreadsheet.read_sheet(0).unwrap().into_table("S", &[]).unwrap().unwrap();
        assert_eq!(table.columns, vec!["a", "b"]);
        assert_eq!(table.rows, vec![vec![Value::Number(1.0), Value::Number(2.0)]]);
    }

    #[test]
    fn skips_empty_tabs_and_reads_the_rest() {
        let data = r#"<row r="1"><c r="A1" t="inlineStr"><is><t>x</t></is></c></row><row r="2"><c r="A2"><v>1</v></c></row>"#;
        let bytes = workbook(&[("Empty", ""), ("Full", data)], &[], None);
        let mut spreadsheet = XlsxSpreadsheet::open("book.xlsx", &bytes).unwrap();
        let workbook = read_workbook(&mut spreadsheet, &Criteria::default()).unwrap();
        assert_eq!(workbook.tables.len(), 1);
        assert_eq!(workbook.tables[0].name, "Full");
        assert_eq!(workbook.warnings.len(), 1);
    }

    #[test]
    fn references_past_the_grid_fail_the_tab() {
        for data in [
            r#"<row r="1"><c r="ZZZZZZZZZZZZZZZ1"><v>1</v></c></row>"#,
            r#"<row r="1"><c r="A99999999999999999"><v>1</v></c></row>"#,
            r#"<row r="1"><c r="XFE1"><v>1</v></c></row>"#,
            r#"<row r="1"><c r="1A"><v>1</v></c></row>"#,
        ] {
            let bytes = workbook(&[("S", data)], &[], None);
            let mut spreadsheet = XlsxSpreadsheet::open("book.xlsx", &bytes).unwrap();
            assert!(
                matches!(
                    spreadsheet.read_sheet(0),
                    Err(SheetPushError::SpreadsheetError(SpreadsheetError::InvalidReference(_)))
                ),
                "{data}"
            );
        }
    }

    #[test]
    fn document_order_stops_at_the_last_row_and_column() {
        let last_row = r#"<row r="1048576"><c><v>1</v></c></row><row><c><v>2</v></c></row>"#;
        let past_last_row = r#"<row r="1048577"><c><v>1</v></c></row>"#;
        let last_col = r#"<row r="1"><c r="XFD1"><v>1</v></c><c><v>2</v></c></row>"#;
        for data in [last_row, past_last_row, last_col] {
            let bytes = workbook(&[("S", data)], &[], None);
            let mut spreadsheet = XlsxSpreadsheet::open("book.xlsx", &bytes).unwrap();
            assert!(
                matches!(
                    spreadsheet.read_sheet(0),
                    Err(SheetPushError::SpreadsheetError(SpreadsheetError::CellOutOfRange(_)))
                ),
                "{data}"
            );
        }
    }

    #[test]
    fn tab_with_a_bad_reference_is_skipped_with_a_warning() {
        let good = r#"<row r="1"><c r="A1" t="inlineStr"><is><t>x</t></is></c></row><row r="2"><c r="A2"><v>1</v></c></row>"#;
        let bad = r#"<row r="1"><c r="ZZZZZZZZZZZZZZZ1"><v>1</v></c></row>"#;
        let bytes = workbook(&[("Bad", bad), ("Good", good)], &[], None);
        let mut spreadsheet = XlsxSpreadsheet::open("book.xlsx", &bytes).unwrap();
        let workbook = read_workbook(&mut spreadsheet, &Criteria::default()).unwrap();
        assert_eq!(workbook.tables.len(), 1);
        assert_eq!(workbook.tables[0].name, "Good");
        assert_eq!(workbook.warnings.len(), 1);
        assert!(workbook.warnings[0].starts_with("Tab 'Bad' could not be read"), "{:?}", workbook.warnings);
        assert!(workbook.warnings[0].contains("ZZZZZZZZZZZZZZZ1"));
    }

    #[test]
    fn rejects_workbook_without_sheets() {
        let bytes = workbook(&[], &[], None);
        assert!(matches!(
            XlsxSpreadsheet::open("book.xlsx", &bytes),
            Err(SheetPushError::SpreadsheetError(SpreadsheetError::Empty(_)))
        ));
    }
}
