use crate::error::ResultOptionChain;
use crate::error::SheetPushError;
use crate::helpers::biff8::Biff8Reader;
use crate::helpers::cfb::Cfb;
use crate::match_biff8_record;
use crate::spreadsheet::cell::to_error_value;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::excel::load_number_formats;
use crate::spreadsheet::reference::check_position;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use either::Either;
use std::collections::HashMap;
use thiserror::Error;

// BIFF8 record type identifiers
const FORMULA: u16 = 6;        // Formula record with its cached result
const EOF: u16 = 10;           // End of a substream
const DATE1904: u16 = 34;      // Date system flag (1904 vs 1900 base)
const FILE_PASS: u16 = 47;     // Workbook encryption
const CODE_PAGE: u16 = 66;     // Encoding of 8-bit strings
const BOUND_SHEET8: u16 = 133; // Sheet name, type and substream position
const MUL_RK: u16 = 189;       // Several RK numbers in one row
const XF: u16 = 224;           // Extended format (style) record
const SST: u16 = 252;          // Shared string table
const LABEL_SST: u16 = 253;    // Cell referencing the shared string table
const NUMBER: u16 = 515;       // Floating point cell
const LABEL: u16 = 516;        // Inline string cell
const BOOL_ERR: u16 = 517;     // Boolean or error cell
const STRING: u16 = 519;       // String result of the preceding formula
const RK: u16 = 638;           // Compressed number cell
const FORMAT: u16 = 1054;      // Custom number format
const BOF: u16 = 2057;         // Start of a substream

/// BOUNDSHEET8 sheet type of a plain worksheet (charts and macro sheets are skipped)
const WORKSHEET: u8 = 0;

/// Error types specific to XLS file parsing
#[derive(Error, Debug)]
pub enum XlsError {
    #[error("Invalid Code page '{0}'")]
    CodePageError(u16),

    #[error("Invalid Formula value '{0}'")]
    FormulaValueError(u64),
}

/// An Excel 97-2003 workbook with its global records already parsed
pub(crate) struct XlsSpreadsheet {
    name: String,
    reader: Biff8Reader,
    shared_strings: Vec<String>,
    number_formats: Vec<CellType>,
    /// Worksheets with the stream offset of their BOF record
    sheets: Vec<(String, usize)>,
}

impl XlsSpreadsheet {
    /// Parses the compound file and the workbook globals substream.
    pub(crate) fn open(file_name: &str, bytes: &[u8]) -> Result<XlsSpreadsheet, SheetPushError> {
        let cfb = Cfb::parse(bytes)?;
        if cfb.exists("EncryptedPackage") {
            Err(SpreadsheetError::PasswordProtected(file_name.to_owned()))?;
        }
        let mut reader = cfb.read("Workbook")
            .ok_none_else(|| cfb.read("Book"))?
            .map(Biff8Reader::new)
            .ok_or_else(|| SpreadsheetError::Empty(file_name.to_owned()))?;
        let mut is_1904 = false;
        let mut shared_strings = Vec::new();
        let mut custom_formats: HashMap<String, CellType> = HashMap::new();
        let mut format_indexes: Vec<String> = Vec::new();
        let mut sheets: Vec<(String, usize)> = Vec::new();
        match_biff8_record!(reader => {
            EOF => break,
            FILE_PASS => Err(SpreadsheetError::PasswordProtected(file_name.to_owned()))?,
            DATE1904 if reader.read_u16()? == 1 => is_1904 = true,
            CODE_PAGE => {
                let code_page = reader.read_u16()?;
                reader.encoding = codepage::to_encoding(code_page).ok_or(XlsError::CodePageError(code_page))?;
            }
            FORMAT => {
                let id = reader.read_u16()?;
                let format = reader.read_string()?;
                custom_formats.insert(id.to_string(), CellType::parse_custom_number_format(&format, is_1904));
            }
            XF => {
                reader.skip(2)?;
                format_indexes.push(reader.read_u16()?.to_string());
            }
            SST => shared_strings = load_shared_strings(&mut reader)?,
            BOUND_SHEET8 => {
                let position = reader.read_u32()? as usize;
                let _visibility = reader.read_u8()?;
                let sheet_type = reader.read_u8()?;
                let sheet_name = reader.read_short_string()?;
                if sheet_type == WORKSHEET {
                    sheets.push((sheet_name, position));
                }
            }
        });
        if sheets.is_empty() {
            Err(SpreadsheetError::Empty(file_name.to_owned()))?
        }

        Ok(XlsSpreadsheet {
            name: file_name.to_owned(),
            reader,
            shared_strings,
            number_formats: load_number_formats(format_indexes, custom_formats, is_1904),
            sheets,
        })
    }

    fn format_kind(&self, index: usize) -> CellType {
        self.number_formats.get(index).copied().unwrap_or(CellType::Number)
    }
}

impl Spreadsheet for XlsSpreadsheet {
    fn name(&self) -> &str {
        &self.name
    }

    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.to_owned()).collect()
    }

    fn shared_strings(&self) -> &[String] {
        &self.shared_strings
    }

    /// Walks the cell records of one worksheet substream.
    fn read_sheet(&mut self, index: usize) -> Result<Sheet, SheetPushError> {
        let (sheet_name, position) = self
            .sheets
            .get(index)
            .cloned()
            .ok_or_else(|| SpreadsheetError::FileError(format!("sheet #{index}")))?;
        self.reader.seek(position);
        if self.reader.next()? != Some(BOF) {
            Err(SpreadsheetError::FileError(sheet_name.to_owned()))?;
        }
        let mut sheet = Sheet::new();
        while let Some(tag) = self.reader.next()? {
            match tag {
                BOF | EOF => break,
                MUL_RK => {
                    let row = self.reader.read_u16()? as usize;
                    let col_lower_bound = self.reader.read_u16()? as usize;
                    let col_upper_bound = self.reader.last_u16()? as usize;
                    for col in col_lower_bound..=col_upper_bound {
                        let (row, col) = check_position(row, col)?;
                        let index = self.reader.read_u16()? as usize;
                        let value = self.reader.read_rk()?;
                        let kind = self.format_kind(index);
                        sheet.push(Cell {
                            row,
                            col,
                            kind,
                            value: value.to_string(),
                        });
                    }
                }
                BOOL_ERR | NUMBER | RK | LABEL_SST | LABEL | FORMULA => {
                    let row = self.reader.read_u16()? as usize;
                    let col = self.reader.read_u16()? as usize;
                    let (row, col) = check_position(row, col)?;
                    let (either, value) = match tag {
                        BOOL_ERR => read_bool_or_error_cell(&mut self.reader)?,
                        NUMBER => read_number_cell(&mut self.reader)?,
                        RK => read_rk_cell(&mut self.reader)?,
                        LABEL_SST => read_label_sst_cell(&mut self.reader)?,
                        LABEL => read_label_cell(&mut self.reader)?,
                        _ => read_formula_cell(&mut self.reader)?,
                    };
                    let kind = match either {
                        Either::Left(kind) => kind,
                        Either::Right(index) => self.format_kind(index),
                    };
                    if !value.is_empty() {
                        sheet.push(Cell { row, col, kind, value });
                    }
                }
                _ => (),
            }
        }
        Ok(sheet)
    }
}

/// Reads the SST record: total and unique counts, then the unique strings.
fn load_shared_strings(reader: &mut Biff8Reader) -> Result<Vec<String>, SheetPushError> {
    reader.skip(4)?;
    let count = reader.read_u32()? as usize;
    let mut shared_strings: Vec<String> = Vec::with_capacity(count.min(65_536));
    for _ in 0..count {
        shared_strings.push(reader.read_rich_string()?);
    }
    Ok(shared_strings)
}

fn read_bool_or_error_cell(reader: &mut Biff8Reader) -> Result<(Either<CellType, usize>, String), SheetPushError> {
    reader.skip(2)?;
    let value = reader.read_u8()?;
    let flag = reader.read_u8()?;
    if flag == 0 {
        Ok((Either::Left(CellType::Boolean), value.to_string()))
    } else {
        Ok((Either::Left(CellType::Error), to_error_value(value).to_owned()))
    }
}

fn read_number_cell(reader: &mut Biff8Reader) -> Result<(Either<CellType, usize>, String), SheetPushError> {
    let index = reader.read_u16()? as usize;
    let value = reader.read_f64()?;
    Ok((Either::Right(index), value.to_string()))
}

fn read_rk_cell(reader: &mut Biff8Reader) -> Result<(Either<CellType, usize>, String), SheetPushError> {
    let index = reader.read_u16()? as usize;
    let value = reader.read_rk()?;
    Ok((Either::Right(index), value.to_string()))
}

fn read_label_sst_cell(reader: &mut Biff8Reader) -> Result<(Either<CellType, usize>, String), SheetPushError> {
    reader.skip(2)?;
    let value = reader.read_u32()?;
    Ok((Either::Left(CellType::SharedString), value.to_string()))
}

fn read_label_cell(reader: &mut Biff8Reader) -> Result<(Either<CellType, usize>, String), SheetPushError> {
    reader.skip(2)?;
    let value = reader.read_string()?;
    Ok((Either::Left(CellType::InlineString), value))
}

/// Reads the cached result of a formula: a number, or a flag byte for strings
/// (held in the following STRING record), booleans, errors and empty strings.
fn read_formula_cell(reader: &mut Biff8Reader) -> Result<(Either<CellType, usize>, String), SheetPushError> {
    let index = reader.read_u16()? as usize;
    let formula = reader.read_u64()?;
    let is_number = (formula & 0xFFFF000000000000) != 0xFFFF000000000000;
    let flag = formula & 0xFF;
    if is_number {
        Ok((Either::Right(index), f64::from_bits(formula).to_string()))
    } else if flag == 0 {
        match reader.next()? {
            Some(STRING) => Ok((Either::Left(CellType::InlineString), reader.read_string()?)),
            _ => Err(XlsError::FormulaValueError(formula))?,
        }
    } else if flag == 1 {
        let value = if (formula & 0xFF0000) > 0 { "1" } else { "0" };
        Ok((Either::Left(CellType::Boolean), value.to_owned()))
    } else if flag == 2 {
        let code = ((formula >> 16) & 0xFF) as u8;
        Ok((Either::Left(CellType::Error), to_error_value(code).to_owned()))
    } else if flag == 3 {
        Ok((Either::Left(CellType::InlineString), String::new()))
    } else {
        Err(XlsError::FormulaValueError(formula))?
    }
}
