//! Helpers shared by the Office Open XML and BIFF8 workbook readers.
use crate::error::SheetPushError;
use crate::helpers::cfb::Cfb;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Cursor;
use zip::ZipArchive;

/// XML tag name for relationship elements in Excel files
const TAG_RELATIONSHIP: &[u8] = b"Relationship";

/// An `.xlsx` package read straight from the uploaded bytes
pub(crate) type Package<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// Opens an Excel package and loads the workbook parts every worksheet depends on.
///
/// Returns the archive, the cell type of every style index and the `(name, part path)`
/// list of worksheets.
pub(super) fn open<'a, W, F>(
    file_name: &str,
    bytes: &'a [u8],
    load_workbook: W,
    load_number_formats: F,
) -> Result<(Package<'a>, Vec<CellType>, Vec<(String, String)>), SheetPushError>
where
    W: Fn(&mut Package<'a>) -> Result<(Vec<(String, String)>, bool), SheetPushError>,
    F: Fn(&mut Package<'a>, bool) -> Result<Vec<CellType>, SheetPushError>,
{
    if is_password_protected(bytes) {
        Err(SpreadsheetError::PasswordProtected(file_name.to_owned()))?;
    }

    let mut zip = ZipArchive::new(Cursor::new(bytes))?;
    let (sheets, is_1904) = load_workbook(&mut zip)?;
    if sheets.is_empty() {
        Err(SpreadsheetError::Empty(file_name.to_owned()))?
    }

    let number_formats = load_number_formats(&mut zip, is_1904)?;
    Ok((zip, number_formats, sheets))
}

/// Loads worksheet relationships: relationship id to part path.
pub(super) fn load_relationships(zip: &mut Package<'_>, path: &str) -> Result<HashMap<String, String>, SheetPushError> {
    let mut reader = zip.xml_reader(path)?
        .ok_or_else(|| SpreadsheetError::FileError(path.to_string()))?;
    let mut relationships: HashMap<String, String> = HashMap::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_RELATIONSHIP => {
            let id = event.get_attribute_value("Id")?;
            let kind = event.get_attribute_value("Type")?;
            let target = event.get_attribute_value("Target")?;
            // Only process worksheet relationships
            if kind.map(|it| it.ends_with("/worksheet")).unwrap_or(true) {
                if let Some((id, target)) = id.zip(target) {
                    relationships.insert(id.to_string(), to_zip_path(target));
                }
            }
        }
    });
    Ok(relationships)
}

/// Resolves the number format of every style index to a cell type,
/// custom formats first, then the built-in date and time ids.
pub(super) fn load_number_formats(format_indexes: Vec<String>, custom_formats: HashMap<String, CellType>, is_1904: bool) -> Vec<CellType> {
    format_indexes
        .iter()
        .map(|id| {
            custom_formats
                .get(id)
                .copied()
                .or_else(|| CellType::parse_builtin_number_format_id(id, is_1904))
                .unwrap_or(CellType::Number)
        })
        .collect()
}

/// Normalizes a relationship target to a path inside the package.
pub(crate) fn to_zip_path(path: Cow<'_, str>) -> String {
    if let Some(stripped) = path.strip_prefix('/') {
        stripped.to_string()
    } else if path.starts_with("xl/") {
        path.to_string()
    } else {
        format!("xl/{path}")
    }
}

/// Encrypted packages are compound files holding an `EncryptedPackage` stream
/// instead of a zip archive.
pub(crate) fn is_password_protected(bytes: &[u8]) -> bool {
    Cfb::parse(bytes)
        .map(|cfb| cfb.exists("EncryptedPackage"))
        .unwrap_or(false)
}
