use crate::error::SheetPushError;
use crate::spreadsheet::FileFormat;
use crate::validation;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;
use url::Url;

/// An input file loaded fully into memory after its size and extension were checked.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Location as given by the caller (path or URL)
    pub location: String,
    /// File name without directories or query string
    pub file_name: String,
    pub format: FileFormat,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    /// Loads a local path or an `http(s)` URL.
    pub fn open(location: &str) -> Result<SourceFile, SheetPushError> {
        if is_remote_url(location) {
            Self::download(location)
        } else {
            let path = Path::new(location);
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| location.to_owned());
            let metadata = std::fs::metadata(path)?;
            validation::validate_file(&file_name, metadata.len())?;
            // A file growing after `metadata` is still rejected by the capped read
            let bytes = read_capped(File::open(path)?, validation::MAX_FILE_BYTES)?;
            Self::from_bytes(location, &file_name, bytes)
        }
    }

    /// Wraps bytes received from elsewhere, applying the same checks as `open`.
    pub fn from_bytes(location: &str, file_name: &str, bytes: Vec<u8>) -> Result<SourceFile, SheetPushError> {
        let format = validation::validate_file(file_name, bytes.len() as u64)?;
        debug!(file = file_name, size = bytes.len(), ?format, "Loaded source file");
        Ok(SourceFile {
            location: location.to_owned(),
            file_name: file_name.to_owned(),
            format,
            bytes,
        })
    }

    /// File name without its extension, the default base for spreadsheet and table names
    pub fn stem(&self) -> &str {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.file_name)
    }

    fn download(location: &str) -> Result<SourceFile, SheetPushError> {
        let url = Url::parse(location).map_err(|e| SheetPushError::Validation(format!("invalid URL '{location}': {e}")))?;
        let file_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .unwrap_or(location)
            .to_owned();
        let response = reqwest::blocking::get(url)
            .and_then(|response| response.error_for_status())
            .map_err(|e| SheetPushError::UnreadableFile(location.to_owned(), e.to_string()))?;
        if let Some(size) = response.content_length().filter(|size| *size > validation::MAX_FILE_BYTES) {
            validation::validate_file(&file_name, size)?;
        }
        // The declared length may be absent or wrong, so the body is capped as well
        let bytes = read_capped(response, validation::MAX_FILE_BYTES)
            .map_err(|e| SheetPushError::UnreadableFile(location.to_owned(), e.to_string()))?;
        if bytes.is_empty() {
            Err(SheetPushError::UnreadableFile(location.to_owned(), "no data from remote file".to_owned()))?;
        }
        Self::from_bytes(location, &file_name, bytes)
    }
}

/// Reads at most `limit + 1` bytes, enough for the size check to see an oversized input
/// without buffering all of it.
fn read_capped<R: Read>(reader: R, limit: u64) -> std::io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.take(limit + 1).read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Checks if a location names a remote file rather than a local path
pub(crate) fn is_remote_url(location: &str) -> bool {
    Url::parse(location)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn detects_remote_urls() {
        assert!(!is_remote_url("test.xlsx"));
        assert!(!is_remote_url("/path/to/test.xlsx"));
        assert!(!is_remote_url("file:///path/to/test.xlsx"));
        assert!(!is_remote_url("C:\\data\\test.csv"));
        assert!(is_remote_url("https://example.com/test.xlsx"));
    }

    #[test]
    fn opens_local_file() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(b"a,b\n1,2\n").unwrap();
        let source = SourceFile::open(file.path().to_str().unwrap()).unwrap();
        assert_eq!(source.format, FileFormat::Csv);
        assert_eq!(source.bytes, b"a,b\n1,2\n");
        assert!(source.file_name.ends_with(".csv"));
    }

    #[test]
    fn rejects_unknown_extension() {
        let error = SourceFile::from_bytes("notes.txt", "notes.txt", b"x".to_vec()).unwrap_err();
        assert!(error.is_validation());
    }

    #[test]
    fn stem_drops_extension() {
        let source = SourceFile::from_bytes("dir/Q3 sales.xlsx", "Q3 sales.xlsx", vec![1]).unwrap();
        assert_eq!(source.stem(), "Q3 sales");
    }

    #[test]
    fn endless_stream_is_cut_one_byte_past_the_limit() -> Result<(), SheetPushError> {
        let bytes = read_capped(std::io::repeat(b'x'), 1024)?;
        assert_eq!(bytes.len(), 1025);
        let small = read_capped(&b"a,b\n"[..], 1024)?;
        assert_eq!(small, b"a,b\n");
        Ok(())
    }

    #[test]
    fn capped_read_of_an_oversized_body_fails_validation() -> Result<(), SheetPushError> {
        let bytes = read_capped(std::io::repeat(b'x'), validation::MAX_FILE_BYTES)?;
        let error = SourceFile::from_bytes("https://example.com/big.csv", "big.csv", bytes).unwrap_err();
        assert!(error.is_validation());
        Ok(())
    }

    #[test]
    fn missing_local_file_is_an_error() {
        assert!(SourceFile::open("non_existent_file.csv").is_err());
    }
}
