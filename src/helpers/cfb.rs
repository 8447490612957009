//! OLE Compound File Binary (CFB) container reader.
//! Legacy `.xls` workbooks live in a CFB stream named `Workbook` (or `Book`),
//! and password-protected `.xlsx` files are wrapped in a CFB `EncryptedPackage`.

use crate::error::SheetPushError;
use crate::helpers::bytes::words;
use crate::helpers::bytes::LittleEndian;
use encoding_rs::UTF_16LE;
use std::collections::HashMap;
use thiserror::Error;

const SIGNATURE: u64 = 0xE11A_B1A1_E011_CFD0;
const HEADER_SIZE: usize = 512;
const DIRECTORY_ENTRY_SIZE: usize = 128;
const MINI_SECTOR_SIZE: usize = 64;
/// Streams smaller than this live in the mini stream
const MINI_STREAM_CUTOFF: usize = 4096;
/// Sector ids above this value are markers (free, end of chain, ...)
const MAX_REGULAR_SECTOR: usize = 0xFFFF_FFFA;

/// Errors specific to Compound File Binary parsing
#[derive(Error, Debug)]
pub enum CfbError {
    #[error("The file is corrupted or has an invalid CFB structure")]
    FileFormatError,

    #[error("Invalid OLE signature (not an office document?)")]
    OleSignatureError,

    #[error("Invalid sector size '2 ^ {1}' for major version '{0}'")]
    SectorSizeError(u16, u16),

    #[error("Sector chain broken at sector '{0}'")]
    SectorChainError(usize),

    #[error("Empty root directory")]
    RootDirectoryError,
}

/// A parsed compound file holding every stream location in memory.
pub(crate) struct Cfb {
    streams: HashMap<String, Stream>,
    fat: Vec<usize>,
    sectors: Sectors,
    mini_fat: Vec<usize>,
    mini_sectors: Sectors,
}

#[derive(Debug, Clone, Copy)]
struct Stream {
    first_sector: usize,
    size: usize,
}

struct Sectors {
    data: Vec<u8>,
    size: usize,
    /// Regular sectors start after the header; the mini stream starts at 0
    offset: usize,
}

impl Sectors {
    fn get(&self, index: usize) -> Result<&[u8], SheetPushError> {
        let lower = self.offset + index * self.size;
        let upper = self.data.len().min(lower + self.size);
        if lower < upper {
            Ok(&self.data[lower..upper])
        } else {
            Err(CfbError::SectorChainError(index))?
        }
    }

    /// Follows a sector chain through the allocation table and concatenates it.
    fn read_chain(&self, fat: &[usize], first: usize) -> Result<Vec<u8>, SheetPushError> {
        let mut content = Vec::new();
        let mut index = first;
        let mut visited = 0usize;
        while index <= MAX_REGULAR_SECTOR {
            content.extend_from_slice(self.get(index)?);
            index = *fat.get(index).ok_or(CfbError::SectorChainError(index))?;
            visited += 1;
            if visited > fat.len() {
                Err(CfbError::SectorChainError(index))?;
            }
        }
        Ok(content)
    }
}

impl Cfb {
    /// Parses a compound file from its raw bytes.
    pub(crate) fn parse(bytes: &[u8]) -> Result<Cfb, SheetPushError> {
        if bytes.len() < HEADER_SIZE {
            Err(CfbError::FileFormatError)?;
        }
        let header = &bytes[..HEADER_SIZE];
        if header.le_u64() != SIGNATURE {
            Err(CfbError::OleSignatureError)?;
        }
        let major_version = header[26..].le_u16();
        let sector_shift = header[30..].le_u16();
        let sector_size = match (major_version, sector_shift) {
            (3, 9) => 512,
            (4, 12) => 4096,
            _ => Err(CfbError::SectorSizeError(major_version, sector_shift))?,
        };
        let fat_sector_count = header[44..].le_usize();
        let first_directory_sector = header[48..].le_usize();
        let first_mini_fat_sector = header[60..].le_usize();
        let mini_fat_sector_count = header[64..].le_usize();
        let first_difat_sector = header[68..].le_usize();

        let sectors = Sectors {
            data: bytes.to_vec(),
            size: sector_size,
            offset: sector_size.max(HEADER_SIZE),
        };

        // The first 109 FAT sector ids live in the header, the rest in DIFAT sectors
        let mut fat_sector_ids: Vec<usize> = words(&header[76..]).collect();
        let mut difat_index = first_difat_sector;
        while difat_index <= MAX_REGULAR_SECTOR {
            let sector = sectors.get(difat_index)?;
            let mut ids: Vec<usize> = words(sector).collect();
            difat_index = ids.pop().ok_or(CfbError::FileFormatError)?;
            fat_sector_ids.extend(ids);
        }
        let mut fat = Vec::new();
        for id in fat_sector_ids.into_iter().filter(|id| *id <= MAX_REGULAR_SECTOR).take(fat_sector_count) {
            fat.extend(words(sectors.get(id)?));
        }

        let directory = sectors.read_chain(&fat, first_directory_sector)?;
        let streams: HashMap<String, Stream> = directory
            .chunks_exact(DIRECTORY_ENTRY_SIZE)
            .filter_map(parse_directory_entry)
            .collect();
        let root = streams.get("Root Entry").copied().ok_or(CfbError::RootDirectoryError)?;

        let mini_fat = if mini_fat_sector_count > 0 {
            words(&sectors.read_chain(&fat, first_mini_fat_sector)?).collect()
        } else {
            Vec::new()
        };
        let mut mini_stream = sectors.read_chain(&fat, root.first_sector).unwrap_or_default();
        mini_stream.truncate(root.size);

        Ok(Cfb {
            streams,
            fat,
            sectors,
            mini_fat,
            mini_sectors: Sectors {
                data: mini_stream,
                size: MINI_SECTOR_SIZE,
                offset: 0,
            },
        })
    }

    /// Checks whether a named stream exists.
    pub(crate) fn exists(&self, name: &str) -> bool {
        self.streams.contains_key(name)
    }

    /// Reads a named stream, or `None` when the container has no such stream.
    pub(crate) fn read(&self, name: &str) -> Result<Option<Vec<u8>>, SheetPushError> {
        let Some(stream) = self.streams.get(name) else {
            return Ok(None);
        };
        let mut bytes = if stream.size < MINI_STREAM_CUTOFF {
            self.mini_sectors.read_chain(&self.mini_fat, stream.first_sector)?
        } else {
            self.sectors.read_chain(&self.fat, stream.first_sector)?
        };
        bytes.truncate(stream.size);
        Ok(Some(bytes))
    }
}

/// Decodes one 128-byte directory entry into its name and stream location.
fn parse_directory_entry(entry: &[u8]) -> Option<(String, Stream)> {
    let name_length = (entry[64..].le_u16() as usize).min(64);
    if name_length == 0 {
        return None;
    }
    let (name, _, _) = UTF_16LE.decode(&entry[..name_length]);
    let name = name.trim_end_matches('\0').to_owned();
    let stream = Stream {
        first_sector: entry[116..].le_usize(),
        size: entry[120..].le_u64() as usize,
    };
    Some((name, stream))
}
