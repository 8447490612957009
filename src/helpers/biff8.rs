//! BIFF8 record reader for the Excel 97-2003 `Workbook` stream.
//! A record is `type: u16, size: u16, payload`; payloads longer than 8224 bytes
//! continue in following CONTINUE records, which this reader stitches together.

use crate::error::SheetPushError;
use crate::helpers::bytes::LittleEndian;
use encoding_rs::Encoding;
use thiserror::Error;

const CONTINUE: u16 = 60;

/// Errors specific to BIFF8 record parsing
#[derive(Error, Debug)]
pub enum Biff8Error {
    #[error("Fewer than {0} bytes remaining in record")]
    NotEnoughData(usize),
}

/// Cursor over the records of one BIFF8 stream.
pub(crate) struct Biff8Reader {
    /// Code page for 8-bit strings, set by the CODEPAGE record
    pub(crate) encoding: &'static Encoding,
    stream: Vec<u8>,
    /// Position of the next record header
    position: usize,
    /// Payload segments `(start, end)` of the current record and its continuations
    segments: Vec<(usize, usize)>,
    segment: usize,
    offset: usize,
}

impl Biff8Reader {
    pub(crate) fn new(stream: Vec<u8>) -> Biff8Reader {
        Biff8Reader {
            encoding: encoding_rs::WINDOWS_1252,
            stream,
            position: 0,
            segments: Vec::new(),
            segment: 0,
            offset: 0,
        }
    }

    /// Advances to the next record and returns its type, or `None` at end of stream.
    pub(crate) fn next(&mut self) -> Result<Option<u16>, SheetPushError> {
        if self.position + 4 > self.stream.len() {
            return Ok(None);
        }
        let kind = self.u16_at(self.position)?;
        self.segments.clear();
        self.segment = 0;
        self.offset = 0;
        self.push_segment()?;
        while self.position + 4 <= self.stream.len() && self.u16_at(self.position)? == CONTINUE {
            self.push_segment()?;
        }
        Ok(Some(kind))
    }

    fn push_segment(&mut self) -> Result<(), SheetPushError> {
        let size = self.u16_at(self.position + 2)? as usize;
        let start = self.position + 4;
        let end = (start + size).min(self.stream.len());
        self.segments.push((start, end));
        self.position = start + size;
        Ok(())
    }

    /// Moves to an absolute stream offset (worksheet substreams start at BOUNDSHEET8 offsets).
    pub(crate) fn seek(&mut self, position: usize) {
        self.position = position;
        self.segments.clear();
    }

    /// Takes up to `length` bytes from the current segment only.
    fn take(&mut self, length: usize) -> &[u8] {
        let Some(&(start, end)) = self.segments.get(self.segment) else {
            return &[];
        };
        let lower = (start + self.offset).min(end);
        let upper = (lower + length).min(end);
        if upper == end {
            self.segment += 1;
            self.offset = 0;
        } else {
            self.offset += upper - lower;
        }
        &self.stream[lower..upper]
    }

    fn take_exact(&mut self, length: usize) -> Result<&[u8], SheetPushError> {
        let bytes = self.take(length);
        if bytes.len() == length {
            Ok(bytes)
        } else {
            Err(Biff8Error::NotEnoughData(length))?
        }
    }

    pub(crate) fn skip(&mut self, length: usize) -> Result<(), SheetPushError> {
        let mut remaining = length;
        while remaining > 0 {
            let taken = self.take(remaining).len();
            if taken == 0 {
                Err(Biff8Error::NotEnoughData(length))?;
            }
            remaining -= taken;
        }
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, SheetPushError> {
        Ok(self.take_exact(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, SheetPushError> {
        Ok(self.take_exact(2)?.le_u16())
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, SheetPushError> {
        Ok(self.take_exact(4)?.le_u32())
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, SheetPushError> {
        Ok(self.take_exact(8)?.le_u64())
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, SheetPushError> {
        Ok(self.take_exact(8)?.le_f64())
    }

    /// Reads the last u16 of the current record (MULRK keeps its last column there).
    pub(crate) fn last_u16(&self) -> Result<u16, SheetPushError> {
        let &(start, end) = self.segments.last().ok_or(Biff8Error::NotEnoughData(2))?;
        if end >= start + 2 {
            self.u16_at(end - 2)
        } else {
            Err(Biff8Error::NotEnoughData(2))?
        }
    }

    fn u16_at(&self, index: usize) -> Result<u16, SheetPushError> {
        match self.stream.get(index..index + 2) {
            Some(bytes) => Ok(bytes.le_u16()),
            None => Err(Biff8Error::NotEnoughData(2))?,
        }
    }

    /// Decodes an RK value: a 30-bit integer or the high bits of a double,
    /// optionally divided by 100.
    pub(crate) fn read_rk(&mut self) -> Result<f64, SheetPushError> {
        let raw = self.read_u32()?;
        let mut value = if raw & 0x02 != 0 {
            ((raw as i32) >> 2) as f64
        } else {
            f64::from_bits(((raw & 0xFFFF_FFFC) as u64) << 32)
        };
        if raw & 0x01 != 0 {
            value /= 100.0;
        }
        Ok(value)
    }

    /// ShortXLUnicodeString: 1-byte character count.
    pub(crate) fn read_short_string(&mut self) -> Result<String, SheetPushError> {
        let count = self.read_u8()? as usize;
        let wide = self.read_u8()? & 0x01 != 0;
        let mut text = String::new();
        self.read_characters(count, wide, &mut text);
        Ok(text)
    }

    /// XLUnicodeString: 2-byte character count.
    pub(crate) fn read_string(&mut self) -> Result<String, SheetPushError> {
        let count = self.read_u16()? as usize;
        let wide = self.read_u8()? & 0x01 != 0;
        let mut text = String::new();
        self.read_characters(count, wide, &mut text);
        Ok(text)
    }

    /// XLUnicodeRichExtendedString as stored in the SST. Character data may span
    /// CONTINUE records, each restarting with a fresh option byte; formatting runs
    /// and phonetic data follow the characters.
    pub(crate) fn read_rich_string(&mut self) -> Result<String, SheetPushError> {
        let mut remaining = self.read_u16()? as usize;
        let flags = self.read_u8()?;
        let runs = if flags & 0x08 != 0 { self.read_u16()? as usize } else { 0 };
        let phonetic = if flags & 0x04 != 0 { self.read_u32()? as usize } else { 0 };
        let mut wide = flags & 0x01 != 0;
        let mut text = String::new();
        loop {
            let read = self.read_characters(remaining, wide, &mut text);
            remaining -= read;
            if remaining == 0 || self.segment >= self.segments.len() {
                break;
            }
            wide = self.read_u8()? & 0x01 != 0;
        }
        self.skip(runs * 4)?;
        self.skip(phonetic)?;
        Ok(text)
    }

    /// Appends up to `count` characters from the current segment, returning how many were read.
    fn read_characters(&mut self, count: usize, wide: bool, text: &mut String) -> usize {
        let width = if wide { 2 } else { 1 };
        let encoding = self.encoding;
        let bytes = self.take(count * width);
        if wide {
            let (decoded, _, _) = encoding_rs::UTF_16LE.decode(bytes);
            text.push_str(&decoded);
        } else if encoding == encoding_rs::UTF_16LE {
            // Compressed strings hold the low byte of each UTF-16 code unit
            text.extend(bytes.iter().map(|byte| char::from(*byte)));
        } else {
            let (decoded, _, _) = encoding.decode(bytes);
            text.push_str(&decoded);
        }
        bytes.len() / width
    }
}

#[macro_export]
macro_rules! match_biff8_record {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(kind) = $reader.next()? {
            match kind {
                $($arms)*
                _ => (),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: u16, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&kind.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn reads_records_in_order() {
        let mut stream = record(0x0809, &[0, 6]);
        stream.extend(record(0x000A, &[]));
        let mut reader = Biff8Reader::new(stream);
        assert_eq!(reader.next().unwrap(), Some(0x0809));
        assert_eq!(reader.read_u16().unwrap(), 0x0600);
        assert_eq!(reader.next().unwrap(), Some(0x000A));
        assert_eq!(reader.next().unwrap(), None);
    }

    #[test]
    fn stitches_continue_records() {
        let mut stream = record(0x00FC, &[5, 0, 0, b'a', b'b']);
        stream.extend(record(CONTINUE, &[0, b'c', b'd', b'e']));
        let mut reader = Biff8Reader::new(stream);
        reader.next().unwrap();
        assert_eq!(reader.read_rich_string().unwrap(), "abcde");
    }

    #[test]
    fn decodes_rk_numbers() {
        let integer = (42u32 << 2) | 0x02;
        let percent = (12345u32 << 2) | 0x03;
        let mut payload = Vec::new();
        payload.extend_from_slice(&integer.to_le_bytes());
        payload.extend_from_slice(&percent.to_le_bytes());
        let mut reader = Biff8Reader::new(record(0x027E, &payload));
        reader.next().unwrap();
        assert_eq!(reader.read_rk().unwrap(), 42.0);
        assert_eq!(reader.read_rk().unwrap(), 123.45);
    }

    #[test]
    fn short_record_reports_missing_bytes() {
        let mut reader = Biff8Reader::new(record(0x0203, &[1, 0]));
        reader.next().unwrap();
        assert!(reader.read_u32().is_err());
    }
}
