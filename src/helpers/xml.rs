//! XML parsing utilities for the Office Open XML parts of `.xlsx` workbooks.

use crate::error::SheetPushError;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::BytesRef;
use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::io::BufRead;
use std::str::FromStr;
use thiserror::Error;

/// Errors specific to XML parsing operations
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Parse entity '{0}' failed")]
    ParseEntityError(String),

    #[error("Parse attribute value '{0}' failed")]
    ParseAttributeValueError(String),
}

/// Event reader with a reusable buffer, configured for spreadsheet parts
pub(crate) struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buffer: Vec<u8>,
}

impl<R: BufRead> XmlReader<R> {
    pub(crate) fn new(buf_reader: R) -> XmlReader<R> {
        let mut reader = Reader::from_reader(buf_reader);
        let config = reader.config_mut();
        config.check_comments = false;
        config.check_end_names = false;
        // `<c r="A1"/>` must produce a Start/End pair so cell bookkeeping stays uniform
        config.expand_empty_elements = true;
        config.trim_text(false);
        XmlReader {
            reader,
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Reads the next event, `None` at end of document.
    pub(crate) fn next(&'_ mut self) -> Result<Option<Event<'_>>, SheetPushError> {
        self.buffer.clear();
        match self.reader.read_event_into(&mut self.buffer)? {
            Event::Eof => Ok(None),
            event => Ok(Some(event)),
        }
    }
}

pub(crate) trait XmlAttributeHelper<'a> {
    /// Gets the unescaped attribute value
    fn get_value(&self) -> Result<Cow<'a, str>, SheetPushError>;

    /// Parses the attribute value to the specified type
    fn parse_value<T: FromStr>(&self) -> Result<T, SheetPushError>;
}

impl<'a> XmlAttributeHelper<'a> for Attribute<'a> {
    fn get_value(&self) -> Result<Cow<'a, str>, SheetPushError> {
        Ok(self.unescape_value()?)
    }

    fn parse_value<T: FromStr>(&self) -> Result<T, SheetPushError> {
        self.get_value()?
            .parse()
            .map_err(|_| match std::str::from_utf8(&self.value) {
                Ok(value) => XmlError::ParseAttributeValueError(value.to_owned()).into(),
                Err(error) => SheetPushError::StringEncodingError(error),
            })
    }
}

pub(crate) trait XmlNodeHelper<'a> {
    /// Gets an attribute value by name
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, SheetPushError>;

    /// Parses an attribute value to the specified type
    fn parse_attribute_value<T: FromStr>(&self, name: &str) -> Result<Option<T>, SheetPushError>;
}

impl<'a> XmlNodeHelper<'a> for BytesStart<'a> {
    fn get_attribute_value(&'a self, name: &str) -> Result<Option<Cow<'a, str>>, SheetPushError> {
        self.try_get_attribute(name)?
            .map(|attribute| attribute.get_value())
            .transpose()
    }

    fn parse_attribute_value<T: FromStr>(&self, name: &str) -> Result<Option<T>, SheetPushError> {
        self.try_get_attribute(name)?
            .map(|attribute| attribute.parse_value())
            .transpose()
    }
}

pub(crate) trait XmlTextContextHelper {
    /// Appends a character or entity reference (`&amp;`, `&#10;`, `&#x41;`)
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), SheetPushError>;
}

impl XmlTextContextHelper for String {
    fn push_bytes_ref(&mut self, bytes: &BytesRef) -> Result<(), SheetPushError> {
        let raw = bytes.xml_content()?;
        if let Some(number) = raw.strip_prefix('#') {
            let code = match number.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16)?,
                None => number.parse::<u32>()?,
            };
            if let Some(character) = char::from_u32(code) {
                self.push(character);
            }
        } else if let Some(entity) = resolve_xml_entity(&raw) {
            self.push_str(entity);
        } else {
            Err(XmlError::ParseEntityError(raw.to_string()))?;
        }
        Ok(())
    }
}

#[macro_export]
macro_rules! match_xml_events {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(result) = $reader.next()? {
            match result {
                Event::Eof => break,
                $($arms)*
                _ => (),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::name::QName;

    #[test]
    fn resolves_entities_and_character_references() -> Result<(), SheetPushError> {
        let document = r#"<t>a&amp;b&#65;&#x42;</t>"#;
        let mut reader = XmlReader::new(document.as_bytes());
        let mut text = String::new();
        match_xml_events!(reader => {
            Event::Text(event) => text.push_str(&event.xml_content()?),
            Event::GeneralRef(event) => text.push_bytes_ref(&event)?,
        });
        assert_eq!(text, "a&bAB");
        Ok(())
    }

    #[test]
    fn parses_attribute_values() -> Result<(), SheetPushError> {
        let document = r#"<row r="12" spans="x"/>"#;
        let mut reader = XmlReader::new(document.as_bytes());
        let mut row = None;
        let mut spans_failed = false;
        match_xml_events!(reader => {
            Event::Start(event) if event.name() == QName(b"row") => {
                row = event.parse_attribute_value::<usize>("r")?;
                spans_failed = event.parse_attribute_value::<usize>("spans").is_err();
            }
        });
        assert_eq!(row, Some(12));
        assert!(spans_failed);
        Ok(())
    }
}
