//! Low-level readers shared by the workbook formats.

pub(crate) mod biff8;
pub(crate) mod bytes;
pub(crate) mod cfb;
pub(crate) mod reader;
pub(crate) mod xml;
pub(crate) mod zip;
