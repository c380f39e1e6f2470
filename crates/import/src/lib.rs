pub mod csv;
pub mod error;
pub mod qfx;
pub mod qif;
pub(crate) mod util;

pub use crate::csv::{CsvReader, SignPolicy, TabularLayout};
pub use error::ImportError;
pub use qfx::{QfxHeader, QfxReader, Token};
pub use qif::QifReader;

use fin_core::Entry;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::info;

/// A source of ledger entries, read one at a time after the header.
pub trait EntryReader {
    /// Returns the next entry, or `Ok(None)` once the input is exhausted.
    fn read_entry(&mut self) -> Result<Option<Entry>, ImportError>;

    /// Drains the reader, stopping at the first error.
    fn read_all(&mut self) -> Result<Vec<Entry>, ImportError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.read_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Non-fatal problems noticed so far.
    fn diagnostics(&self) -> &[String] {
        &[]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Qif,
    Csv,
    Qfx,
}

impl SourceFormat {
    /// Picks a format from the file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "qif" | "QIF" => Some(SourceFormat::Qif),
            "csv" | "CSV" => Some(SourceFormat::Csv),
            "qfx" | "QFX" | "ofx" | "OFX" => Some(SourceFormat::Qfx),
            _ => None,
        }
    }
}

/// Reads the header of `reader` in the given format and returns a reader
/// positioned at the first entry. `sign` only affects tabular sources.
pub fn open<R: Read + 'static>(
    format: SourceFormat,
    reader: R,
    sign: SignPolicy,
) -> Result<Box<dyn EntryReader>, ImportError> {
    match format {
        SourceFormat::Qif => {
            let mut r = QifReader::new(BufReader::new(reader));
            let label = r.read_header()?;
            info!(kind = %label, "opened qif source");
            Ok(Box::new(r))
        }
        SourceFormat::Csv => {
            let mut r = CsvReader::new(reader, sign);
            let layout = r.read_header()?;
            info!(%layout, ?sign, "opened csv source");
            Ok(Box::new(r))
        }
        SourceFormat::Qfx => {
            let mut r = QfxReader::new(reader);
            let header = r.read_header()?;
            info!(fields = header.len(), "opened qfx source");
            Ok(Box::new(r))
        }
    }
}
