use chrono::NaiveDate;
use fin_core::{Cleared, Entry};
use std::io::BufRead;
use tracing::{debug, warn};

use crate::error::ImportError;
use crate::util::{cents_f32, decode_latin1};
use crate::EntryReader;

const HEADER_PREFIX: &[u8] = b"!Type:";
const DATE_FORMAT: &str = "%m/%d/%Y";

/// Reader for QIF (Quicken Interchange Format) exports.
///
/// Each record is a run of lines whose first byte is a field code, closed
/// by a `^` line. [`QifReader::read_header`] must be called once before
/// reading entries.
pub struct QifReader<R> {
    reader: R,
    line: Vec<u8>,
    line_num: u64,
}

impl<R: BufRead> QifReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            line_num: 0,
        }
    }

    /// Loads the next line into `self.line` without its terminator.
    /// Returns `false` at end of input.
    fn next_line(&mut self) -> Result<bool, ImportError> {
        self.line.clear();
        if self.reader.read_until(b'\n', &mut self.line)? == 0 {
            return Ok(false);
        }
        self.line_num += 1;
        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        Ok(true)
    }

    /// Reads the `!Type:` line and returns its label, e.g. `"Bank"` or `"CCard"`.
    pub fn read_header(&mut self) -> Result<String, ImportError> {
        if !self.next_line()? {
            return Err(ImportError::HeaderMalformed("empty input".to_string()));
        }
        match self.line.strip_prefix(HEADER_PREFIX) {
            Some(label) => Ok(decode_latin1(label)),
            None => Err(ImportError::HeaderMalformed(format!(
                "expected {:?}, got {:?}",
                "!Type:",
                decode_latin1(&self.line)
            ))),
        }
    }

    /// Reads the next record. Returns `Ok(None)` at a clean end of input and
    /// [`ImportError::UnexpectedEof`] when input ends inside a record.
    pub fn read_entry(&mut self) -> Result<Option<Entry>, ImportError> {
        let mut entry = Entry::new(NaiveDate::MIN, 0, "");
        let mut date = None;
        let mut read = false;

        while self.next_line()? {
            let Some((&code, rest)) = self.line.split_first() else {
                debug!(line = self.line_num, "qif: skipping blank line");
                continue;
            };
            let data = decode_latin1(rest);
            match code {
                b'A' => entry.address = data,
                b'C' => match Cleared::from_mark(&data) {
                    Some(cleared) => entry.cleared = cleared,
                    None => warn!(line = self.line_num, "qif: unknown cleared status {data:?}"),
                },
                b'D' => {
                    date = Some(
                        NaiveDate::parse_from_str(&data, DATE_FORMAT)
                            .map_err(|_| ImportError::field(self.line_num, "date", &data))?,
                    );
                }
                b'N' => entry.number = data,
                b'P' => entry.payee = data.trim().to_string(),
                b'T' => {
                    entry.amount = cents_f32(&data)
                        .ok_or_else(|| ImportError::field(self.line_num, "amount", &data))?;
                }
                b'^' => {
                    if read {
                        entry.date =
                            date.ok_or_else(|| ImportError::field(self.line_num, "date", ""))?;
                        return Ok(Some(entry));
                    }
                    // Some exports emit empty records mid-file.
                    debug!(line = self.line_num, "qif: skipping empty record");
                    continue;
                }
                other => {
                    warn!(line = self.line_num, "qif: unknown field code {:?}", other as char);
                }
            }
            read = true;
        }

        if read {
            return Err(ImportError::UnexpectedEof {
                line: self.line_num,
            });
        }
        Ok(None)
    }
}

impl<R: BufRead> EntryReader for QifReader<R> {
    fn read_entry(&mut self) -> Result<Option<Entry>, ImportError> {
        QifReader::read_entry(self)
    }
}
