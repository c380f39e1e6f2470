//! Incomplete reader for QFX, Quicken's flavor of SGML-era OFX.
//!
//! Only the CRLF header block and a flat stream of open/close/text tokens
//! are understood; the document grammar is not validated.

use chrono::NaiveDate;
use fin_core::Entry;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};
use tracing::{debug, warn};

use crate::error::ImportError;
use crate::util::{cents_f64, decode_latin1};
use crate::EntryReader;

const BUF_SIZE: usize = 16 << 10;
const REFILL_THRESHOLD: usize = 1024;
const TRANSACTION_TAG: &str = "STMTTRN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A `key:value` header line; empty for the blank line ending the header.
    Header(String),
    Whitespace,
    OpenTag(String),
    CloseTag(String),
    Text(String),
}

pub type QfxHeader = BTreeMap<String, String>;

struct Scanner<R> {
    source: Option<R>,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    threshold: usize,
    line: u64,
    in_body: bool,
}

impl<R: Read> Scanner<R> {
    fn new(source: R, size: usize, threshold: usize) -> Self {
        Self {
            source: Some(source),
            buf: vec![0; size],
            start: 0,
            end: 0,
            threshold,
            line: 0,
            in_body: false,
        }
    }

    fn pending(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    fn consume(&mut self, n: usize) {
        self.start += n;
    }

    /// Reads more input. Unconsumed bytes are moved to the front first when
    /// free space runs low, and the buffer grows if that is not enough, so a
    /// token is never split or lost.
    fn fill(&mut self) -> Result<(), ImportError> {
        let Some(source) = self.source.as_mut() else {
            return Ok(());
        };

        if self.buf.len() - self.end < self.threshold {
            if self.start > 0 {
                debug!(bytes = self.end - self.start, "qfx: compacting buffer");
                self.buf.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
            }
            if self.buf.len() - self.end < self.threshold {
                let grown = self.buf.len() * 2;
                debug!(size = grown, "qfx: growing buffer");
                self.buf.resize(grown, 0);
            }
        }

        let n = loop {
            match source.read(&mut self.buf[self.end..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            self.source = None;
        } else {
            self.end += n;
        }
        Ok(())
    }

    /// Fills until at least `n` bytes are pending or input is exhausted.
    fn ensure(&mut self, n: usize) -> Result<bool, ImportError> {
        while self.pending().len() < n && self.source.is_some() {
            self.fill()?;
        }
        Ok(self.pending().len() >= n)
    }

    /// Offset of `byte` in the pending data, reading further as needed.
    fn find(&mut self, byte: u8) -> Result<Option<usize>, ImportError> {
        let mut searched = 0;
        loop {
            if let Some(i) = self.pending()[searched..].iter().position(|&b| b == byte) {
                return Ok(Some(searched + i));
            }
            if self.source.is_none() {
                return Ok(None);
            }
            searched = self.pending().len();
            self.fill()?;
        }
    }

    /// Takes the CRLF-terminated line whose `\n` sits at `nl`.
    fn take_line(&mut self, nl: usize) -> Result<String, ImportError> {
        if nl == 0 || self.pending()[nl - 1] != b'\r' {
            return Err(self.framing("line not terminated by CRLF"));
        }
        let text = decode_latin1(&self.pending()[..nl - 1]);
        self.consume(nl + 1);
        self.line += 1;
        Ok(text)
    }

    fn framing(&self, what: &str) -> ImportError {
        let near = &self.pending()[..self.pending().len().min(32)];
        ImportError::Framing(format!(
            "line {}: {what} near {:?}",
            self.line + 1,
            decode_latin1(near)
        ))
    }

    fn next_token(&mut self) -> Result<Option<Token>, ImportError> {
        if self.pending().len() < self.threshold {
            self.fill()?;
        }
        if !self.ensure(1)? {
            return Ok(None);
        }

        if !self.in_body {
            let Some(nl) = self.find(b'\n')? else {
                return Err(self.framing("unterminated header line"));
            };
            let line = self.take_line(nl)?;
            if line.is_empty() {
                self.in_body = true;
            }
            return Ok(Some(Token::Header(line)));
        }

        match self.pending()[0] {
            b'<' => {
                let Some(end) = self.find(b'>')? else {
                    return Err(self.framing("unterminated tag"));
                };
                let tag = self.pending();
                let token = if tag.get(1) == Some(&b'/') {
                    Token::CloseTag(decode_latin1(&tag[2..end]))
                } else {
                    Token::OpenTag(decode_latin1(&tag[1..end]))
                };
                self.consume(end + 1);
                Ok(Some(token))
            }
            b'\r' => {
                if !self.ensure(2)? || self.pending()[1] != b'\n' {
                    return Err(self.framing("bare CR"));
                }
                self.consume(2);
                self.line += 1;
                Ok(Some(Token::Whitespace))
            }
            _ => {
                let Some(nl) = self.find(b'\n')? else {
                    return Err(self.framing("unterminated text line"));
                };
                Ok(Some(Token::Text(self.take_line(nl)?)))
            }
        }
    }
}

#[derive(Default)]
struct PendingTransaction {
    fit_id: Option<String>,
    posted: Option<String>,
    amount: Option<String>,
    name: Option<String>,
}

impl PendingTransaction {
    fn set(&mut self, element: &str, value: String) {
        match element.to_ascii_uppercase().as_str() {
            "FITID" => self.fit_id = Some(value),
            "DTPOSTED" => self.posted = Some(value),
            "TRNAMT" => self.amount = Some(value),
            "NAME" => self.name = Some(value),
            _ => {}
        }
    }

    fn into_entry(self, line: u64) -> Result<Entry, ImportError> {
        let posted = self.posted.unwrap_or_default();
        let date = parse_qfx_date(&posted).ok_or_else(|| ImportError::field(line, "date", &posted))?;
        let amount = match self.amount {
            Some(text) => {
                cents_f64(&text).ok_or_else(|| ImportError::field(line, "amount", &text))?
            }
            None => 0,
        };
        let mut entry = Entry::new(date, amount, self.name.unwrap_or_default().trim());
        entry.number = self.fit_id.unwrap_or_default();
        Ok(entry)
    }
}

/// `YYYYMMDD`, optionally followed by a time and zone that are ignored,
/// e.g. `20240115120000[-5:EST]`.
fn parse_qfx_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let y: i32 = s.get(0..4)?.parse().ok()?;
    let m: u32 = s.get(4..6)?.parse().ok()?;
    let d: u32 = s.get(6..8)?.parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Streaming QFX reader.
///
/// Call [`QfxReader::read_header`] once, then either walk raw tokens with
/// [`QfxReader::next_token`] or pull transactions with `read_entry`.
/// Unbalanced close tags do not fail the read; they are logged and kept in
/// [`QfxReader::diagnostics`].
pub struct QfxReader<R> {
    scanner: Scanner<R>,
    stack: Vec<String>,
    diagnostics: Vec<String>,
}

impl<R: Read> QfxReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_buffer(reader, BUF_SIZE, REFILL_THRESHOLD)
    }

    fn with_buffer(reader: R, size: usize, threshold: usize) -> Self {
        Self {
            scanner: Scanner::new(reader, size, threshold),
            stack: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn read_header(&mut self) -> Result<QfxHeader, ImportError> {
        let mut header = QfxHeader::new();
        loop {
            match self.scanner.next_token()? {
                Some(Token::Header(line)) => {
                    if line.is_empty() {
                        return Ok(header);
                    }
                    let Some((key, value)) = line.split_once(':') else {
                        return Err(ImportError::HeaderMalformed(format!(
                            "bad header line {line:?}"
                        )));
                    };
                    header.insert(key.to_string(), value.to_string());
                }
                Some(token) => {
                    return Err(ImportError::HeaderMalformed(format!(
                        "unexpected {token:?} in header"
                    )))
                }
                None => {
                    return Err(ImportError::HeaderMalformed(
                        "input ended inside header".to_string(),
                    ))
                }
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, ImportError> {
        self.scanner.next_token()
    }

    /// Tag-nesting problems seen so far.
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    fn diagnose(&mut self, message: String) {
        warn!(line = self.scanner.line, "qfx: {message}");
        self.diagnostics.push(message);
    }

    /// Closes the innermost open element called `name`. Elements opened
    /// after it are empty leaves (`<MEMO>` with no value) and close with it.
    fn close(&mut self, name: &str) {
        let Some(pos) = self.stack.iter().rposition(|open| open == name) else {
            let message = match self.stack.last() {
                Some(top) => format!("stack mismatch: got </{name}>, open <{top}>"),
                None => format!("stack mismatch: got </{name}> with nothing open"),
            };
            self.diagnose(message);
            return;
        };
        for leaf in self.stack.drain(pos + 1..) {
            debug!(line = self.scanner.line, "qfx: <{leaf}> closed by </{name}>");
        }
        self.stack.truncate(pos);
    }

    /// Reads the next `<STMTTRN>` aggregate as an entry.
    pub fn read_entry(&mut self) -> Result<Option<Entry>, ImportError> {
        let mut current: Option<PendingTransaction> = None;

        while let Some(token) = self.scanner.next_token()? {
            match token {
                Token::Header(_) | Token::Whitespace => {}
                Token::OpenTag(name) => {
                    if name.eq_ignore_ascii_case(TRANSACTION_TAG) {
                        current = Some(PendingTransaction::default());
                    }
                    self.stack.push(name);
                }
                Token::CloseTag(name) => {
                    self.close(&name);
                    if name.eq_ignore_ascii_case(TRANSACTION_TAG) {
                        if let Some(pending) = current.take() {
                            return pending.into_entry(self.scanner.line).map(Some);
                        }
                    }
                }
                Token::Text(text) => {
                    // A leaf element's value closes it implicitly.
                    let Some(element) = self.stack.pop() else {
                        self.diagnose(format!("text {text:?} outside any element"));
                        continue;
                    };
                    if let Some(pending) = current.as_mut() {
                        pending.set(&element, unescape(&text));
                    }
                }
            }
        }

        if current.is_some() {
            return Err(ImportError::UnexpectedEof {
                line: self.scanner.line,
            });
        }
        Ok(None)
    }
}

impl<R: Read> EntryReader for QfxReader<R> {
    fn read_entry(&mut self) -> Result<Option<Entry>, ImportError> {
        QfxReader::read_entry(self)
    }

    fn diagnostics(&self) -> &[String] {
        QfxReader::diagnostics(self)
    }
}
