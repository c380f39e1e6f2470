use chrono::{NaiveDate, NaiveDateTime};
use fin_core::{Cleared, Entry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use tracing::{debug, warn};

use crate::error::ImportError;
use crate::util::cents_f64;
use crate::EntryReader;

/// Whether amounts keep the sign the export reports or are negated.
///
/// Some accounts (credit cards, mostly) report amounts from the bank's side
/// rather than the owner's, so every amount needs flipping. There is no
/// default: callers must know which one their source needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignPolicy {
    AsReported,
    Inverted,
}

impl SignPolicy {
    pub fn from_inverted(inverted: bool) -> Self {
        if inverted {
            SignPolicy::Inverted
        } else {
            SignPolicy::AsReported
        }
    }

    fn apply(self, amount: i64) -> i64 {
        match self {
            SignPolicy::AsReported => amount,
            SignPolicy::Inverted => -amount,
        }
    }
}

/// Column layouts recognized in delimited exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabularLayout {
    /// Header on the first row: `Status, Date, Description, Debit, Credit`.
    DebitCredit,
    /// Payment-app activity: junk rows, then a header with `Datetime`,
    /// `Type`, `Amount (total)`, `To` and `Note`.
    PaymentActivity,
}

impl fmt::Display for TabularLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabularLayout::DebitCredit => write!(f, "debit-credit"),
            TabularLayout::PaymentActivity => write!(f, "payment-activity"),
        }
    }
}

const STATUS: &str = "Status";
const DATE: &str = "Date";
const DESCRIPTION: &str = "Description";
const DEBIT: &str = "Debit";
const CREDIT: &str = "Credit";
const ID: &str = "ID";
const DATETIME: &str = "Datetime";
const TYPE: &str = "Type";
const NOTE: &str = "Note";
const FROM: &str = "From";
const TO: &str = "To";
const AMOUNT_TOTAL: &str = "Amount (total)";

const KNOWN_COLUMNS: &[&str] = &[
    STATUS,
    DATE,
    DESCRIPTION,
    DEBIT,
    CREDIT,
    ID,
    DATETIME,
    TYPE,
    NOTE,
    FROM,
    TO,
    AMOUNT_TOTAL,
];

const DATE_FORMAT: &str = "%m/%d/%Y";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const ACCEPTED_PAYMENT_TYPE: &str = "Payment";

struct DebitCreditColumns {
    status: usize,
    date: usize,
    description: usize,
    debit: usize,
    credit: usize,
}

struct PaymentColumns {
    id: Option<usize>,
    datetime: usize,
    kind: usize,
    status: Option<usize>,
    amount: usize,
    to: usize,
    note: usize,
}

enum Columns {
    DebitCredit(DebitCreditColumns),
    Payment(PaymentColumns),
}

/// Reader for delimited bank and payment-app exports.
///
/// [`CsvReader::read_header`] detects the layout; columns are then looked
/// up by header name, so their order does not matter.
pub struct CsvReader<R> {
    records: csv::Reader<R>,
    record: csv::StringRecord,
    columns: Option<Columns>,
    sign: SignPolicy,
}

impl<R: Read> CsvReader<R> {
    pub fn new(reader: R, sign: SignPolicy) -> Self {
        let records = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);
        Self {
            records,
            record: csv::StringRecord::new(),
            columns: None,
            sign,
        }
    }

    /// Finds the header row and detects the layout. Rows with at most one
    /// recognized column name are skipped as preamble.
    pub fn read_header(&mut self) -> Result<TabularLayout, ImportError> {
        loop {
            if !self.records.read_record(&mut self.record)? {
                return Err(ImportError::HeaderMalformed(
                    "no header row found".to_string(),
                ));
            }
            let recognized = self
                .record
                .iter()
                .filter(|name| KNOWN_COLUMNS.contains(&name.trim()))
                .count();
            if recognized > 1 {
                break;
            }
            debug!(line = line_of(&self.record), "csv: skipping preamble row");
        }

        let fields: HashMap<&str, usize> = self
            .record
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim(), i))
            .collect();
        let require = |name: &str| {
            fields
                .get(name)
                .copied()
                .ok_or_else(|| ImportError::MissingColumn(name.to_string()))
        };

        let (columns, layout) = if fields.contains_key(DATETIME) && fields.contains_key(TYPE) {
            let columns = PaymentColumns {
                id: fields.get(ID).copied(),
                datetime: require(DATETIME)?,
                kind: require(TYPE)?,
                status: fields.get(STATUS).copied(),
                amount: require(AMOUNT_TOTAL)?,
                to: require(TO)?,
                note: require(NOTE)?,
            };
            (Columns::Payment(columns), TabularLayout::PaymentActivity)
        } else {
            let columns = DebitCreditColumns {
                status: require(STATUS)?,
                date: require(DATE)?,
                description: require(DESCRIPTION)?,
                debit: require(DEBIT)?,
                credit: require(CREDIT)?,
            };
            (Columns::DebitCredit(columns), TabularLayout::DebitCredit)
        };

        self.columns = Some(columns);
        Ok(layout)
    }

    /// Reads the next transaction row, skipping rows the layout filters out.
    pub fn read_entry(&mut self) -> Result<Option<Entry>, ImportError> {
        let Some(columns) = &self.columns else {
            return Err(ImportError::HeaderMalformed(
                "read_header must be called first".to_string(),
            ));
        };

        while self.records.read_record(&mut self.record)? {
            let entry = match columns {
                Columns::DebitCredit(cols) => Some(debit_credit_entry(cols, &self.record)?),
                Columns::Payment(cols) => payment_entry(cols, &self.record)?,
            };
            if let Some(mut entry) = entry {
                entry.amount = self.sign.apply(entry.amount);
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

impl<R: Read> EntryReader for CsvReader<R> {
    fn read_entry(&mut self) -> Result<Option<Entry>, ImportError> {
        CsvReader::read_entry(self)
    }
}

fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map_or(0, |p| p.line())
}

fn field(record: &csv::StringRecord, index: usize) -> &str {
    record.get(index).unwrap_or_default().trim()
}

fn parse_amount(
    record: &csv::StringRecord,
    name: &'static str,
    value: &str,
) -> Result<i64, ImportError> {
    cents_f64(value).ok_or_else(|| ImportError::field(line_of(record), name, value))
}

fn debit_credit_entry(
    cols: &DebitCreditColumns,
    record: &csv::StringRecord,
) -> Result<Entry, ImportError> {
    let line = line_of(record);

    let date_text = field(record, cols.date);
    let date = NaiveDate::parse_from_str(date_text, DATE_FORMAT)
        .map_err(|_| ImportError::field(line, "date", date_text))?;

    let credit = field(record, cols.credit);
    let debit = field(record, cols.debit);
    let amount = if !credit.is_empty() {
        parse_amount(record, "credit", credit)?
    } else if !debit.is_empty() {
        -parse_amount(record, "debit", debit)?
    } else {
        0
    };

    let cleared = match field(record, cols.status) {
        "Cleared" => Cleared::Cleared,
        other => {
            return Err(ImportError::UnrecognizedStatus {
                line,
                value: other.to_string(),
            })
        }
    };

    let mut entry = Entry::new(date, amount, field(record, cols.description));
    entry.cleared = cleared;
    Ok(entry)
}

fn payment_entry(
    cols: &PaymentColumns,
    record: &csv::StringRecord,
) -> Result<Option<Entry>, ImportError> {
    let line = line_of(record);

    let kind = field(record, cols.kind);
    if kind != ACCEPTED_PAYMENT_TYPE {
        debug!(line, "csv: skipping row of type {kind:?}");
        return Ok(None);
    }
    let datetime = field(record, cols.datetime);
    if datetime.is_empty() {
        debug!(line, "csv: skipping payment row without a timestamp");
        return Ok(None);
    }

    let date = NaiveDateTime::parse_from_str(datetime, DATETIME_FORMAT)
        .map_err(|_| ImportError::field(line, "datetime", datetime))?
        .date();
    let amount = parse_amount(record, "amount", field(record, cols.amount))?;
    let payee = format!("{}: {}", field(record, cols.to), field(record, cols.note));

    let mut entry = Entry::new(date, amount, payee.trim());
    if let Some(id) = cols.id {
        entry.number = field(record, id).to_string();
    }
    if let Some(status) = cols.status {
        match field(record, status) {
            "Complete" => entry.cleared = Cleared::Cleared,
            "" => {}
            other => warn!(line, "csv: unknown payment status {other:?}"),
        }
    }
    Ok(Some(entry))
}
