use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// Settlement state of a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cleared {
    #[default]
    NotCleared,
    Cleared,
    Reconciled,
}

impl Cleared {
    /// Maps a line-ledger `C` field value. Returns `None` for marks the
    /// format does not define; callers decide whether that is fatal.
    pub fn from_mark(mark: &str) -> Option<Self> {
        match mark {
            "" => Some(Cleared::NotCleared),
            "*" | "c" => Some(Cleared::Cleared),
            "X" | "R" => Some(Cleared::Reconciled),
            _ => None,
        }
    }
}

impl fmt::Display for Cleared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cleared::NotCleared => write!(f, "not_cleared"),
            Cleared::Cleared => write!(f, "cleared"),
            Cleared::Reconciled => write!(f, "reconciled"),
        }
    }
}

/// A bank transaction normalized from any supported export format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// External transaction identifier, empty when the source has none.
    pub number: String,
    pub date: NaiveDate,
    /// Minor currency units; negative for withdrawals.
    pub amount: i64,
    pub payee: String,
    pub address: String,
    pub cleared: Cleared,
}

/// Textual date form fed into the identity key.
pub const KEY_DATE_FORMAT: &str = "%Y/%m/%d";

impl Entry {
    pub fn new(date: NaiveDate, amount: i64, payee: impl Into<String>) -> Self {
        Entry {
            number: String::new(),
            date,
            amount,
            payee: payee.into(),
            address: String::new(),
            cleared: Cleared::NotCleared,
        }
    }

    /// Content-derived key joining this entry to its stored tags: SHA-1 over
    /// the newline-terminated number, date, amount, payee and address,
    /// rendered as lowercase hex.
    pub fn id(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.number.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.date.format(KEY_DATE_FORMAT).to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.amount.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.payee.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.address.as_bytes());
        hasher.update(b"\n");
        hex::encode(hasher.finalize())
    }
}
