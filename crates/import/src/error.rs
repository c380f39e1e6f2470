use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Malformed header: {0}")]
    HeaderMalformed(String),
    #[error("line {line}: invalid {field} {value:?}")]
    FieldParse {
        line: u64,
        field: &'static str,
        value: String,
    },
    #[error("line {line}: unexpected end of input")]
    UnexpectedEof { line: u64 },
    #[error("Framing error: {0}")]
    Framing(String),
    #[error("line {line}: unrecognized status {value:?}")]
    UnrecognizedStatus { line: u64, value: String },
    #[error("Missing required column: {0}")]
    MissingColumn(String),
}

impl ImportError {
    pub(crate) fn field(line: u64, field: &'static str, value: &str) -> Self {
        ImportError::FieldParse {
            line,
            field,
            value: value.to_string(),
        }
    }
}
