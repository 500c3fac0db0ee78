use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExpenseError {
    #[error("Row {row}: unparseable date '{value}'")]
    UnparseableDate { row: usize, value: String },

    #[error("Row {row}: no date column found")]
    MissingDate { row: usize },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Snippet parse error at line {line}, column {column}: {message}")]
    SnippetParse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Unknown analysis tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {details}")]
    InvalidToolArguments { tool: String, details: String },

    #[error("Currency formatting error: {0}")]
    CurrencyFormat(String),

    #[error("Analysis backend error (status {status}): {body}")]
    BackendStatus { status: u16, body: String },

    #[error("Code generation failed: {0}")]
    CodeGeneration(String),

    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: String, seconds: u64 },

    #[error("Sandbox failure: {0}")]
    Sandbox(String),

    #[error("Another analysis query is already in flight")]
    QueryInFlight,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "gateway")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ExpenseError>;
