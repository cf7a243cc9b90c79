use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    /// The underlying store could not be reached or rejected the operation.
    #[error("Storage unavailable: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Spreadsheet error: {0}")]
    Xlsx(#[from] calamine::Error),

    #[error("Unsupported upload format: {0}")]
    UnsupportedFormat(String),

    #[error("Store version changed: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    #[error("Column not found: {0}")]
    UnknownColumn(String),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),
}

pub type Result<T> = std::result::Result<T, ReportError>;
