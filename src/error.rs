use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed data table: {0}")]
    MalformedTable(String),

    #[error("Data frame is not correct shape: {data} data columns, {meta} metadata columns")]
    ShapeMismatch { data: usize, meta: usize },

    #[error("Too many unique samples ({samples} for {rows} rows); skipping import")]
    TooManyUniqueSamples { samples: usize, rows: usize },

    #[error("Storage constraint violated: {0}")]
    StorageConstraint(String),

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Workbook could not be read: {0}")]
    Workbook(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ImportError {
    /// Domain failures that are reported and skipped rather than treated as faults.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ImportError::UnsupportedFormat(_)
                | ImportError::MalformedTable(_)
                | ImportError::ShapeMismatch { .. }
                | ImportError::TooManyUniqueSamples { .. }
                | ImportError::StorageConstraint(_)
        )
    }
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ImportError::StorageConstraint(err.to_string())
            }
            _ => ImportError::Storage {
                message: err.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
