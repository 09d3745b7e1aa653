use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PrepError {
    /// Unrecognized mode string or an impossible parameter combination.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A column the operation needs is absent from the series or table.
    #[error("required column '{column}' is absent")]
    MissingColumn { column: String },
    #[error("subject '{subject}' has no resolvable timestamps")]
    EmptySeries { subject: String },
    #[error("class code {code} is outside -1..=4")]
    InvalidClass { code: i64 },
    #[error("shape mismatch: {0}")]
    Shape(String),
}

impl PrepError {
    pub fn config(msg: impl Into<String>) -> Self {
        PrepError::Configuration(msg.into())
    }

    pub fn missing_column(column: impl Into<String>) -> Self {
        PrepError::MissingColumn {
            column: column.into(),
        }
    }

    /// Whether the error invalidates the whole run rather than one subject.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PrepError::Configuration(_))
    }
}

pub type PrepResult<T> = std::result::Result<T, PrepError>;
