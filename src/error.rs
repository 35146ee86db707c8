use thiserror::Error;

/// Flat classification of a [`BatchError`], used by callers that only care
/// about what went wrong and not where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnknownQueue,
    UnknownAttribute,
    PermissionDenied,
    InvalidAttributeValue,
    InvalidRequest,
    UnknownResource,
    OutOfMemory,
    JobNotFound,
    Io,
    Internal,
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid value for attribute {name}: {value:?}")]
    InvalidAttributeValue { name: String, value: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Bad criterion #{index}: {source}")]
    BadCriterion {
        index: usize,
        #[source]
        source: Box<BatchError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchError {
    pub fn invalid_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        BatchError::InvalidAttributeValue {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Attach the 1-based position of the criterion that failed to compile.
    pub fn at_criterion(self, index: usize) -> Self {
        BatchError::BadCriterion {
            index,
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BatchError::UnknownQueue(_) => ErrorKind::UnknownQueue,
            BatchError::UnknownAttribute(_) => ErrorKind::UnknownAttribute,
            BatchError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            BatchError::InvalidAttributeValue { .. } => ErrorKind::InvalidAttributeValue,
            BatchError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            BatchError::UnknownResource(_) => ErrorKind::UnknownResource,
            BatchError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            BatchError::JobNotFound(_) => ErrorKind::JobNotFound,
            BatchError::BadCriterion { source, .. } => source.kind(),
            BatchError::Io(_) | BatchError::Json(_) => ErrorKind::Io,
            BatchError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Index of the offending criterion, when the error came out of compilation.
    pub fn criterion_index(&self) -> Option<usize> {
        match self {
            BatchError::BadCriterion { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// PBS-compatible numeric error code sent back to clients.
    pub fn code(&self) -> u32 {
        match self.kind() {
            ErrorKind::JobNotFound => 15001,
            ErrorKind::UnknownAttribute => 15002,
            ErrorKind::InvalidRequest => 15004,
            ErrorKind::PermissionDenied => 15007,
            ErrorKind::OutOfMemory => 15010,
            ErrorKind::Internal | ErrorKind::Io => 15011,
            ErrorKind::InvalidAttributeValue => 15014,
            ErrorKind::UnknownQueue => 15018,
            ErrorKind::UnknownResource => 15035,
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
