use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrajError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("mismatch: {0}")]
    Mismatch(String),
    #[error("invalid: {0}")]
    Invalid(String),
    /// Clean end of the trajectory. Not a fault: readers return this at a
    /// frame boundary, never in the middle of a record.
    #[error("end of trajectory")]
    Eof,
}

impl TrajError {
    pub fn is_eof(&self) -> bool {
        matches!(self, TrajError::Eof)
    }
}

pub type TrajResult<T> = Result<T, TrajError>;
