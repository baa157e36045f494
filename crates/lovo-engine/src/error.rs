use lovo_core::error::TrajError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LovoError {
    #[error(transparent)]
    Traj(#[from] TrajError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("subset selection did not converge after {iterations} iterations")]
    NoConvergence { iterations: usize },
}

pub type LovoResult<T> = Result<T, LovoError>;
