//! Errors that stop an analysis before or during solving.
//!
//! Loss of precision is never an error: it shows up as an `Unknown` verdict.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("unknown abstract domain `{0}`")]
    UnknownDomain(String),

    #[error("unknown context policy `{0}`")]
    UnknownContextPolicy(String),

    #[error("unknown privatization `{0}`")]
    UnknownPrivatization(String),

    #[error("conflicting options: {0}")]
    ConflictingOptions(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("malformed CFG: {0}")]
    MalformedCfg(String),

    #[error("fixpoint not reached after {evaluations} evaluations")]
    NonTermination { evaluations: usize },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
