use thiserror::Error;

/// Problems with a routine's activity ledger.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("activity ledger is not a valid JSON sequence: {0}")]
    Parse(String),

    #[error("activity at index {index} carries position {position}")]
    NonContiguous { index: usize, position: usize },

    #[error("activity index {index} is out of range for a ledger of {len}")]
    OutOfRange { index: usize, len: usize },

    #[error("failed to encode activity ledger: {0}")]
    Encode(String),
}
