use crate::store::StoreError;
use cell_hash::Hash;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CellError {
    #[error("format: {0}")]
    Format(String),
    #[error("missing data {hash}: {reason}")]
    MissingData { hash: Hash, reason: String },
    #[error("bad signature on {0}")]
    BadSignature(Hash),
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("invalid structure: {0}")]
    InvalidStructure(String),
}

impl CellError {
    pub fn format(msg: impl Into<String>) -> Self {
        CellError::Format(msg.into())
    }

    pub fn missing(hash: Hash, reason: impl Into<String>) -> Self {
        CellError::MissingData {
            hash,
            reason: reason.into(),
        }
    }

    pub fn bad_index(index: impl TryInto<i64>, len: usize) -> Self {
        CellError::IndexOutOfRange {
            index: index.try_into().unwrap_or(i64::MAX),
            len,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CellError::Format(_) => ErrorCode::Format,
            CellError::MissingData { .. } => ErrorCode::MissingData,
            CellError::BadSignature(_) => ErrorCode::BadSignature,
            CellError::IndexOutOfRange { .. } => ErrorCode::Bounds,
            CellError::InvalidStructure(_) => ErrorCode::Structure,
        }
    }
}

impl From<StoreError> for CellError {
    fn from(err: StoreError) -> Self {
        let hash = err.hash();
        CellError::MissingData {
            hash,
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CellError>;

/// Codes carried by exceptional contexts and written into receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Format,
    MissingData,
    BadSignature,
    Arity,
    Cast,
    Bounds,
    Juice,
    Structure,
    Undeclared,
    Sequence,
    Cancelled,
    Depth,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Format => "FORMAT",
            ErrorCode::MissingData => "MISSING",
            ErrorCode::BadSignature => "SIGNATURE",
            ErrorCode::Arity => "ARITY",
            ErrorCode::Cast => "CAST",
            ErrorCode::Bounds => "BOUNDS",
            ErrorCode::Juice => "JUICE",
            ErrorCode::Structure => "STRUCTURE",
            ErrorCode::Undeclared => "UNDECLARED",
            ErrorCode::Sequence => "SEQUENCE",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Depth => "DEPTH",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        const ALL: [ErrorCode; 12] = [
            ErrorCode::Format,
            ErrorCode::MissingData,
            ErrorCode::BadSignature,
            ErrorCode::Arity,
            ErrorCode::Cast,
            ErrorCode::Bounds,
            ErrorCode::Juice,
            ErrorCode::Structure,
            ErrorCode::Undeclared,
            ErrorCode::Sequence,
            ErrorCode::Cancelled,
            ErrorCode::Depth,
        ];
        ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// Infrastructure failures: surfaced to the caller as errors instead of
    /// being recorded as a failed transaction.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorCode::Format | ErrorCode::MissingData)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_by_name() {
        for code in [ErrorCode::Arity, ErrorCode::Juice, ErrorCode::Depth] {
            assert_eq!(ErrorCode::from_name(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::from_name("NOPE"), None);
    }

    #[test]
    fn only_infrastructure_codes_are_fatal() {
        assert!(ErrorCode::Format.is_fatal());
        assert!(ErrorCode::MissingData.is_fatal());
        assert!(!ErrorCode::Arity.is_fatal());
        assert!(!ErrorCode::Juice.is_fatal());
        assert!(!ErrorCode::BadSignature.is_fatal());
    }

    #[test]
    fn cell_errors_map_to_codes() {
        assert_eq!(CellError::bad_index(-1, 3).code(), ErrorCode::Bounds);
        assert_eq!(CellError::format("x").code(), ErrorCode::Format);
        let e = CellError::missing(Hash::ZERO, "absent");
        assert_eq!(e.code(), ErrorCode::MissingData);
        assert!(e.to_string().contains("absent"));
    }
}
