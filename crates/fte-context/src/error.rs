//! Error types for context handling

/// Errors raised while normalizing a context
///
/// Every variant surfaces to resolution callers as an unnormalizable context.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    /// A float that has no canonical decimal rendering
    #[error("non-finite number at '{path}'")]
    NonFiniteNumber { path: String },

    /// Nesting beyond the configured ceiling
    #[error("context nesting exceeds {limit} levels at '{path}'")]
    TooDeep { path: String, limit: usize },

    /// Context root was not a mapping
    #[error("context root must be a mapping, got {0}")]
    NotAMapping(&'static str),

    /// Input could not be expressed as a structured value
    #[error("unsupported context value: {0}")]
    Unserializable(String),
}

/// Errors that can occur when parsing fingerprints
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// Wrong number of bytes
    #[error("invalid fingerprint length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex decoding failed
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
