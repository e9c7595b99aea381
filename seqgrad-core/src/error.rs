use thiserror::Error;

/// Recoverable errors raised by the seqgrad core.
///
/// Broken invariants inside a forward or backward pass (mismatched vector
/// lengths, layers used before their parameters exist) are not represented
/// here: those panic, since continuing would only produce wrong numbers.
#[derive(Error, Debug)]
pub enum SeqGradError {
    #[error("Invalid layer configuration: {0}")]
    InvalidConfig(String),

    #[error("Parameter shape mismatch for {what}: expected {expected} values, got {actual}")]
    ParameterShape {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Wrong serializer type: expected {expected}, got {actual}")]
    WrongSerializerType { expected: String, actual: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
